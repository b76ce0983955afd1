use rentsphere_rental::{BookingOrchestrator, SettlementReconciler};
use rentsphere_shared::Masked;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: Masked<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BookingOrchestrator>,
    pub reconciler: Arc<SettlementReconciler>,
    pub auth: AuthConfig,
}
