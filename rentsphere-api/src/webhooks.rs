use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use rentsphere_rental::SettlementOutcome;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// POST /api/payment/webhook
///
/// Unauthenticated except for the signature. The body is taken raw so the HMAC covers the exact
/// bytes the processor sent.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let outcome = state.reconciler.handle_payment_event(&body, signature).await?;

    match &outcome {
        SettlementOutcome::Settled { rental_id, update } => {
            tracing::info!("Webhook settled rental {} ({:?})", rental_id, update);
        }
        other => tracing::debug!("Webhook acknowledged without change: {:?}", other),
    }

    Ok(Json(json!({ "received": true })))
}
