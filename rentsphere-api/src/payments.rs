use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::UserClaims;
use crate::rentals::major_units;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentRequest {
    pub rental_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentResponse {
    pub client_payment_token: String,
    /// Major units
    pub amount: f64,
    pub currency: String,
}

/// POST /api/payment/create-payment-intent
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Json(req): Json<CreatePaymentIntentRequest>,
) -> Result<Json<CreatePaymentIntentResponse>, AppError> {
    let session = state
        .orchestrator
        .initiate_payment(&claims.user_id(), req.rental_id)
        .await?;

    Ok(Json(CreatePaymentIntentResponse {
        client_payment_token: session.client_token.into_inner(),
        amount: major_units(session.amount_minor),
        currency: session.currency,
    }))
}
