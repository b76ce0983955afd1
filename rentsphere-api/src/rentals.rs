use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use rentsphere_rental::{BookingStatus, PaymentStatus, Rental};
use rentsphere_shared::DeliveryAddress;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::UserClaims;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRentalRequest {
    pub item_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub delivery_address: Option<DeliveryAddress>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalResponse {
    pub id: Uuid,
    pub user_id: String,
    pub item_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Major units (e.g. dollars)
    pub total_price: f64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_payment_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<DeliveryAddress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Prices are stored in minor units and exposed in major units
pub(crate) fn major_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

impl From<Rental> for RentalResponse {
    fn from(rental: Rental) -> Self {
        Self {
            id: rental.id,
            user_id: rental.user_id.to_string(),
            item_id: rental.item_id,
            start_date: rental.start_date,
            end_date: rental.end_date,
            total_price: major_units(rental.total_price),
            currency: rental.currency,
            payment_status: rental.payment_status,
            status: rental.status,
            external_payment_ref: rental.external_payment_ref,
            delivery_address: rental.delivery_address,
            created_at: rental.created_at,
            updated_at: rental.updated_at,
        }
    }
}

/// POST /api/rentals
pub async fn create_rental(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Json(req): Json<CreateRentalRequest>,
) -> Result<Json<RentalResponse>, AppError> {
    let rental = state
        .orchestrator
        .request_booking(
            &claims.user_id(),
            req.item_id,
            req.start_date,
            req.end_date,
            req.delivery_address,
        )
        .await?;

    Ok(Json(rental.into()))
}

/// GET /api/rentals/user
pub async fn list_user_rentals(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
) -> Result<Json<Vec<RentalResponse>>, AppError> {
    let rentals = state.orchestrator.list_rentals(&claims.user_id()).await?;
    Ok(Json(rentals.into_iter().map(RentalResponse::from).collect()))
}

/// GET /api/rentals/{id}
pub async fn get_rental(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(rental_id): Path<Uuid>,
) -> Result<Json<RentalResponse>, AppError> {
    let rental = state.orchestrator.get_rental(&claims.user_id(), rental_id).await?;
    Ok(Json(rental.into()))
}

/// DELETE /api/rentals/{id}
pub async fn cancel_rental(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(rental_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state.orchestrator.cancel_rental(&claims.user_id(), rental_id).await?;
    Ok(Json(json!({ "msg": "Rental cancelled" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_units() {
        assert_eq!(major_units(6000), 60.0);
        assert_eq!(major_units(1999), 19.99);
        assert_eq!(major_units(5), 0.05);
    }

    #[test]
    fn test_rental_response_uses_major_units() {
        let rental = Rental::new(
            rentsphere_core::UserId::from("alice"),
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            6000,
            "usd",
        );

        let json = serde_json::to_value(RentalResponse::from(rental)).unwrap();
        assert_eq!(json["totalPrice"].as_f64(), Some(60.0));
        assert_eq!(json["paymentStatus"], "pending");
        assert!(json.get("externalPaymentRef").is_none());
    }
}
