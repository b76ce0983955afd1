use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentsphere_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserId;

/// Metadata attached to every intent so the processor dashboard can be traced back to a rental.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentMetadata {
    pub rental_id: Uuid,
    pub user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: IntentMetadata,
    /// Sent to the processor so that retried creates for the same rental collapse into one intent.
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntent {
    pub external_ref: String, // Provider's ID (e.g., pi_123)
    pub client_token: Masked<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    Failed,
    Unknown(String),
}

impl PaymentEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentEventKind::Succeeded => "payment_intent.succeeded",
            PaymentEventKind::Failed => "payment_intent.payment_failed",
            PaymentEventKind::Unknown(kind) => kind,
        }
    }
}

impl From<&str> for PaymentEventKind {
    fn from(kind: &str) -> Self {
        match kind {
            "payment_intent.succeeded" => PaymentEventKind::Succeeded,
            "payment_intent.payment_failed" => PaymentEventKind::Failed,
            other => PaymentEventKind::Unknown(other.to_string()),
        }
    }
}

/// A verified, parsed inbound event from the processor.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub id: String,
    pub kind: PaymentEventKind,
    pub external_ref: Option<String>,
    pub rental_id: Option<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway timed out")]
    Timeout,
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
    #[error("Payment gateway rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingHeader,
    #[error("Malformed signature header")]
    MalformedHeader,
    #[error("Signature timestamp outside tolerance ({age_seconds}s old)")]
    StaleTimestamp { age_seconds: i64 },
    #[error("No signature matches the payload")]
    Mismatch,
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Contract with the external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent with the provider
    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Verify a webhook signature and parse the event it covers
    fn verify_and_parse(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<PaymentEvent, SignatureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(PaymentEventKind::from("payment_intent.succeeded"), PaymentEventKind::Succeeded);
        assert_eq!(PaymentEventKind::from("payment_intent.payment_failed"), PaymentEventKind::Failed);

        let other = PaymentEventKind::from("charge.refunded");
        assert_eq!(other, PaymentEventKind::Unknown("charge.refunded".to_string()));
        assert_eq!(other.as_str(), "charge.refunded");
    }
}
