use async_trait::async_trait;
use chrono::Utc;
use rentsphere_core::payment::{
    CreateIntentRequest, GatewayError, PaymentEvent, PaymentGateway, PaymentIntent, SignatureError,
};
use rentsphere_shared::Masked;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::webhook;

/// Stripe payment intents over HTTPS
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: Masked<String>,
    webhook_secret: Masked<String>,
    signature_tolerance_seconds: i64,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
}

impl StripeGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: Masked<String>,
        webhook_secret: Masked<String>,
        request_timeout: Duration,
        signature_tolerance_seconds: i64,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into(),
            secret_key,
            webhook_secret,
            signature_tolerance_seconds,
        })
    }
}

fn map_transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let url = format!("{}/v1/payment_intents", self.api_base.trim_end_matches('/'));
        let form = [
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.clone()),
            ("metadata[rental_id]", request.metadata.rental_id.to_string()),
            ("metadata[user_id]", request.metadata.user_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.secret_key.expose())
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                "Stripe rejected intent for rental {} with {}: {}",
                request.metadata.rental_id, status, body
            );
            return Err(if status.is_server_error() {
                GatewayError::Unavailable(format!("HTTP {}", status))
            } else {
                GatewayError::Rejected(format!("HTTP {}: {}", status, body))
            });
        }

        let intent: IntentResponse = response.json().await.map_err(map_transport_error)?;
        let client_token = intent
            .client_secret
            .ok_or_else(|| GatewayError::Rejected(format!("intent {} has no client secret", intent.id)))?;

        info!("Created payment intent {} for rental {}", intent.id, request.metadata.rental_id);

        Ok(PaymentIntent {
            external_ref: intent.id,
            client_token: Masked::new(client_token),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            created_at: Utc::now(),
        })
    }

    fn verify_and_parse(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<PaymentEvent, SignatureError> {
        webhook::verify_and_parse(
            self.webhook_secret.expose(),
            self.signature_tolerance_seconds,
            raw_body,
            signature,
        )
    }
}

/// Local stand-in for the processor. Intents are keyed by idempotency key the way the real
/// processor dedups retried creates; webhook verification uses the real signature scheme.
pub struct MockPaymentGateway {
    webhook_secret: String,
    signature_tolerance_seconds: i64,
    latency: Option<Duration>,
    unavailable: bool,
    intents: Mutex<HashMap<String, PaymentIntent>>,
    created: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
            signature_tolerance_seconds: 300,
            latency: None,
            unavailable: false,
            intents: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// Delay every create call, for exercising caller timeouts
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail every create call as if the processor were down
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Number of distinct intents issued so far
    pub fn intents_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Signature header for `body`, timestamped now
    pub fn sign(&self, body: &[u8]) -> String {
        webhook::sign_payload(&self.webhook_secret, Utc::now().timestamp(), body)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable {
            return Err(GatewayError::Unavailable("mock gateway is down".to_string()));
        }

        let mut intents = self.intents.lock().await;
        if let Some(existing) = intents.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let external_ref = format!("mock_pi_{}", request.metadata.rental_id.simple());
        let intent = PaymentIntent {
            client_token: Masked::new(format!("{}_secret_{}", external_ref, self.created.load(Ordering::SeqCst))),
            external_ref,
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            created_at: Utc::now(),
        };

        intents.insert(request.idempotency_key.clone(), intent.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(intent)
    }

    fn verify_and_parse(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<PaymentEvent, SignatureError> {
        webhook::verify_and_parse(
            &self.webhook_secret,
            self.signature_tolerance_seconds,
            raw_body,
            signature,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rentsphere_core::payment::{IntentMetadata, PaymentEventKind};
    use rentsphere_core::UserId;
    use uuid::Uuid;

    fn request(rental_id: Uuid) -> CreateIntentRequest {
        CreateIntentRequest {
            amount_minor: 6000,
            currency: "usd".to_string(),
            metadata: IntentMetadata {
                rental_id,
                user_id: UserId::from("alice"),
            },
            idempotency_key: format!("rental-{}", rental_id),
        }
    }

    #[tokio::test]
    async fn test_mock_dedups_by_idempotency_key() {
        let gateway = MockPaymentGateway::new("whsec_test");
        let rental_id = Uuid::new_v4();

        let first = gateway.create_intent(&request(rental_id)).await.unwrap();
        let second = gateway.create_intent(&request(rental_id)).await.unwrap();

        assert_eq!(first.external_ref, second.external_ref);
        assert_eq!(first.amount_minor, 6000);
        assert_eq!(gateway.intents_created(), 1);
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let gateway = MockPaymentGateway::new("whsec_test").unavailable();
        let result = gateway.create_intent(&request(Uuid::new_v4())).await;

        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
        assert_eq!(gateway.intents_created(), 0);
    }

    #[test]
    fn test_mock_verifies_own_signatures() {
        let gateway = MockPaymentGateway::new("whsec_test");
        let body = br#"{"id":"evt_9","type":"payment_intent.payment_failed","data":{"object":{"id":"pi_9"}}}"#;

        let event = gateway.verify_and_parse(body, &gateway.sign(body)).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Failed);

        let forged = webhook::sign_payload("whsec_wrong", Utc::now().timestamp(), body);
        assert_eq!(
            gateway.verify_and_parse(body, &forged).unwrap_err(),
            SignatureError::Mismatch
        );
    }

    #[test]
    fn test_stripe_gateway_builds() {
        let gateway = StripeGateway::new(
            "https://api.stripe.com",
            Masked::from("sk_test"),
            Masked::from("whsec_test"),
            Duration::from_secs(5),
            300,
        );
        assert!(gateway.is_ok());
    }
}
