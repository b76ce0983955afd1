use chrono::NaiveDate;
use rentsphere_catalog::{compute_total, CatalogError, ItemStore, PricingError};
use rentsphere_core::payment::{CreateIntentRequest, GatewayError, IntentMetadata, PaymentGateway};
use rentsphere_core::UserId;
use rentsphere_shared::{DeliveryAddress, Masked};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ledger::{LedgerError, RentalLedger};
use crate::models::{PaymentStatus, Rental};

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub currency: String,
    /// Upper bound on a single create-intent call
    pub gateway_timeout: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            gateway_timeout: Duration::from_secs(10),
        }
    }
}

/// What the client needs to finish payment with the processor
#[derive(Debug, Clone)]
pub struct PaymentSession {
    pub rental_id: Uuid,
    pub client_token: Masked<String>,
    pub amount_minor: i64,
    pub currency: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("Item not available: {0}")]
    ItemUnavailable(Uuid),

    #[error(transparent)]
    InvalidRange(#[from] PricingError),

    #[error("Rental not found: {0}")]
    RentalNotFound(Uuid),

    #[error("Rental {0} does not belong to the requester")]
    Forbidden(Uuid),

    #[error("Payment already initiated for rental {0}")]
    AlreadyPaid(Uuid),

    #[error("Rental {rental_id} cannot be changed: {reason}")]
    Conflict {
        rental_id: Uuid,
        reason: String,
    },

    #[error("Payment gateway timed out")]
    GatewayTimeout,

    #[error("Payment gateway error: {0}")]
    Gateway(GatewayError),

    #[error("Storage failure: {0}")]
    Store(String),
}

impl From<LedgerError> for BookingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound(id) => BookingError::RentalNotFound(id),
            LedgerError::Forbidden(id) => BookingError::Forbidden(id),
            LedgerError::AlreadyPaid(id) => BookingError::AlreadyPaid(id),
            LedgerError::Conflict { rental_id, reason } => BookingError::Conflict { rental_id, reason },
            LedgerError::DuplicatePaymentRef(r) => BookingError::Store(format!("payment reference {} reused", r)),
            LedgerError::Store(e) => BookingError::Store(e.to_string()),
        }
    }
}

impl From<CatalogError> for BookingError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => BookingError::ItemNotFound(id),
            other => BookingError::Store(other.to_string()),
        }
    }
}

/// Creates rentals and starts payment for them
pub struct BookingOrchestrator {
    items: Arc<dyn ItemStore>,
    ledger: Arc<dyn RentalLedger>,
    gateway: Arc<dyn PaymentGateway>,
    config: BookingConfig,
}

impl BookingOrchestrator {
    pub fn new(
        items: Arc<dyn ItemStore>,
        ledger: Arc<dyn RentalLedger>,
        gateway: Arc<dyn PaymentGateway>,
        config: BookingConfig,
    ) -> Self {
        Self { items, ledger, gateway, config }
    }

    /// Reserve an item for `[start_date, end_date)`. No payment traffic happens here.
    pub async fn request_booking(
        &self,
        user_id: &UserId,
        item_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        delivery_address: Option<DeliveryAddress>,
    ) -> Result<Rental, BookingError> {
        let item = self.items.get(item_id).await?;
        if !item.is_available {
            return Err(BookingError::ItemUnavailable(item_id));
        }

        let total_price = compute_total(item.daily_price, start_date, end_date)?;

        let rental = Rental::new(
            user_id.clone(),
            item_id,
            start_date,
            end_date,
            total_price,
            self.config.currency.clone(),
        )
        .with_delivery_address(delivery_address);

        self.ledger.create(&rental).await?;

        info!(
            "Rental {} requested by {} for item {} ({} -> {}, total {} {})",
            rental.id, user_id, item_id, start_date, end_date, total_price, rental.currency
        );
        Ok(rental)
    }

    /// Create a processor intent for a pending rental and bind its reference.
    ///
    /// A timeout or gateway failure leaves the rental untouched, so the caller may retry.
    pub async fn initiate_payment(
        &self,
        user_id: &UserId,
        rental_id: Uuid,
    ) -> Result<PaymentSession, BookingError> {
        let rental = self.ledger.get(rental_id).await?;

        if !rental.is_owned_by(user_id) {
            warn!("User {} tried to pay for rental {} owned by {}", user_id, rental_id, rental.user_id);
            return Err(BookingError::Forbidden(rental_id));
        }
        if rental.payment_status != PaymentStatus::Pending || rental.external_payment_ref.is_some() {
            return Err(BookingError::AlreadyPaid(rental_id));
        }

        let request = CreateIntentRequest {
            amount_minor: rental.total_price,
            currency: rental.currency.clone(),
            metadata: IntentMetadata {
                rental_id,
                user_id: user_id.clone(),
            },
            idempotency_key: format!("rental-{}", rental_id),
        };

        let intent = match tokio::time::timeout(self.config.gateway_timeout, self.gateway.create_intent(&request)).await {
            Ok(Ok(intent)) => intent,
            Ok(Err(GatewayError::Timeout)) | Err(_) => {
                error!("Payment gateway timed out creating intent for rental {}", rental_id);
                return Err(BookingError::GatewayTimeout);
            }
            Ok(Err(e)) => {
                error!("Failed to create payment intent for rental {}: {}", rental_id, e);
                return Err(BookingError::Gateway(e));
            }
        };

        // Conditional write: loses cleanly to a concurrent caller that bound a reference first
        self.ledger.attach_payment_ref(rental_id, &intent.external_ref).await?;

        info!("Payment intent {} bound to rental {}", intent.external_ref, rental_id);

        Ok(PaymentSession {
            rental_id,
            client_token: intent.client_token,
            amount_minor: intent.amount_minor,
            currency: intent.currency,
        })
    }

    /// Owner-only read
    pub async fn get_rental(&self, user_id: &UserId, rental_id: Uuid) -> Result<Rental, BookingError> {
        let rental = self.ledger.get(rental_id).await?;
        if !rental.is_owned_by(user_id) {
            return Err(BookingError::Forbidden(rental_id));
        }
        Ok(rental)
    }

    pub async fn list_rentals(&self, user_id: &UserId) -> Result<Vec<Rental>, BookingError> {
        Ok(self.ledger.list_by_user(user_id).await?)
    }

    /// Owner-only cancellation while payment is still pending
    pub async fn cancel_rental(&self, user_id: &UserId, rental_id: Uuid) -> Result<(), BookingError> {
        self.ledger.delete(rental_id, user_id).await?;
        info!("Rental {} cancelled by {}", rental_id, user_id);
        Ok(())
    }
}
