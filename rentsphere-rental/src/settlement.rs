use rentsphere_catalog::{CatalogError, ItemStore};
use rentsphere_core::payment::{PaymentEvent, PaymentEventKind, PaymentGateway, SignatureError};
use rentsphere_core::repository::ProcessedEventLog;
use rentsphere_core::CoreError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ledger::{LedgerError, RentalLedger};
use crate::models::{OutcomeUpdate, PaymentOutcome, Rental};

/// Retry policy for marking an item as rented once its rental is paid
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub item_flip_attempts: u32,
    /// Linear backoff step between attempts
    pub item_flip_backoff: Duration,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            item_flip_attempts: 3,
            item_flip_backoff: Duration::from_millis(200),
        }
    }
}

/// How an authenticated event was handled. Every variant is acknowledged to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled {
        rental_id: Uuid,
        update: OutcomeUpdate,
    },
    /// No rental carries the event's payment reference
    Unmatched,
    /// The outcome contradicts the rental's terminal state and was not applied
    Conflicting {
        rental_id: Uuid,
    },
    /// This event id was already reconciled
    Duplicate,
    UnknownEvent(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("Rental {rental_id} is paid but item {item_id} could not be marked unavailable: {reason}")]
    ItemFlipFailed {
        rental_id: Uuid,
        item_id: Uuid,
        reason: String,
    },

    #[error("Storage failure: {0}")]
    Store(String),
}

impl From<CoreError> for SettlementError {
    fn from(err: CoreError) -> Self {
        SettlementError::Store(err.to_string())
    }
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        SettlementError::Store(err.to_string())
    }
}

/// Applies asynchronous payment outcomes to rentals and items.
///
/// The rental write is authoritative. The item flip that follows a successful payment is retried
/// per [`SettlementPolicy`]; if it still fails the error is surfaced so the processor redelivers,
/// and the redelivery retries the flip against the already-completed rental.
pub struct SettlementReconciler {
    items: Arc<dyn ItemStore>,
    ledger: Arc<dyn RentalLedger>,
    events: Arc<dyn ProcessedEventLog>,
    gateway: Arc<dyn PaymentGateway>,
    policy: SettlementPolicy,
}

impl SettlementReconciler {
    pub fn new(
        items: Arc<dyn ItemStore>,
        ledger: Arc<dyn RentalLedger>,
        events: Arc<dyn ProcessedEventLog>,
        gateway: Arc<dyn PaymentGateway>,
        policy: SettlementPolicy,
    ) -> Self {
        Self { items, ledger, events, gateway, policy }
    }

    pub async fn handle_payment_event(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<SettlementOutcome, SettlementError> {
        // Only authentication on this channel; nothing is touched before it passes
        let event = self.gateway.verify_and_parse(raw_body, signature).map_err(|e| {
            warn!("Webhook signature verification failed: {}", e);
            e
        })?;

        info!(
            "Received payment event {} ({}) for intent {:?}",
            event.id,
            event.kind.as_str(),
            event.external_ref
        );

        if !self.events.record(&event.id, event.kind.as_str()).await? {
            info!("Payment event {} already processed, acknowledging", event.id);
            return Ok(SettlementOutcome::Duplicate);
        }

        let result = match &event.kind {
            PaymentEventKind::Succeeded => self.settle(&event, PaymentOutcome::Completed).await,
            PaymentEventKind::Failed => self.settle(&event, PaymentOutcome::Failed).await,
            PaymentEventKind::Unknown(kind) => {
                info!("Unhandled event type {}", kind);
                Ok(SettlementOutcome::UnknownEvent(kind.clone()))
            }
        };

        if result.is_err() {
            // Unclaim so the processor's redelivery is handled instead of deduplicated
            if let Err(e) = self.events.release(&event.id).await {
                error!("Could not release payment event {} after failure: {}", event.id, e);
            }
        }
        result
    }

    async fn settle(
        &self,
        event: &PaymentEvent,
        outcome: PaymentOutcome,
    ) -> Result<SettlementOutcome, SettlementError> {
        let Some(external_ref) = event.external_ref.as_deref() else {
            warn!("Payment event {} ({}) carries no payment reference", event.id, event.kind.as_str());
            return Ok(SettlementOutcome::Unmatched);
        };

        let Some(rental) = self.ledger.find_by_payment_ref(external_ref).await? else {
            warn!(
                "No rental for payment reference {} (event {}, {}, metadata rental {:?})",
                external_ref,
                event.id,
                event.kind.as_str(),
                event.rental_id
            );
            return Ok(SettlementOutcome::Unmatched);
        };

        match self.ledger.update_payment_outcome(rental.id, outcome).await {
            Ok(update) => {
                info!(
                    "Rental {} payment {} via {} ({:?})",
                    rental.id,
                    outcome.payment_status(),
                    external_ref,
                    update
                );
                if outcome == PaymentOutcome::Completed {
                    self.mark_item_rented(&rental).await?;
                }
                Ok(SettlementOutcome::Settled { rental_id: rental.id, update })
            }
            Err(LedgerError::Conflict { reason, .. }) => {
                error!(
                    "Payment event {} ({}) for {} conflicts with rental {}: {}",
                    event.id,
                    event.kind.as_str(),
                    external_ref,
                    rental.id,
                    reason
                );
                Ok(SettlementOutcome::Conflicting { rental_id: rental.id })
            }
            Err(LedgerError::NotFound(_)) => {
                warn!("Rental {} disappeared before settling {}", rental.id, external_ref);
                Ok(SettlementOutcome::Unmatched)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_item_rented(&self, rental: &Rental) -> Result<(), SettlementError> {
        let attempts = self.policy.item_flip_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.items.set_availability(rental.item_id, false).await {
                Ok(()) => return Ok(()),
                Err(CatalogError::NotFound(item_id)) => {
                    // Nothing to retry; the catalog no longer lists it
                    error!(
                        "Item {} for paid rental {} not found in catalog, manual reconciliation required",
                        item_id, rental.id
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} to mark item {} unavailable failed: {}",
                        attempt, attempts, rental.item_id, e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.item_flip_backoff * attempt).await;
                    }
                }
            }
        }

        error!(
            "Rental {} is paid via {:?} but item {} is still marked available, manual reconciliation required",
            rental.id, rental.external_payment_ref, rental.item_id
        );
        Err(SettlementError::ItemFlipFailed {
            rental_id: rental.id,
            item_id: rental.item_id,
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryProcessedEventLog;
    use crate::gateway::MockPaymentGateway;
    use crate::ledger::InMemoryRentalLedger;
    use crate::models::{BookingStatus, PaymentStatus};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rentsphere_catalog::{InMemoryItemStore, Item};
    use rentsphere_core::UserId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts writes and can be told to fail the next N of them
    struct FlakyItemStore {
        inner: InMemoryItemStore,
        writes: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl FlakyItemStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryItemStore::new(),
                writes: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait]
    impl ItemStore for FlakyItemStore {
        async fn get(&self, item_id: Uuid) -> Result<Item, CatalogError> {
            self.inner.get(item_id).await
        }

        async fn set_availability(&self, item_id: Uuid, available: bool) -> Result<(), CatalogError> {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(CatalogError::Store(CoreError::StorageError("catalog unreachable".to_string())));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_availability(item_id, available).await
        }
    }

    struct Fixture {
        items: Arc<FlakyItemStore>,
        ledger: Arc<InMemoryRentalLedger>,
        events: Arc<InMemoryProcessedEventLog>,
        gateway: Arc<MockPaymentGateway>,
        reconciler: SettlementReconciler,
        rental: Rental,
    }

    async fn fixture(item_failures: usize) -> Fixture {
        let items = Arc::new(FlakyItemStore::new(item_failures));
        let ledger = Arc::new(InMemoryRentalLedger::new());
        let events = Arc::new(InMemoryProcessedEventLog::new());
        let gateway = Arc::new(MockPaymentGateway::new("whsec_test"));

        let item = Item::new("Canoe", 2000).unwrap();
        let rental = Rental::new(
            UserId::from("alice"),
            item.id,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            6000,
            "usd",
        );
        items.inner.insert(item).await;
        ledger.create(&rental).await.unwrap();
        ledger.attach_payment_ref(rental.id, "pi_123").await.unwrap();

        let reconciler = SettlementReconciler::new(
            items.clone(),
            ledger.clone(),
            events.clone(),
            gateway.clone(),
            SettlementPolicy {
                item_flip_attempts: 3,
                item_flip_backoff: Duration::from_millis(1),
            },
        );

        Fixture { items, ledger, events, gateway, reconciler, rental }
    }

    fn body(event_id: &str, kind: &str, intent_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": event_id,
            "type": kind,
            "data": { "object": { "id": intent_id, "metadata": {} } }
        }))
        .unwrap()
    }

    async fn deliver(f: &Fixture, body: &[u8]) -> Result<SettlementOutcome, SettlementError> {
        f.reconciler.handle_payment_event(body, &f.gateway.sign(body)).await
    }

    #[tokio::test]
    async fn test_success_approves_and_reserves_item() {
        let f = fixture(0).await;

        let outcome = deliver(&f, &body("evt_1", "payment_intent.succeeded", "pi_123")).await.unwrap();

        assert_eq!(
            outcome,
            SettlementOutcome::Settled { rental_id: f.rental.id, update: OutcomeUpdate::Applied }
        );
        let rental = f.ledger.get(f.rental.id).await.unwrap();
        assert_eq!(rental.payment_status, PaymentStatus::Completed);
        assert_eq!(rental.status, BookingStatus::Approved);
        assert!(!f.items.get(f.rental.item_id).await.unwrap().is_available);
        assert!(f.events.is_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_rejects_and_leaves_item() {
        let f = fixture(0).await;

        deliver(&f, &body("evt_2", "payment_intent.payment_failed", "pi_123")).await.unwrap();

        let rental = f.ledger.get(f.rental.id).await.unwrap();
        assert_eq!(rental.payment_status, PaymentStatus::Failed);
        assert_eq!(rental.status, BookingStatus::Rejected);
        assert!(f.items.get(f.rental.item_id).await.unwrap().is_available);
        assert_eq!(f.items.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_a_no_op() {
        let f = fixture(0).await;
        let event = body("evt_1", "payment_intent.succeeded", "pi_123");

        deliver(&f, &event).await.unwrap();
        let after_first = f.ledger.get(f.rental.id).await.unwrap();

        assert_eq!(deliver(&f, &event).await.unwrap(), SettlementOutcome::Duplicate);
        assert_eq!(f.ledger.get(f.rental.id).await.unwrap(), after_first);
        assert_eq!(f.items.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_deliveries_settle_once() {
        let f = fixture(0).await;
        let event = body("evt_1", "payment_intent.succeeded", "pi_123");

        let (first, second) = tokio::join!(deliver(&f, &event), deliver(&f, &event));
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.retain(|o| *o != SettlementOutcome::Duplicate);

        assert_eq!(
            outcomes,
            vec![SettlementOutcome::Settled { rental_id: f.rental.id, update: OutcomeUpdate::Applied }]
        );
        assert_eq!(f.items.writes.load(Ordering::SeqCst), 1);
        let rental = f.ledger.get(f.rental.id).await.unwrap();
        assert_eq!(rental.payment_status, PaymentStatus::Completed);
        assert_eq!(rental.status, BookingStatus::Approved);
        assert!(f.events.is_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_same_outcome_under_new_event_id() {
        let f = fixture(0).await;

        deliver(&f, &body("evt_1", "payment_intent.succeeded", "pi_123")).await.unwrap();
        let outcome = deliver(&f, &body("evt_1b", "payment_intent.succeeded", "pi_123")).await.unwrap();

        assert_eq!(
            outcome,
            SettlementOutcome::Settled { rental_id: f.rental.id, update: OutcomeUpdate::AlreadyApplied }
        );
        assert_eq!(f.ledger.get(f.rental.id).await.unwrap().payment_status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_late_failure_does_not_overwrite_success() {
        let f = fixture(0).await;

        deliver(&f, &body("evt_1", "payment_intent.succeeded", "pi_123")).await.unwrap();
        let outcome = deliver(&f, &body("evt_2", "payment_intent.payment_failed", "pi_123")).await.unwrap();

        assert_eq!(outcome, SettlementOutcome::Conflicting { rental_id: f.rental.id });
        let rental = f.ledger.get(f.rental.id).await.unwrap();
        assert_eq!(rental.payment_status, PaymentStatus::Completed);
        assert_eq!(rental.status, BookingStatus::Approved);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let f = fixture(0).await;
        let event = body("evt_1", "payment_intent.succeeded", "pi_123");
        let forged = crate::webhook::sign_payload("whsec_attacker", chrono::Utc::now().timestamp(), &event);

        let result = f.reconciler.handle_payment_event(&event, &forged).await;
        assert!(matches!(result, Err(SettlementError::InvalidSignature(SignatureError::Mismatch))));

        let missing = f.reconciler.handle_payment_event(&event, "").await;
        assert!(matches!(missing, Err(SettlementError::InvalidSignature(SignatureError::MissingHeader))));

        assert_eq!(f.ledger.get(f.rental.id).await.unwrap(), f.rental_with_ref());
        assert!(f.items.get(f.rental.item_id).await.unwrap().is_available);
        assert!(!f.events.is_processed("evt_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_kind_and_unknown_reference_are_acknowledged() {
        let f = fixture(0).await;

        let unknown = deliver(&f, &body("evt_3", "charge.refunded", "ch_1")).await.unwrap();
        assert_eq!(unknown, SettlementOutcome::UnknownEvent("charge.refunded".to_string()));

        let unmatched = deliver(&f, &body("evt_4", "payment_intent.succeeded", "pi_unknown")).await.unwrap();
        assert_eq!(unmatched, SettlementOutcome::Unmatched);

        assert_eq!(f.ledger.get(f.rental.id).await.unwrap().payment_status, PaymentStatus::Pending);
        assert!(f.events.is_processed("evt_3").await.unwrap());
        assert!(f.events.is_processed("evt_4").await.unwrap());
    }

    #[tokio::test]
    async fn test_item_flip_is_retried() {
        let f = fixture(2).await;

        deliver(&f, &body("evt_1", "payment_intent.succeeded", "pi_123")).await.unwrap();

        assert!(!f.items.get(f.rental.item_id).await.unwrap().is_available);
        assert_eq!(f.items.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_item_flip_exhaustion_keeps_rental_and_allows_redelivery() {
        let f = fixture(3).await;
        let event = body("evt_1", "payment_intent.succeeded", "pi_123");

        let result = deliver(&f, &event).await;
        assert!(matches!(result, Err(SettlementError::ItemFlipFailed { .. })));

        // Rental outcome stands; the event id is released so the redelivery retries the flip
        assert_eq!(f.ledger.get(f.rental.id).await.unwrap().payment_status, PaymentStatus::Completed);
        assert!(f.items.get(f.rental.item_id).await.unwrap().is_available);
        assert!(!f.events.is_processed("evt_1").await.unwrap());

        let outcome = deliver(&f, &event).await.unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::Settled { rental_id: f.rental.id, update: OutcomeUpdate::AlreadyApplied }
        );
        assert!(!f.items.get(f.rental.item_id).await.unwrap().is_available);
    }

    impl Fixture {
        fn rental_with_ref(&self) -> Rental {
            let mut rental = self.rental.clone();
            rental.external_payment_ref = Some("pi_123".to_string());
            rental
        }
    }
}
