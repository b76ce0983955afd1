use async_trait::async_trait;
use rentsphere_core::{CoreError, UserId};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{OutcomeUpdate, PaymentOutcome, Rental, TransitionError};

/// Durable record of every booking attempt.
///
/// Every mutating operation is a conditional update on a single rental: implementations must
/// check the current state and write in one atomic step, never read-then-blind-write.
#[async_trait]
pub trait RentalLedger: Send + Sync {
    async fn create(&self, rental: &Rental) -> Result<Uuid, LedgerError>;

    async fn get(&self, rental_id: Uuid) -> Result<Rental, LedgerError>;

    async fn find_by_payment_ref(&self, external_ref: &str) -> Result<Option<Rental>, LedgerError>;

    /// Newest first
    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Rental>, LedgerError>;

    /// Set the external payment reference if none is set yet and payment is still pending.
    async fn attach_payment_ref(&self, rental_id: Uuid, external_ref: &str) -> Result<(), LedgerError>;

    /// Apply a terminal payment outcome. Reapplying the same outcome returns `AlreadyApplied`.
    async fn update_payment_outcome(
        &self,
        rental_id: Uuid,
        outcome: PaymentOutcome,
    ) -> Result<OutcomeUpdate, LedgerError>;

    /// Owner-only cancellation while payment is pending
    async fn delete(&self, rental_id: Uuid, requester: &UserId) -> Result<(), LedgerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Rental not found: {0}")]
    NotFound(Uuid),

    #[error("Rental {0} does not belong to the requester")]
    Forbidden(Uuid),

    #[error("Payment already initiated for rental {0}")]
    AlreadyPaid(Uuid),

    #[error("Conflicting update on rental {rental_id}: {reason}")]
    Conflict {
        rental_id: Uuid,
        reason: String,
    },

    #[error("Payment reference {0} is already bound to another rental")]
    DuplicatePaymentRef(String),

    #[error(transparent)]
    Store(#[from] CoreError),
}

#[derive(Default)]
struct LedgerState {
    rentals: HashMap<Uuid, Rental>,
    by_payment_ref: HashMap<String, Uuid>,
}

/// In-memory ledger. One mutex guards both maps so each check-and-set is atomic.
#[derive(Default)]
pub struct InMemoryRentalLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryRentalLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RentalLedger for InMemoryRentalLedger {
    async fn create(&self, rental: &Rental) -> Result<Uuid, LedgerError> {
        let mut state = self.state.lock().await;
        if state.rentals.contains_key(&rental.id) {
            return Err(LedgerError::Conflict {
                rental_id: rental.id,
                reason: "rental already exists".to_string(),
            });
        }

        state.rentals.insert(rental.id, rental.clone());
        Ok(rental.id)
    }

    async fn get(&self, rental_id: Uuid) -> Result<Rental, LedgerError> {
        self.state
            .lock()
            .await
            .rentals
            .get(&rental_id)
            .cloned()
            .ok_or(LedgerError::NotFound(rental_id))
    }

    async fn find_by_payment_ref(&self, external_ref: &str) -> Result<Option<Rental>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .by_payment_ref
            .get(external_ref)
            .and_then(|id| state.rentals.get(id))
            .cloned())
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Rental>, LedgerError> {
        let state = self.state.lock().await;
        let mut rentals: Vec<Rental> = state
            .rentals
            .values()
            .filter(|r| r.is_owned_by(user_id))
            .cloned()
            .collect();

        rentals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rentals)
    }

    async fn attach_payment_ref(&self, rental_id: Uuid, external_ref: &str) -> Result<(), LedgerError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(bound_to) = state.by_payment_ref.get(external_ref) {
            if *bound_to != rental_id {
                return Err(LedgerError::DuplicatePaymentRef(external_ref.to_string()));
            }
        }

        let rental = state
            .rentals
            .get_mut(&rental_id)
            .ok_or(LedgerError::NotFound(rental_id))?;

        rental
            .attach_payment_ref(external_ref.to_string())
            .map_err(|_| LedgerError::AlreadyPaid(rental_id))?;

        state.by_payment_ref.insert(external_ref.to_string(), rental_id);
        Ok(())
    }

    async fn update_payment_outcome(
        &self,
        rental_id: Uuid,
        outcome: PaymentOutcome,
    ) -> Result<OutcomeUpdate, LedgerError> {
        let mut state = self.state.lock().await;
        let rental = state
            .rentals
            .get_mut(&rental_id)
            .ok_or(LedgerError::NotFound(rental_id))?;

        rental.apply_payment_outcome(outcome).map_err(|e| match e {
            TransitionError::InvalidTransition { .. } => LedgerError::Conflict {
                rental_id,
                reason: e.to_string(),
            },
            TransitionError::PaymentAlreadyInitiated => LedgerError::AlreadyPaid(rental_id),
        })
    }

    async fn delete(&self, rental_id: Uuid, requester: &UserId) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let rental = state
            .rentals
            .get(&rental_id)
            .ok_or(LedgerError::NotFound(rental_id))?;

        if !rental.is_owned_by(requester) {
            return Err(LedgerError::Forbidden(rental_id));
        }
        if !rental.is_cancellable() {
            return Err(LedgerError::Conflict {
                rental_id,
                reason: format!("payment is already {}", rental.payment_status),
            });
        }

        if let Some(removed) = state.rentals.remove(&rental_id) {
            if let Some(external_ref) = removed.external_payment_ref {
                state.by_payment_ref.remove(&external_ref);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingStatus, PaymentStatus};
    use chrono::NaiveDate;

    fn rental_for(user: &str) -> Rental {
        Rental::new(
            UserId::from(user),
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 4).unwrap(),
            150,
            "usd",
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let ledger = InMemoryRentalLedger::new();
        let rental = rental_for("alice");

        let id = ledger.create(&rental).await.unwrap();
        assert_eq!(ledger.get(id).await.unwrap(), rental);
        assert!(matches!(ledger.get(Uuid::new_v4()).await, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_by_user_only_returns_own_rentals() {
        let ledger = InMemoryRentalLedger::new();
        ledger.create(&rental_for("alice")).await.unwrap();
        ledger.create(&rental_for("alice")).await.unwrap();
        ledger.create(&rental_for("bob")).await.unwrap();

        let rentals = ledger.list_by_user(&UserId::from("alice")).await.unwrap();
        assert_eq!(rentals.len(), 2);
        assert!(rentals.iter().all(|r| r.user_id.as_str() == "alice"));
        assert!(rentals[0].created_at >= rentals[1].created_at);
    }

    #[tokio::test]
    async fn test_payment_ref_is_set_once() {
        let ledger = InMemoryRentalLedger::new();
        let id = ledger.create(&rental_for("alice")).await.unwrap();

        ledger.attach_payment_ref(id, "pi_1").await.unwrap();
        assert!(matches!(
            ledger.attach_payment_ref(id, "pi_2").await,
            Err(LedgerError::AlreadyPaid(_))
        ));

        let found = ledger.find_by_payment_ref("pi_1").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(ledger.find_by_payment_ref("pi_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payment_ref_binds_one_rental() {
        let ledger = InMemoryRentalLedger::new();
        let first = ledger.create(&rental_for("alice")).await.unwrap();
        let second = ledger.create(&rental_for("alice")).await.unwrap();

        ledger.attach_payment_ref(first, "pi_shared").await.unwrap();
        assert!(matches!(
            ledger.attach_payment_ref(second, "pi_shared").await,
            Err(LedgerError::DuplicatePaymentRef(_))
        ));
    }

    #[tokio::test]
    async fn test_outcome_update_is_idempotent() {
        let ledger = InMemoryRentalLedger::new();
        let id = ledger.create(&rental_for("alice")).await.unwrap();

        assert_eq!(
            ledger.update_payment_outcome(id, PaymentOutcome::Completed).await.unwrap(),
            OutcomeUpdate::Applied
        );
        assert_eq!(
            ledger.update_payment_outcome(id, PaymentOutcome::Completed).await.unwrap(),
            OutcomeUpdate::AlreadyApplied
        );
        assert!(matches!(
            ledger.update_payment_outcome(id, PaymentOutcome::Failed).await,
            Err(LedgerError::Conflict { .. })
        ));

        let rental = ledger.get(id).await.unwrap();
        assert_eq!(rental.payment_status, PaymentStatus::Completed);
        assert_eq!(rental.status, BookingStatus::Approved);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let ledger = InMemoryRentalLedger::new();
        let alice = UserId::from("alice");
        let id = ledger.create(&rental_for("alice")).await.unwrap();

        assert!(matches!(
            ledger.delete(id, &UserId::from("mallory")).await,
            Err(LedgerError::Forbidden(_))
        ));

        ledger.delete(id, &alice).await.unwrap();
        assert!(matches!(ledger.delete(id, &alice).await, Err(LedgerError::NotFound(_))));

        let paid = ledger.create(&rental_for("alice")).await.unwrap();
        ledger.update_payment_outcome(paid, PaymentOutcome::Completed).await.unwrap();
        assert!(matches!(ledger.delete(paid, &alice).await, Err(LedgerError::Conflict { .. })));
    }
}
