use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rentsphere_core::{CoreError, UserId};
use rentsphere_rental::ledger::{LedgerError, RentalLedger};
use rentsphere_rental::models::{OutcomeUpdate, PaymentOutcome, PaymentStatus, Rental};
use rentsphere_shared::DeliveryAddress;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::{is_unique_violation, storage_error};

const RENTAL_COLUMNS: &str = "id, user_id, item_id, start_date, end_date, total_price, currency, \
     payment_status, status, external_payment_ref, delivery_address, created_at, updated_at";

/// Postgres rental ledger. Every state change is a single conditional UPDATE or DELETE whose
/// source states come from the status enums; a zero row count is followed by a read only to
/// report why.
pub struct PgRentalLedger {
    pool: PgPool,
}

impl PgRentalLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, rental_id: Uuid) -> Result<Option<Rental>, LedgerError> {
        let row = sqlx::query_as::<_, RentalRow>(&format!(
            "SELECT {} FROM rentals WHERE id = $1",
            RENTAL_COLUMNS
        ))
        .bind(rental_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(Rental::try_from).transpose().map_err(LedgerError::from)
    }
}

/// Source states for a conditional update, bound as `TEXT[]`
fn status_strings<'a>(statuses: impl Iterator<Item = &'a str>) -> Vec<String> {
    statuses.map(str::to_string).collect()
}

#[derive(sqlx::FromRow)]
struct RentalRow {
    id: Uuid,
    user_id: String,
    item_id: Uuid,
    start_date: NaiveDate,
    end_date: NaiveDate,
    total_price: i64,
    currency: String,
    payment_status: String,
    status: String,
    external_payment_ref: Option<String>,
    delivery_address: Option<Json<DeliveryAddress>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RentalRow> for Rental {
    type Error = CoreError;

    fn try_from(row: RentalRow) -> Result<Self, Self::Error> {
        Ok(Rental {
            id: row.id,
            user_id: UserId::new(row.user_id),
            item_id: row.item_id,
            start_date: row.start_date,
            end_date: row.end_date,
            total_price: row.total_price,
            currency: row.currency,
            payment_status: row
                .payment_status
                .parse()
                .map_err(|e| CoreError::StorageError(format!("rental {}: {}", row.id, e)))?,
            status: row
                .status
                .parse()
                .map_err(|e| CoreError::StorageError(format!("rental {}: {}", row.id, e)))?,
            external_payment_ref: row.external_payment_ref,
            delivery_address: row.delivery_address.map(|Json(address)| address),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl RentalLedger for PgRentalLedger {
    async fn create(&self, rental: &Rental) -> Result<Uuid, LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO rentals (id, user_id, item_id, start_date, end_date, total_price, currency,
                                 payment_status, status, external_payment_ref, delivery_address,
                                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(rental.id)
        .bind(rental.user_id.as_str())
        .bind(rental.item_id)
        .bind(rental.start_date)
        .bind(rental.end_date)
        .bind(rental.total_price)
        .bind(&rental.currency)
        .bind(rental.payment_status.as_str())
        .bind(rental.status.as_str())
        .bind(&rental.external_payment_ref)
        .bind(rental.delivery_address.as_ref().map(Json))
        .bind(rental.created_at)
        .bind(rental.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::Conflict {
                    rental_id: rental.id,
                    reason: "rental already exists".to_string(),
                }
            } else {
                storage_error(e).into()
            }
        })?;

        Ok(rental.id)
    }

    async fn get(&self, rental_id: Uuid) -> Result<Rental, LedgerError> {
        self.fetch(rental_id)
            .await?
            .ok_or(LedgerError::NotFound(rental_id))
    }

    async fn find_by_payment_ref(&self, external_ref: &str) -> Result<Option<Rental>, LedgerError> {
        let row = sqlx::query_as::<_, RentalRow>(&format!(
            "SELECT {} FROM rentals WHERE external_payment_ref = $1",
            RENTAL_COLUMNS
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(Rental::try_from).transpose().map_err(LedgerError::from)
    }

    async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<Rental>, LedgerError> {
        let rows = sqlx::query_as::<_, RentalRow>(&format!(
            "SELECT {} FROM rentals WHERE user_id = $1 ORDER BY created_at DESC",
            RENTAL_COLUMNS
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter()
            .map(|row| Rental::try_from(row).map_err(LedgerError::from))
            .collect()
    }

    async fn attach_payment_ref(&self, rental_id: Uuid, external_ref: &str) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE rentals
            SET external_payment_ref = $2, updated_at = NOW()
            WHERE id = $1 AND external_payment_ref IS NULL AND payment_status = $3
            "#,
        )
        .bind(rental_id)
        .bind(external_ref)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::DuplicatePaymentRef(external_ref.to_string())
            } else {
                storage_error(e).into()
            }
        })?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.fetch(rental_id).await? {
            None => Err(LedgerError::NotFound(rental_id)),
            Some(_) => Err(LedgerError::AlreadyPaid(rental_id)),
        }
    }

    async fn update_payment_outcome(
        &self,
        rental_id: Uuid,
        outcome: PaymentOutcome,
    ) -> Result<OutcomeUpdate, LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE rentals
            SET payment_status = $2, status = $3, updated_at = NOW()
            WHERE id = $1 AND payment_status = ANY($4) AND status = ANY($5)
            "#,
        )
        .bind(rental_id)
        .bind(outcome.payment_status().as_str())
        .bind(outcome.booking_status().as_str())
        .bind(status_strings(outcome.payment_sources().iter().map(|s| s.as_str())))
        .bind(status_strings(outcome.booking_sources().iter().map(|s| s.as_str())))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 1 {
            return Ok(OutcomeUpdate::Applied);
        }

        let current = self.fetch(rental_id).await?.ok_or(LedgerError::NotFound(rental_id))?;
        if current.payment_status == outcome.payment_status() {
            return Ok(OutcomeUpdate::AlreadyApplied);
        }

        Err(LedgerError::Conflict {
            rental_id,
            reason: format!(
                "cannot move {}/{} to {}/{}",
                current.payment_status,
                current.status,
                outcome.payment_status(),
                outcome.booking_status()
            ),
        })
    }

    async fn delete(&self, rental_id: Uuid, requester: &UserId) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "DELETE FROM rentals WHERE id = $1 AND user_id = $2 AND payment_status = $3",
        )
        .bind(rental_id)
        .bind(requester.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current = self.fetch(rental_id).await?.ok_or(LedgerError::NotFound(rental_id))?;
        if !current.is_owned_by(requester) {
            return Err(LedgerError::Forbidden(rental_id));
        }

        Err(LedgerError::Conflict {
            rental_id,
            reason: format!("payment is already {}", current.payment_status),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rentsphere_rental::models::BookingStatus;

    async fn seed_rental(pool: &PgPool, user: &str) -> Rental {
        let item_id = Uuid::new_v4();
        sqlx::query("INSERT INTO items (id, title, daily_price) VALUES ($1, 'Tent', 2000)")
            .bind(item_id)
            .execute(pool)
            .await
            .unwrap();

        let rental = Rental::new(
            UserId::from(user),
            item_id,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            6000,
            "usd",
        );
        PgRentalLedger::new(pool.clone()).create(&rental).await.unwrap();
        rental
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_outcome_update_is_conditional(pool: PgPool) {
        let ledger = PgRentalLedger::new(pool.clone());
        let rental = seed_rental(&pool, "alice").await;

        assert_eq!(
            ledger.update_payment_outcome(rental.id, PaymentOutcome::Completed).await.unwrap(),
            OutcomeUpdate::Applied
        );
        assert_eq!(
            ledger.update_payment_outcome(rental.id, PaymentOutcome::Completed).await.unwrap(),
            OutcomeUpdate::AlreadyApplied
        );
        assert!(matches!(
            ledger.update_payment_outcome(rental.id, PaymentOutcome::Failed).await,
            Err(LedgerError::Conflict { .. })
        ));
        assert!(matches!(
            ledger.update_payment_outcome(Uuid::new_v4(), PaymentOutcome::Failed).await,
            Err(LedgerError::NotFound(_))
        ));

        let stored = ledger.get(rental.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Completed);
        assert_eq!(stored.status, BookingStatus::Approved);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_concurrent_outcomes_apply_once(pool: PgPool) {
        let ledger = PgRentalLedger::new(pool.clone());
        let rental = seed_rental(&pool, "alice").await;

        let (a, b) = tokio::join!(
            ledger.update_payment_outcome(rental.id, PaymentOutcome::Completed),
            ledger.update_payment_outcome(rental.id, PaymentOutcome::Completed),
        );

        let mut updates = vec![a.unwrap(), b.unwrap()];
        updates.sort_by_key(|u| *u == OutcomeUpdate::AlreadyApplied);
        assert_eq!(updates, vec![OutcomeUpdate::Applied, OutcomeUpdate::AlreadyApplied]);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_payment_ref_rules(pool: PgPool) {
        let ledger = PgRentalLedger::new(pool.clone());
        let first = seed_rental(&pool, "alice").await;
        let second = seed_rental(&pool, "alice").await;

        ledger.attach_payment_ref(first.id, "pi_1").await.unwrap();
        assert!(matches!(
            ledger.attach_payment_ref(first.id, "pi_2").await,
            Err(LedgerError::AlreadyPaid(_))
        ));
        assert!(matches!(
            ledger.attach_payment_ref(second.id, "pi_1").await,
            Err(LedgerError::DuplicatePaymentRef(_))
        ));

        let found = ledger.find_by_payment_ref("pi_1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_delete_rules(pool: PgPool) {
        let ledger = PgRentalLedger::new(pool.clone());
        let alice = UserId::from("alice");
        let rental = seed_rental(&pool, "alice").await;

        assert!(matches!(
            ledger.delete(rental.id, &UserId::from("mallory")).await,
            Err(LedgerError::Forbidden(_))
        ));
        ledger.delete(rental.id, &alice).await.unwrap();
        assert!(matches!(ledger.delete(rental.id, &alice).await, Err(LedgerError::NotFound(_))));

        let paid = seed_rental(&pool, "alice").await;
        ledger.update_payment_outcome(paid.id, PaymentOutcome::Completed).await.unwrap();
        assert!(matches!(ledger.delete(paid.id, &alice).await, Err(LedgerError::Conflict { .. })));
    }
}
