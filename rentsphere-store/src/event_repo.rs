use async_trait::async_trait;
use rentsphere_core::repository::ProcessedEventLog;
use rentsphere_core::CoreResult;
use sqlx::PgPool;

use crate::database::storage_error;

/// Processor event ids already reconciled, keyed by id
pub struct PgProcessedEventLog {
    pool: PgPool,
}

impl PgProcessedEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventLog for PgProcessedEventLog {
    async fn is_processed(&self, event_id: &str) -> CoreResult<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT event_id FROM processed_payment_events WHERE event_id = $1")
                .bind(event_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;

        Ok(found.is_some())
    }

    async fn record(&self, event_id: &str, event_kind: &str) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_payment_events (event_id, event_kind)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(event_kind)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, event_id: &str) -> CoreResult<()> {
        sqlx::query("DELETE FROM processed_payment_events WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}
