use async_trait::async_trait;
use crate::CoreResult;

/// Dedup table for inbound payment events.
///
/// The processor delivers webhooks at least once. An event id is claimed with `record` before it
/// is reconciled, so concurrent or later deliveries of the same id are acknowledged untouched.
/// A claim whose handling failed is dropped with `release` so the next delivery retries it.
#[async_trait]
pub trait ProcessedEventLog: Send + Sync {
    async fn is_processed(&self, event_id: &str) -> CoreResult<bool>;

    /// Claim an event id atomically. Returns `false` if it was already present.
    async fn record(&self, event_id: &str, event_kind: &str) -> CoreResult<bool>;

    async fn release(&self, event_id: &str) -> CoreResult<()>;
}
