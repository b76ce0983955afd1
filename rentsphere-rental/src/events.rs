use async_trait::async_trait;
use rentsphere_core::{repository::ProcessedEventLog, CoreResult};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct InMemoryProcessedEventLog {
    events: Mutex<HashMap<String, String>>,
}

impl InMemoryProcessedEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedEventLog for InMemoryProcessedEventLog {
    async fn is_processed(&self, event_id: &str) -> CoreResult<bool> {
        Ok(self.events.lock().await.contains_key(event_id))
    }

    async fn record(&self, event_id: &str, event_kind: &str) -> CoreResult<bool> {
        let mut events = self.events.lock().await;
        if events.contains_key(event_id) {
            return Ok(false);
        }
        events.insert(event_id.to_string(), event_kind.to_string());
        Ok(true)
    }

    async fn release(&self, event_id: &str) -> CoreResult<()> {
        self.events.lock().await.remove(event_id);
        Ok(())
    }
}
