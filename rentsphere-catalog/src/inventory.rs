use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::item::{CatalogError, Item};

/// Availability view of the item catalog
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get(&self, item_id: Uuid) -> Result<Item, CatalogError>;

    /// Plain flag write. Repeating it is harmless, so concurrent writers may race.
    async fn set_availability(&self, item_id: Uuid, available: bool) -> Result<(), CatalogError>;
}

/// In-memory item store, used by tests and local runs without a database
pub struct InMemoryItemStore {
    items: RwLock<HashMap<Uuid, Item>>,
}

impl InMemoryItemStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Seed an item
    pub async fn insert(&self, item: Item) {
        self.items.write().await.insert(item.id, item);
    }
}

impl Default for InMemoryItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemStore for InMemoryItemStore {
    async fn get(&self, item_id: Uuid) -> Result<Item, CatalogError> {
        self.items
            .read()
            .await
            .get(&item_id)
            .cloned()
            .ok_or(CatalogError::NotFound(item_id))
    }

    async fn set_availability(&self, item_id: Uuid, available: bool) -> Result<(), CatalogError> {
        let mut items = self.items.write().await;
        let item = items
            .get_mut(&item_id)
            .ok_or(CatalogError::NotFound(item_id))?;

        item.set_availability(available);
        Ok(())
    }
}
