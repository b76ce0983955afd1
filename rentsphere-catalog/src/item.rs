use chrono::{DateTime, Utc};
use rentsphere_core::CoreError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A listed item as seen by the booking workflow.
///
/// The catalog owns everything else about an item; here only the daily rate and the
/// availability flag matter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: Uuid,
    pub title: String,
    /// Daily rate in minor currency units (cents)
    pub daily_price: i64,
    pub is_available: bool,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn new(title: impl Into<String>, daily_price: i64) -> Result<Self, CatalogError> {
        if daily_price <= 0 {
            return Err(CatalogError::InvalidPrice(daily_price));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            title: title.into(),
            daily_price,
            is_available: true,
            updated_at: Utc::now(),
        })
    }

    pub fn set_availability(&mut self, available: bool) {
        self.is_available = available;
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Item not found: {0}")]
    NotFound(Uuid),

    #[error("Daily price must be positive, got {0}")]
    InvalidPrice(i64),

    #[error(transparent)]
    Store(#[from] CoreError),
}
