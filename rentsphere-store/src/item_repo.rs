use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rentsphere_catalog::{CatalogError, Item, ItemStore};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::storage_error;

pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    title: String,
    daily_price: i64,
    is_available: bool,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            title: row.title,
            daily_price: row.daily_price,
            is_available: row.is_available,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn get(&self, item_id: Uuid) -> Result<Item, CatalogError> {
        let row = sqlx::query_as::<_, ItemRow>(
            "SELECT id, title, daily_price, is_available, updated_at FROM items WHERE id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(Item::from).ok_or(CatalogError::NotFound(item_id))
    }

    async fn set_availability(&self, item_id: Uuid, available: bool) -> Result<(), CatalogError> {
        let result = sqlx::query(
            "UPDATE items SET is_available = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(item_id)
        .bind(available)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(item_id));
        }
        Ok(())
    }
}
