pub mod item;
pub mod pricing;
pub mod inventory;

pub use item::{Item, CatalogError};
pub use pricing::{compute_total, rental_days, PricingError};
pub use inventory::{ItemStore, InMemoryItemStore};
