pub mod app_config;
pub mod database;
pub mod item_repo;
pub mod rental_repo;
pub mod event_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use item_repo::PgItemStore;
pub use rental_repo::PgRentalLedger;
pub use event_repo::PgProcessedEventLog;
