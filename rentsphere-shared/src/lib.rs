pub mod pii;
pub mod models;

pub use models::address::DeliveryAddress;
pub use pii::Masked;
