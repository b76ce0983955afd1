pub mod models;
pub mod ledger;
pub mod events;
pub mod webhook;
pub mod gateway;
pub mod booking;
pub mod settlement;

pub use models::{BookingStatus, OutcomeUpdate, PaymentOutcome, PaymentStatus, Rental};
pub use ledger::{InMemoryRentalLedger, LedgerError, RentalLedger};
pub use events::InMemoryProcessedEventLog;
pub use gateway::{MockPaymentGateway, StripeGateway};
pub use booking::{BookingConfig, BookingError, BookingOrchestrator, PaymentSession};
pub use settlement::{SettlementError, SettlementOutcome, SettlementPolicy, SettlementReconciler};
