use chrono::{DateTime, NaiveDate, Utc};
use rentsphere_core::UserId;
use rentsphere_shared::DeliveryAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Payment lifecycle of a rental
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 4] = [
        PaymentStatus::Pending,
        PaymentStatus::Completed,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    /// Every status allowed to move to `next`
    pub fn predecessors(next: PaymentStatus) -> Vec<PaymentStatus> {
        Self::ALL.into_iter().filter(|s| s.can_transition_to(next)).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// pending -> completed | failed, completed -> refunded
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }
}

/// Fulfillment lifecycle of a rental
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Requested,
    Approved,
    Rejected,
    InProgress,
    Completed,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Requested,
        BookingStatus::Approved,
        BookingStatus::Rejected,
        BookingStatus::InProgress,
        BookingStatus::Completed,
    ];

    /// Every status allowed to move to `next`
    pub fn predecessors(next: BookingStatus) -> Vec<BookingStatus> {
        Self::ALL.into_iter().filter(|s| s.can_transition_to(next)).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Requested => "requested",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
        }
    }

    /// requested -> approved | rejected, approved -> in_progress -> completed
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Requested, BookingStatus::Approved)
                | (BookingStatus::Requested, BookingStatus::Rejected)
                | (BookingStatus::Approved, BookingStatus::InProgress)
                | (BookingStatus::InProgress, BookingStatus::Completed)
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown status value: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(BookingStatus::Requested),
            "approved" => Ok(BookingStatus::Approved),
            "rejected" => Ok(BookingStatus::Rejected),
            "in_progress" => Ok(BookingStatus::InProgress),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result reported by the payment processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Completed,
    Failed,
}

impl PaymentOutcome {
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Completed => PaymentStatus::Completed,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }

    pub fn booking_status(&self) -> BookingStatus {
        match self {
            PaymentOutcome::Completed => BookingStatus::Approved,
            PaymentOutcome::Failed => BookingStatus::Rejected,
        }
    }

    /// Payment statuses this outcome may be applied from
    pub fn payment_sources(&self) -> Vec<PaymentStatus> {
        PaymentStatus::predecessors(self.payment_status())
    }

    /// Booking statuses this outcome may be applied from
    pub fn booking_sources(&self) -> Vec<BookingStatus> {
        BookingStatus::predecessors(self.booking_status())
    }
}

/// Result of applying a payment outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeUpdate {
    Applied,
    /// The rental already carried this outcome; nothing changed
    AlreadyApplied,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
    },

    #[error("Payment already initiated for this rental")]
    PaymentAlreadyInitiated,
}

/// A single booking of one item by one user for a date range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rental {
    pub id: Uuid,
    pub user_id: UserId,
    pub item_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Minor units, fixed at creation
    pub total_price: i64,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub external_payment_ref: Option<String>,
    pub delivery_address: Option<DeliveryAddress>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rental {
    pub fn new(
        user_id: UserId,
        item_id: Uuid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        total_price: i64,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            item_id,
            start_date,
            end_date,
            total_price,
            currency: currency.into(),
            payment_status: PaymentStatus::Pending,
            status: BookingStatus::Requested,
            external_payment_ref: None,
            delivery_address: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_delivery_address(mut self, address: Option<DeliveryAddress>) -> Self {
        self.delivery_address = address.filter(|a| !a.is_empty());
        self
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// Cancellation is only allowed before any payment outcome exists
    pub fn is_cancellable(&self) -> bool {
        self.payment_status == PaymentStatus::Pending
    }

    /// Bind the processor's reference. First write wins.
    pub fn attach_payment_ref(&mut self, external_ref: String) -> Result<(), TransitionError> {
        if self.external_payment_ref.is_some() || self.payment_status != PaymentStatus::Pending {
            return Err(TransitionError::PaymentAlreadyInitiated);
        }

        self.external_payment_ref = Some(external_ref);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition: pending/requested -> completed/approved or failed/rejected.
    ///
    /// Reapplying the outcome the rental already has is a no-op.
    pub fn apply_payment_outcome(&mut self, outcome: PaymentOutcome) -> Result<OutcomeUpdate, TransitionError> {
        let next_payment = outcome.payment_status();
        let next_booking = outcome.booking_status();

        if self.payment_status == next_payment {
            return Ok(OutcomeUpdate::AlreadyApplied);
        }

        if !self.payment_status.can_transition_to(next_payment) || !self.status.can_transition_to(next_booking) {
            return Err(TransitionError::InvalidTransition {
                from: format!("{}/{}", self.payment_status, self.status),
                to: format!("{}/{}", next_payment, next_booking),
            });
        }

        self.payment_status = next_payment;
        self.status = next_booking;
        self.updated_at = Utc::now();
        Ok(OutcomeUpdate::Applied)
    }
}
