use chrono::NaiveDate;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("Invalid rental range: end date {end} must be after start date {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Daily price must be positive, got {0}")]
    InvalidPrice(i64),

    #[error("Total price overflows for {days} days at {daily_price}")]
    Overflow { daily_price: i64, days: i64 },
}

/// Number of billable days between two calendar dates.
///
/// Dates carry no time component, so the difference is always a whole number of days.
pub fn rental_days(start: NaiveDate, end: NaiveDate) -> Result<i64, PricingError> {
    if end <= start {
        return Err(PricingError::InvalidRange { start, end });
    }
    Ok((end - start).num_days())
}

/// Total rental price in minor units: `daily_price × days(start, end)`.
pub fn compute_total(daily_price: i64, start: NaiveDate, end: NaiveDate) -> Result<i64, PricingError> {
    if daily_price <= 0 {
        return Err(PricingError::InvalidPrice(daily_price));
    }

    let days = rental_days(start, end)?;

    daily_price
        .checked_mul(days)
        .ok_or(PricingError::Overflow { daily_price, days })
}
