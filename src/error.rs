use crate::domain::calendar::DateRange;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Dates unavailable, blocked by {}", format_ranges(.blocking))]
    Overlap { blocking: Vec<DateRange> },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error(
        "Refund failed: {0}. The reservation remains active and funds were not returned"
    )]
    Refund(String),
    #[error("Payment processor error: {0}")]
    Processor(String),
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, BookingError>;

impl BookingError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(Box::new(std::io::Error::other(message.into())))
    }

    /// Ranges a caller can show as alternatives after a failed booking.
    pub fn blocking_ranges(&self) -> &[DateRange] {
        match self {
            Self::Overlap { blocking } => blocking,
            _ => &[],
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<serde_json::Error> for BookingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

impl From<csv::Error> for BookingError {
    fn from(e: csv::Error) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for BookingError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Storage(Box::new(e))
    }
}

fn format_ranges(ranges: &[DateRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
