use super::reservation::ReservationId;
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub Uuid);

impl AttemptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    PromptPay,
    BankTransfer,
}

impl FromStr for PaymentMethod {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" => Ok(Self::Card),
            "promptpay" | "prompt_pay" => Ok(Self::PromptPay),
            "bank_transfer" => Ok(Self::BankTransfer),
            other => Err(BookingError::InvalidRequest(format!(
                "unknown payment method '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// Masked card details as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub brand: String,
    pub last4: String,
}

impl CardSummary {
    /// Keeps only the last four digits of whatever the processor reported.
    pub fn masked(brand: impl Into<String>, number: &str) -> Self {
        let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
        let last4 = digits[digits.len().saturating_sub(4)..].iter().collect();
        Self {
            brand: brand.into(),
            last4,
        }
    }
}

/// One try at collecting funds for a reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: AttemptId,
    pub reservation_id: ReservationId,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub status: AttemptStatus,
    pub session_ref: Option<String>,
    pub transaction_ref: Option<String>,
    pub card: Option<CardSummary>,
    pub error: Option<String>,
    /// Set while a refund request for this attempt is with the processor.
    #[serde(default)]
    pub refund_in_flight: bool,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A change to a stored attempt. Each variant implies the attempt's next status.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptChange {
    SessionOpened { session_ref: String },
    Completed {
        transaction_ref: String,
        card: Option<CardSummary>,
    },
    Failed { reason: String },
    /// Reserves a completed attempt for a single refund request.
    RefundClaimed,
    /// Gives the claim back after the processor did not refund.
    RefundReleased,
    Refunded,
}

impl AttemptChange {
    /// Statuses the attempt must currently be in for the change to apply.
    pub fn allowed_from(&self) -> &'static [AttemptStatus] {
        match self {
            Self::SessionOpened { .. } => &[AttemptStatus::Pending],
            // A late success callback after a failure still means funds moved.
            Self::Completed { .. } => &[AttemptStatus::Pending, AttemptStatus::Failed],
            Self::Failed { .. } => &[AttemptStatus::Pending],
            Self::RefundClaimed | Self::RefundReleased | Self::Refunded => {
                &[AttemptStatus::Completed]
            }
        }
    }

    pub fn target(&self) -> AttemptStatus {
        match self {
            Self::SessionOpened { .. } => AttemptStatus::Pending,
            Self::Completed { .. } => AttemptStatus::Completed,
            Self::Failed { .. } => AttemptStatus::Failed,
            Self::RefundClaimed | Self::RefundReleased => AttemptStatus::Completed,
            Self::Refunded => AttemptStatus::Refunded,
        }
    }
}

impl PaymentAttempt {
    pub fn new(
        reservation_id: ReservationId,
        method: PaymentMethod,
        amount: Decimal,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AttemptId::new(),
            reservation_id,
            method,
            amount,
            currency: currency.into(),
            status: AttemptStatus::Pending,
            session_ref: None,
            transaction_ref: None,
            card: None,
            error: None,
            refund_in_flight: false,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compare-and-set style update; the attempt is untouched on error.
    pub fn apply(&mut self, change: AttemptChange, now: DateTime<Utc>) -> Result<()> {
        if !change.allowed_from().contains(&self.status) {
            return Err(BookingError::Conflict(format!(
                "payment attempt {} is {}, cannot become {}",
                self.id,
                self.status,
                change.target()
            )));
        }
        match &change {
            AttemptChange::RefundClaimed if self.refund_in_flight => {
                return Err(BookingError::Conflict(format!(
                    "payment attempt {} already has a refund in flight",
                    self.id
                )));
            }
            AttemptChange::RefundReleased if !self.refund_in_flight => {
                return Err(BookingError::Conflict(format!(
                    "payment attempt {} has no refund in flight",
                    self.id
                )));
            }
            _ => {}
        }
        self.status = change.target();
        match change {
            AttemptChange::SessionOpened { session_ref } => self.session_ref = Some(session_ref),
            AttemptChange::Completed {
                transaction_ref,
                card,
            } => {
                self.transaction_ref = Some(transaction_ref);
                self.card = card;
                self.error = None;
            }
            AttemptChange::Failed { reason } => self.error = Some(reason),
            AttemptChange::RefundClaimed => self.refund_in_flight = true,
            AttemptChange::RefundReleased => self.refund_in_flight = false,
            AttemptChange::Refunded => {
                self.refund_in_flight = false;
                self.refunded_at = Some(now);
            }
        }
        self.updated_at = now;
        Ok(())
    }
}
