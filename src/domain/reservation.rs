use super::calendar::DateRange;
use super::identity::RequesterIdentity;
use super::item::BookableItemRef;
use super::payment::AttemptId;
use super::pricing::{PriceBreakdown, ResolvedOption};
use crate::error::{BookingError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Alphabet for reference suffixes; no 0/O or 1/I to keep them readable over the phone.
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const REFERENCE_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(pub Uuid);

impl ReservationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Draft,
    Pending,
    Confirmed,
    Canceled,
    Completed,
}

impl ReservationStatus {
    /// Statuses that hold the item's dates.
    pub const BLOCKING: [ReservationStatus; 2] = [Self::Pending, Self::Confirmed];
    pub const CANCELABLE: [ReservationStatus; 3] = [Self::Draft, Self::Pending, Self::Confirmed];

    pub fn blocks_dates(&self) -> bool {
        Self::BLOCKING.contains(self)
    }

    /// Edges of the reservation lifecycle:
    ///
    /// ```text
    /// draft -> pending -> confirmed -> completed
    /// draft | pending | confirmed -> canceled
    /// ```
    pub fn can_transition_to(&self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, to),
            (Draft, Pending)
                | (Pending, Confirmed)
                | (Confirmed, Completed)
                | (Draft | Pending | Confirmed, Canceled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Canceled => "canceled",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation about to be written. The store assigns id and reference.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub item: BookableItemRef,
    pub range: DateRange,
    pub guests: u32,
    pub requester: RequesterIdentity,
    pub note: Option<String>,
    pub price: PriceBreakdown,
    /// Drafts skip the availability check and do not hold dates.
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub reference: String,
    pub item: BookableItemRef,
    pub range: DateRange,
    pub guests: u32,
    pub options: Vec<ResolvedOption>,
    pub requester: RequesterIdentity,
    pub note: Option<String>,
    pub price: PriceBreakdown,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub payment_attempts: Vec<AttemptId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn from_candidate(candidate: NewReservation, reference: String, now: DateTime<Utc>) -> Self {
        let status = if candidate.draft {
            ReservationStatus::Draft
        } else {
            ReservationStatus::Pending
        };
        Self {
            id: ReservationId::new(),
            reference,
            options: candidate.price.options.clone(),
            item: candidate.item,
            range: candidate.range,
            guests: candidate.guests,
            requester: candidate.requester,
            note: candidate.note,
            price: candidate.price,
            status,
            payment_status: PaymentStatus::Pending,
            payment_attempts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn blocks_dates(&self) -> bool {
        self.status.blocks_dates()
    }

    /// Compare-and-set on `status`, optionally setting `payment_status` in the same step.
    ///
    /// Leaves the reservation untouched on error.
    pub fn apply_transition(
        &mut self,
        from: &[ReservationStatus],
        to: ReservationStatus,
        payment: Option<PaymentStatus>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !from.contains(&self.status) {
            return Err(BookingError::Conflict(format!(
                "reservation {} is {}, expected {}",
                self.reference,
                self.status,
                join_statuses(from)
            )));
        }
        if !self.status.can_transition_to(to) {
            return Err(BookingError::Conflict(format!(
                "reservation {} cannot move from {} to {}",
                self.reference, self.status, to
            )));
        }
        self.status = to;
        if let Some(payment) = payment {
            self.payment_status = payment;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Compare-and-set on `payment_status` only.
    pub fn apply_payment_status(
        &mut self,
        from: &[PaymentStatus],
        to: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !from.contains(&self.payment_status) {
            return Err(BookingError::Conflict(format!(
                "reservation {} payment is {}, cannot become {}",
                self.reference, self.payment_status, to
            )));
        }
        self.payment_status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn record_attempt(&mut self, attempt: AttemptId, now: DateTime<Utc>) {
        if !self.payment_attempts.contains(&attempt) {
            self.payment_attempts.push(attempt);
            self.updated_at = now;
        }
    }
}

/// Builds a reference like `RSV-240710-K7QX2M` from the creation date.
pub fn generate_reference<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let suffix: String = (0..REFERENCE_SUFFIX_LEN)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect();
    format!("RSV-{}-{}", now.format("%y%m%d"), suffix)
}

fn join_statuses(statuses: &[ReservationStatus]) -> String {
    statuses
        .iter()
        .map(ReservationStatus::as_str)
        .collect::<Vec<_>>()
        .join("|")
}
