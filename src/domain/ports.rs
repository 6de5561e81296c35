//! Boundaries between the reservation engine and everything it does not own:
//! persistence, the listing catalog, the payment processor and the notifier.

use super::calendar::DateRange;
use super::identity::RequesterIdentity;
use super::item::{BookableItemRef, ItemSnapshot};
use super::payment::{AttemptChange, AttemptId, CardSummary, PaymentAttempt, PaymentMethod};
use super::reservation::{
    NewReservation, PaymentStatus, Reservation, ReservationId, ReservationStatus,
};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Re-checks availability and inserts as one atomic unit.
    ///
    /// Returns `BookingError::Overlap` when a pending or confirmed reservation
    /// of the same item collides with the candidate. Drafts are inserted
    /// without the check.
    async fn create(&self, candidate: NewReservation) -> Result<Reservation>;

    async fn get(&self, id: ReservationId) -> Result<Reservation>;

    async fn find_by_reference(&self, reference: &str) -> Result<Reservation>;

    /// Compare-and-set on status. Moving into `pending` re-runs the overlap
    /// check, excluding the reservation itself, inside the same atomic unit.
    async fn transition(
        &self,
        id: ReservationId,
        from: &[ReservationStatus],
        to: ReservationStatus,
        payment: Option<PaymentStatus>,
    ) -> Result<Reservation>;

    async fn set_payment_status(
        &self,
        id: ReservationId,
        from: &[PaymentStatus],
        to: PaymentStatus,
    ) -> Result<Reservation>;

    async fn record_attempt(&self, id: ReservationId, attempt: AttemptId) -> Result<Reservation>;

    /// Newest first.
    async fn list_for_requester(&self, requester: &RequesterIdentity) -> Result<Vec<Reservation>>;

    /// Ranges of pending/confirmed reservations of `item` colliding with `range`.
    async fn find_overlapping(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<DateRange>>;
}

#[async_trait]
pub trait PaymentAttemptStore: Send + Sync {
    async fn insert(&self, attempt: PaymentAttempt) -> Result<()>;

    async fn get(&self, id: AttemptId) -> Result<PaymentAttempt>;

    async fn find_by_session(&self, session_ref: &str) -> Result<PaymentAttempt>;

    /// Oldest first.
    async fn list_for_reservation(&self, reservation: ReservationId)
    -> Result<Vec<PaymentAttempt>>;

    /// Applies `change` as a compare-and-set against the stored status.
    ///
    /// A `Completed` change is rejected with `Conflict` when another attempt
    /// of the same reservation has already captured funds.
    async fn update(&self, id: AttemptId, change: AttemptChange) -> Result<PaymentAttempt>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fails with `NotFound` when the item is absent or unpublished.
    async fn pricing_snapshot(&self, item: &BookableItemRef) -> Result<ItemSnapshot>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub attempt_id: AttemptId,
    pub reservation_reference: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedSession {
    pub session_ref: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub paid: bool,
    pub transaction_ref: Option<String>,
    pub card: Option<CardSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOutcome {
    pub ok: bool,
    pub message: Option<String>,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn open_hosted_session(&self, request: SessionRequest) -> Result<HostedSession>;

    async fn retrieve_session(&self, session_ref: &str) -> Result<SessionOutcome>;

    async fn refund(&self, transaction_ref: &str) -> Result<RefundOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Received,
    Confirmed,
    Canceled,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipient: &RequesterIdentity,
        kind: NotificationKind,
        reservation: &Reservation,
    ) -> Result<()>;
}

pub type ReservationStoreRef = Arc<dyn ReservationStore>;
pub type PaymentAttemptStoreRef = Arc<dyn PaymentAttemptStore>;
pub type CatalogRef = Arc<dyn Catalog>;
pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;
pub type NotifierRef = Arc<dyn Notifier>;
