use super::availability::AvailabilityIndex;
use super::notifications;
use super::payments::{PaymentOrchestrator, PaymentSession};
use crate::config::EngineConfig;
use crate::domain::calendar::DateRange;
use crate::domain::identity::{Actor, RequesterIdentity};
use crate::domain::item::BookableItemRef;
use crate::domain::payment::{CardSummary, PaymentAttempt, PaymentMethod};
use crate::domain::ports::{
    CatalogRef, NotificationKind, NotifierRef, PaymentAttemptStoreRef, PaymentProcessorRef,
    ReservationStoreRef,
};
use crate::domain::pricing::{PriceBreakdown, PriceCalculator};
use crate::domain::reservation::{
    NewReservation, PaymentStatus, Reservation, ReservationId, ReservationStatus,
};
use crate::error::{BookingError, Result};
use tracing::{error, info, instrument, warn};

/// Everything the engine talks to but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: CatalogRef,
    pub reservations: ReservationStoreRef,
    pub attempts: PaymentAttemptStoreRef,
    pub processor: PaymentProcessorRef,
    pub notifier: NotifierRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub blocking_ranges: Vec<DateRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReservationRequest {
    pub item: BookableItemRef,
    pub range: DateRange,
    pub guests: u32,
    pub option_ids: Vec<String>,
    pub requester: RequesterIdentity,
    pub note: Option<String>,
    /// Save without holding the dates; see [`ReservationEngine::submit_draft`].
    pub draft: bool,
}

/// The public face of the booking core.
///
/// Composes availability, pricing, the reservation store and the payment
/// orchestrator. Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ReservationEngine {
    catalog: CatalogRef,
    reservations: ReservationStoreRef,
    availability: AvailabilityIndex,
    calculator: PriceCalculator,
    payments: PaymentOrchestrator,
    notifier: NotifierRef,
}

impl ReservationEngine {
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            catalog,
            reservations,
            attempts,
            processor,
            notifier,
        } = collaborators;
        Self {
            availability: AvailabilityIndex::new(reservations.clone()),
            calculator: PriceCalculator::new(config.tax_rate),
            payments: PaymentOrchestrator::new(
                config,
                reservations.clone(),
                attempts,
                processor,
                notifier.clone(),
            ),
            catalog,
            reservations,
            notifier,
        }
    }

    #[instrument(skip(self), fields(item = %item, range = %range))]
    pub async fn check_availability(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
    ) -> Result<Availability> {
        let blocking_ranges = self.availability.find_overlapping(item, range, None).await?;
        Ok(Availability {
            available: blocking_ranges.is_empty(),
            blocking_ranges,
        })
    }

    pub async fn quote(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        guests: u32,
        option_ids: &[String],
    ) -> Result<PriceBreakdown> {
        let snapshot = self.catalog.pricing_snapshot(item).await?;
        self.calculator.calculate(&snapshot, range, guests, option_ids)
    }

    /// Prices the request and stores it in one atomic availability check.
    ///
    /// On `BookingError::Overlap` the error carries the ranges currently
    /// blocking the item.
    #[instrument(skip(self, request), fields(item = %request.item, range = %request.range))]
    pub async fn create_reservation(&self, request: ReservationRequest) -> Result<Reservation> {
        request.requester.validate()?;
        let price = self
            .quote(
                &request.item,
                &request.range,
                request.guests,
                &request.option_ids,
            )
            .await?;

        let item = request.item.clone();
        let range = request.range;
        let candidate = NewReservation {
            item: request.item,
            range: request.range,
            guests: request.guests,
            requester: request.requester,
            note: request.note,
            price,
            draft: request.draft,
        };

        let reservation = match self.reservations.create(candidate).await {
            Ok(reservation) => reservation,
            Err(BookingError::Overlap { blocking }) => {
                return Err(self.overlap_error(&item, &range, None, blocking).await);
            }
            Err(e) => return Err(e),
        };

        info!(
            reference = %reservation.reference,
            status = %reservation.status,
            total = %reservation.price.total,
            "reservation created"
        );
        if reservation.status != ReservationStatus::Draft {
            notifications::dispatch(&self.notifier, NotificationKind::Received, &reservation);
        }
        Ok(reservation)
    }

    /// Turns a draft into a pending reservation, holding its dates if they are still free.
    #[instrument(skip(self, actor), fields(reservation = %id))]
    pub async fn submit_draft(&self, id: ReservationId, actor: &Actor) -> Result<Reservation> {
        let draft = self.reservations.get(id).await?;
        authorize(actor, &draft)?;

        let pending = match self
            .reservations
            .transition(
                id,
                &[ReservationStatus::Draft],
                ReservationStatus::Pending,
                None,
            )
            .await
        {
            Ok(pending) => pending,
            Err(BookingError::Overlap { blocking }) => {
                return Err(self
                    .overlap_error(&draft.item, &draft.range, Some(id), blocking)
                    .await);
            }
            Err(e) => return Err(e),
        };

        info!(reference = %pending.reference, "draft submitted");
        notifications::dispatch(&self.notifier, NotificationKind::Received, &pending);
        Ok(pending)
    }

    pub async fn pay(&self, id: ReservationId, method: PaymentMethod) -> Result<PaymentSession> {
        self.payments.open_session(id, method).await
    }

    /// Processor callback for a successful checkout.
    pub async fn apply_payment_completion(
        &self,
        session_ref: &str,
        transaction_ref: &str,
        card: Option<CardSummary>,
    ) -> Result<Reservation> {
        self.payments
            .apply_completion(session_ref, transaction_ref, card)
            .await
    }

    /// Processor callback for a failed checkout.
    pub async fn apply_payment_failure(
        &self,
        session_ref: &str,
        reason: &str,
    ) -> Result<PaymentAttempt> {
        self.payments.apply_failure(session_ref, reason).await
    }

    /// Checks a session with the processor when the customer returns from checkout.
    pub async fn confirm_payment(&self, session_ref: &str) -> Result<Reservation> {
        self.payments.sync_session(session_ref).await
    }

    /// Cancels a reservation, refunding it first if it was paid.
    ///
    /// A paid reservation is only canceled after the processor confirms the
    /// refund; otherwise `BookingError::Refund` is returned and nothing changes.
    #[instrument(skip(self, actor), fields(reservation = %id))]
    pub async fn cancel(&self, id: ReservationId, actor: &Actor) -> Result<Reservation> {
        let reservation = self.reservations.get(id).await?;
        authorize(actor, &reservation)?;

        if !ReservationStatus::CANCELABLE.contains(&reservation.status) {
            return Err(BookingError::Conflict(format!(
                "reservation {} is already {}",
                reservation.reference, reservation.status
            )));
        }

        let refunded = reservation.payment_status == PaymentStatus::Completed;
        if refunded {
            match self.payments.refund(id).await {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {
                    // Another request owns the refund and will finish the cancel.
                    warn!(
                        reference = %reservation.reference,
                        error = %e,
                        "refund already handled"
                    );
                    return self.reservations.get(id).await;
                }
                Err(e) => return Err(e),
            }
        }

        // Expect the status we inspected; a concurrent change means someone else resolved it.
        let canceled = match self
            .reservations
            .transition(
                id,
                &[reservation.status],
                ReservationStatus::Canceled,
                None,
            )
            .await
        {
            Ok(canceled) => canceled,
            Err(e) if e.is_conflict() => {
                let current = self.reservations.get(id).await?;
                if refunded && current.status != ReservationStatus::Canceled {
                    error!(
                        reference = %reservation.reference,
                        error = %e,
                        "refund issued but reservation changed before it could be canceled"
                    );
                } else {
                    warn!(reference = %reservation.reference, error = %e, "cancel lost a race");
                }
                return Ok(current);
            }
            Err(e) => return Err(e),
        };

        info!(reference = %canceled.reference, refunded, "reservation canceled");
        notifications::dispatch(&self.notifier, NotificationKind::Canceled, &canceled);
        Ok(canceled)
    }

    /// Refunds a captured payment without canceling. Administrators only.
    ///
    /// Covers payments that landed after the reservation was already canceled.
    pub async fn refund_payment(&self, id: ReservationId, actor: &Actor) -> Result<Reservation> {
        if !actor.admin {
            return Err(BookingError::Forbidden(
                "refunds outside cancellation require an administrator".to_string(),
            ));
        }
        self.payments.refund(id).await
    }

    pub async fn reservation(&self, id: ReservationId, actor: &Actor) -> Result<Reservation> {
        let reservation = self.reservations.get(id).await?;
        authorize(actor, &reservation)?;
        Ok(reservation)
    }

    pub async fn find_by_reference(&self, reference: &str, actor: &Actor) -> Result<Reservation> {
        let reservation = self.reservations.find_by_reference(reference).await?;
        authorize(actor, &reservation)?;
        Ok(reservation)
    }

    /// Reservations made by `requester`, newest first.
    pub async fn reservations_for(
        &self,
        requester: &RequesterIdentity,
    ) -> Result<Vec<Reservation>> {
        self.reservations.list_for_requester(requester).await
    }

    /// Payment attempts of a reservation in the order they were made.
    pub async fn payment_attempts(
        &self,
        id: ReservationId,
        actor: &Actor,
    ) -> Result<Vec<PaymentAttempt>> {
        self.reservation(id, actor).await?;
        self.payments.attempts_for(id).await
    }

    /// Builds the overlap error from a fresh read, falling back to what the store saw.
    async fn overlap_error(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
        seen_by_store: Vec<DateRange>,
    ) -> BookingError {
        let blocking = match self.availability.find_overlapping(item, range, exclude).await {
            Ok(current) if !current.is_empty() => current,
            _ => seen_by_store,
        };
        info!(item = %item, range = %range, blocked_by = blocking.len(), "dates unavailable");
        BookingError::Overlap { blocking }
    }
}

fn authorize(actor: &Actor, reservation: &Reservation) -> Result<()> {
    if actor.can_manage(&reservation.requester) {
        Ok(())
    } else {
        Err(BookingError::Forbidden(format!(
            "{} does not own reservation {}",
            actor.identity, reservation.reference
        )))
    }
}
