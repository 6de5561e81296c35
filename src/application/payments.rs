use super::notifications;
use crate::config::EngineConfig;
use crate::domain::payment::{
    AttemptChange, AttemptId, AttemptStatus, CardSummary, PaymentAttempt, PaymentMethod,
};
use crate::domain::ports::{
    HostedSession, NotificationKind, NotifierRef, PaymentAttemptStoreRef, PaymentProcessorRef,
    ReservationStoreRef, SessionRequest,
};
use crate::domain::reservation::{PaymentStatus, Reservation, ReservationId, ReservationStatus};
use crate::error::{BookingError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

/// Where to send the customer to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub attempt_id: AttemptId,
    pub session_ref: String,
    pub redirect_url: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Bridges reservations and the external payment processor.
///
/// Opens hosted sessions, applies their outcomes, and refunds captured
/// payments. Every processor call is bounded by `processor_timeout`.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    reservations: ReservationStoreRef,
    attempts: PaymentAttemptStoreRef,
    processor: PaymentProcessorRef,
    notifier: NotifierRef,
    processor_timeout: Duration,
    session_retry_backoff: Duration,
}

impl PaymentOrchestrator {
    pub fn new(
        config: &EngineConfig,
        reservations: ReservationStoreRef,
        attempts: PaymentAttemptStoreRef,
        processor: PaymentProcessorRef,
        notifier: NotifierRef,
    ) -> Self {
        Self {
            reservations,
            attempts,
            processor,
            notifier,
            processor_timeout: config.processor_timeout,
            session_retry_backoff: config.session_retry_backoff,
        }
    }

    /// Records a new pending attempt for the reservation's locked total and
    /// opens a hosted session for it.
    ///
    /// If the processor cannot be reached the attempt stays `pending` so it
    /// can be reconciled later.
    #[instrument(skip(self), fields(reservation = %reservation_id))]
    pub async fn open_session(
        &self,
        reservation_id: ReservationId,
        method: PaymentMethod,
    ) -> Result<PaymentSession> {
        let reservation = self.reservations.get(reservation_id).await?;
        if reservation.payment_status == PaymentStatus::Completed {
            return Err(BookingError::Conflict(format!(
                "reservation {} is already paid",
                reservation.reference
            )));
        }
        if reservation.status != ReservationStatus::Pending {
            return Err(BookingError::Conflict(format!(
                "reservation {} is {}, only pending reservations can be paid",
                reservation.reference, reservation.status
            )));
        }

        let attempt = PaymentAttempt::new(
            reservation.id,
            method,
            reservation.price.total,
            reservation.price.currency.clone(),
            Utc::now(),
        );
        self.attempts.insert(attempt.clone()).await?;
        self.reservations
            .record_attempt(reservation.id, attempt.id)
            .await?;

        let request = SessionRequest {
            attempt_id: attempt.id,
            reservation_reference: reservation.reference.clone(),
            method,
            amount: attempt.amount,
            currency: attempt.currency.clone(),
        };
        let session = match self.request_session(request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    attempt = %attempt.id,
                    error = %e,
                    "payment session not opened, attempt left pending"
                );
                return Err(e);
            }
        };

        self.attempts
            .update(
                attempt.id,
                AttemptChange::SessionOpened {
                    session_ref: session.session_ref.clone(),
                },
            )
            .await?;
        info!(
            reference = %reservation.reference,
            attempt = %attempt.id,
            session = %session.session_ref,
            amount = %attempt.amount,
            "payment session opened"
        );

        Ok(PaymentSession {
            attempt_id: attempt.id,
            session_ref: session.session_ref,
            redirect_url: session.redirect_url,
            amount: attempt.amount,
            currency: attempt.currency,
        })
    }

    /// Applies a successful checkout. Safe to call repeatedly for the same session.
    #[instrument(skip(self, card))]
    pub async fn apply_completion(
        &self,
        session_ref: &str,
        transaction_ref: &str,
        card: Option<CardSummary>,
    ) -> Result<Reservation> {
        let attempt = self.attempts.find_by_session(session_ref).await?;
        let attempt = match attempt.status {
            AttemptStatus::Completed => attempt,
            AttemptStatus::Refunded => return self.reservations.get(attempt.reservation_id).await,
            AttemptStatus::Pending | AttemptStatus::Failed => {
                let change = AttemptChange::Completed {
                    transaction_ref: transaction_ref.to_string(),
                    card,
                };
                match self.attempts.update(attempt.id, change).await {
                    Ok(completed) => completed,
                    Err(e) if e.is_conflict() => {
                        let current = self.attempts.get(attempt.id).await?;
                        if current.status != AttemptStatus::Completed {
                            error!(
                                attempt = %attempt.id,
                                error = %e,
                                "payment captured but not recorded, needs manual review"
                            );
                            return Err(e);
                        }
                        current
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        self.confirm_reservation(&attempt).await
    }

    /// Moves the reservation of a completed attempt to `confirmed`.
    ///
    /// Also finishes the job when an earlier completion stopped between
    /// recording the attempt and updating the reservation.
    async fn confirm_reservation(&self, attempt: &PaymentAttempt) -> Result<Reservation> {
        let reservation = self.reservations.get(attempt.reservation_id).await?;
        if matches!(
            reservation.payment_status,
            PaymentStatus::Completed | PaymentStatus::Refunded
        ) {
            return Ok(reservation);
        }

        match self
            .reservations
            .transition(
                reservation.id,
                &[ReservationStatus::Pending],
                ReservationStatus::Confirmed,
                Some(PaymentStatus::Completed),
            )
            .await
        {
            Ok(confirmed) => {
                info!(
                    reference = %confirmed.reference,
                    attempt = %attempt.id,
                    "reservation confirmed"
                );
                notifications::dispatch(&self.notifier, NotificationKind::Confirmed, &confirmed);
                Ok(confirmed)
            }
            Err(e) if e.is_conflict() => {
                // Funds moved even though the reservation left `pending` first.
                warn!(
                    reference = %reservation.reference,
                    error = %e,
                    "payment completed for a reservation that is no longer pending"
                );
                match self
                    .reservations
                    .set_payment_status(
                        reservation.id,
                        &[PaymentStatus::Pending, PaymentStatus::Failed],
                        PaymentStatus::Completed,
                    )
                    .await
                {
                    Ok(updated) => Ok(updated),
                    Err(e) if e.is_conflict() => self.reservations.get(reservation.id).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Records a declined or abandoned checkout. The reservation stays
    /// `pending` so the requester can try again.
    #[instrument(skip(self))]
    pub async fn apply_failure(&self, session_ref: &str, reason: &str) -> Result<PaymentAttempt> {
        let attempt = self.attempts.find_by_session(session_ref).await?;
        match attempt.status {
            AttemptStatus::Failed => return Ok(attempt),
            AttemptStatus::Completed | AttemptStatus::Refunded => {
                return Err(BookingError::Conflict(format!(
                    "payment attempt {} is already {}",
                    attempt.id, attempt.status
                )));
            }
            AttemptStatus::Pending => {}
        }

        let change = AttemptChange::Failed {
            reason: reason.to_string(),
        };
        let failed = match self.attempts.update(attempt.id, change).await {
            Ok(failed) => failed,
            Err(e) if e.is_conflict() => {
                let current = self.attempts.get(attempt.id).await?;
                if current.status == AttemptStatus::Failed {
                    return Ok(current);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        match self
            .reservations
            .set_payment_status(
                failed.reservation_id,
                &[PaymentStatus::Pending, PaymentStatus::Failed],
                PaymentStatus::Failed,
            )
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                warn!(attempt = %failed.id, error = %e, "reservation payment already settled");
            }
            Err(e) => return Err(e),
        }
        info!(attempt = %failed.id, reason = %reason, "payment attempt failed");
        Ok(failed)
    }

    /// Returns the captured funds of a paid reservation.
    ///
    /// The captured attempt is claimed before the processor is called, so
    /// only one caller can ever send its refund. A claim that is already
    /// taken is reported as `BookingError::Conflict`. Never retried: any
    /// processor error or timeout releases the claim and is reported as
    /// `BookingError::Refund` with no state changed.
    #[instrument(skip(self), fields(reservation = %reservation_id))]
    pub async fn refund(&self, reservation_id: ReservationId) -> Result<Reservation> {
        let reservation = self.reservations.get(reservation_id).await?;
        if reservation.payment_status != PaymentStatus::Completed {
            return Err(BookingError::Conflict(format!(
                "reservation {} has no completed payment to refund (payment is {})",
                reservation.reference, reservation.payment_status
            )));
        }

        let attempts = self.attempts.list_for_reservation(reservation_id).await?;
        let captured = match attempts
            .iter()
            .find(|a| a.status == AttemptStatus::Completed)
        {
            Some(captured) => captured.clone(),
            None if attempts.iter().any(|a| a.status == AttemptStatus::Refunded) => {
                return Err(BookingError::Conflict(format!(
                    "payment of {} was already refunded",
                    reservation.reference
                )));
            }
            None => {
                return Err(BookingError::Refund(format!(
                    "no completed payment attempt found for {}",
                    reservation.reference
                )));
            }
        };
        let transaction_ref = captured.transaction_ref.clone().ok_or_else(|| {
            BookingError::Refund(format!(
                "payment attempt {} has no transaction reference",
                captured.id
            ))
        })?;

        self.attempts
            .update(captured.id, AttemptChange::RefundClaimed)
            .await?;

        if let Err(e) = self.request_refund(&transaction_ref).await {
            error!(reference = %reservation.reference, error = %e, "refund not issued");
            self.release_refund(captured.id).await;
            return Err(e);
        }

        self.attempts
            .update(captured.id, AttemptChange::Refunded)
            .await?;
        let refunded = self
            .reservations
            .set_payment_status(
                reservation_id,
                &[PaymentStatus::Completed],
                PaymentStatus::Refunded,
            )
            .await?;
        info!(
            reference = %refunded.reference,
            transaction = %transaction_ref,
            amount = %captured.amount,
            "payment refunded"
        );
        Ok(refunded)
    }

    /// Sends one refund request. Errors, declines and timeouts all become `BookingError::Refund`.
    async fn request_refund(&self, transaction_ref: &str) -> Result<()> {
        let outcome = match timeout(self.processor_timeout, self.processor.refund(transaction_ref))
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(BookingError::Refund(e.to_string())),
            Err(_) => {
                return Err(BookingError::Refund(format!(
                    "processor did not answer within {:?}",
                    self.processor_timeout
                )));
            }
        };
        if outcome.ok {
            return Ok(());
        }
        Err(BookingError::Refund(outcome.message.unwrap_or_else(|| {
            "processor declined the refund".to_string()
        })))
    }

    async fn release_refund(&self, attempt_id: AttemptId) {
        if let Err(e) = self
            .attempts
            .update(attempt_id, AttemptChange::RefundReleased)
            .await
        {
            error!(
                attempt = %attempt_id,
                error = %e,
                "refund claim not released, needs manual review"
            );
        }
    }

    /// Asks the processor how a session ended and applies a successful outcome.
    ///
    /// Used when the customer returns from checkout before the callback arrives.
    #[instrument(skip(self))]
    pub async fn sync_session(&self, session_ref: &str) -> Result<Reservation> {
        let attempt = self.attempts.find_by_session(session_ref).await?;
        let outcome = match timeout(
            self.processor_timeout,
            self.processor.retrieve_session(session_ref),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(BookingError::Processor(format!(
                    "session lookup timed out after {:?}",
                    self.processor_timeout
                )));
            }
        };

        if !outcome.paid {
            return self.reservations.get(attempt.reservation_id).await;
        }
        let transaction_ref = outcome.transaction_ref.ok_or_else(|| {
            BookingError::Processor(format!(
                "session {} is paid but has no transaction reference",
                session_ref
            ))
        })?;
        self.apply_completion(session_ref, &transaction_ref, outcome.card)
            .await
    }

    pub async fn attempts_for(&self, reservation_id: ReservationId) -> Result<Vec<PaymentAttempt>> {
        self.attempts.list_for_reservation(reservation_id).await
    }

    /// Opens a hosted session, retrying once after a backoff if the first call times out.
    async fn request_session(&self, request: SessionRequest) -> Result<HostedSession> {
        let mut retried = false;
        loop {
            match timeout(
                self.processor_timeout,
                self.processor.open_hosted_session(request.clone()),
            )
            .await
            {
                Ok(result) => return result,
                Err(_) if !retried => {
                    warn!(
                        attempt = %request.attempt_id,
                        "payment session request timed out, retrying"
                    );
                    retried = true;
                    tokio::time::sleep(self.session_retry_backoff).await;
                }
                Err(_) => {
                    return Err(BookingError::Processor(format!(
                        "session request timed out twice after {:?}",
                        self.processor_timeout
                    )));
                }
            }
        }
    }
}
