//! Local stand-ins for the payment processor and the notifier.
//!
//! The sandbox processor behaves like a hosted-checkout provider without
//! talking to one: sessions are opened immediately, marked paid on demand,
//! and refunds succeed unless told otherwise. Delays and declines can be
//! injected to exercise timeout handling.

use crate::domain::identity::RequesterIdentity;
use crate::domain::payment::CardSummary;
use crate::domain::ports::{
    HostedSession, NotificationKind, Notifier, PaymentProcessor, RefundOutcome, SessionOutcome,
    SessionRequest,
};
use crate::domain::reservation::Reservation;
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

const CHECKOUT_BASE_URL: &str = "https://checkout.sandbox.local/pay";

#[derive(Debug, Clone)]
struct SandboxSession {
    request: SessionRequest,
    paid: Option<(String, Option<CardSummary>)>,
}

#[derive(Default)]
struct Faults {
    session_delay: RwLock<Option<Duration>>,
    refund_delay: RwLock<Option<Duration>>,
    decline_refunds: AtomicBool,
}

#[derive(Default, Clone)]
pub struct SandboxProcessor {
    sessions: Arc<RwLock<HashMap<String, SandboxSession>>>,
    refunded: Arc<RwLock<Vec<String>>>,
    counter: Arc<AtomicU64>,
    session_calls: Arc<AtomicU64>,
    refund_calls: Arc<AtomicU64>,
    faults: Arc<Faults>,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the customer finishing checkout. Returns the transaction reference.
    pub async fn mark_paid(&self, session_ref: &str, card: Option<CardSummary>) -> Result<String> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_ref)
            .ok_or_else(|| BookingError::NotFound(format!("payment session {}", session_ref)))?;
        let transaction_ref = format!("txn_{}", session_ref.trim_start_matches("cs_"));
        session.paid = Some((transaction_ref.clone(), card));
        Ok(transaction_ref)
    }

    /// Delays every session request, e.g. beyond the engine's timeout.
    pub async fn delay_sessions(&self, delay: Option<Duration>) {
        *self.faults.session_delay.write().await = delay;
    }

    pub async fn delay_refunds(&self, delay: Option<Duration>) {
        *self.faults.refund_delay.write().await = delay;
    }

    pub fn decline_refunds(&self, decline: bool) {
        self.faults.decline_refunds.store(decline, Ordering::SeqCst);
    }

    /// The request the session was opened with.
    pub async fn session_request(&self, session_ref: &str) -> Option<SessionRequest> {
        let sessions = self.sessions.read().await;
        sessions.get(session_ref).map(|s| s.request.clone())
    }

    pub async fn refunded_transactions(&self) -> Vec<String> {
        self.refunded.read().await.clone()
    }

    pub fn session_calls(&self) -> u64 {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> u64 {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn open_hosted_session(&self, request: SessionRequest) -> Result<HostedSession> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.faults.session_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let session_ref = format!("cs_sandbox_{:06}", n);
        let redirect_url = format!("{}/{}", CHECKOUT_BASE_URL, session_ref);

        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session_ref.clone(),
            SandboxSession {
                request,
                paid: None,
            },
        );
        Ok(HostedSession {
            session_ref,
            redirect_url,
        })
    }

    async fn retrieve_session(&self, session_ref: &str) -> Result<SessionOutcome> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_ref)
            .ok_or_else(|| BookingError::Processor(format!("unknown session {}", session_ref)))?;
        Ok(match &session.paid {
            Some((transaction_ref, card)) => SessionOutcome {
                paid: true,
                transaction_ref: Some(transaction_ref.clone()),
                card: card.clone(),
            },
            None => SessionOutcome {
                paid: false,
                transaction_ref: None,
                card: None,
            },
        })
    }

    async fn refund(&self, transaction_ref: &str) -> Result<RefundOutcome> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.faults.refund_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.faults.decline_refunds.load(Ordering::SeqCst) {
            return Ok(RefundOutcome {
                ok: false,
                message: Some("refund declined by issuer".to_string()),
            });
        }

        self.refunded.write().await.push(transaction_ref.to_string());
        Ok(RefundOutcome {
            ok: true,
            message: None,
        })
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipient: &RequesterIdentity,
        kind: NotificationKind,
        reservation: &Reservation,
    ) -> Result<()> {
        tracing::info!(
            recipient = %recipient,
            kind = ?kind,
            reference = %reservation.reference,
            status = %reservation.status,
            "notification sent"
        );
        Ok(())
    }
}
