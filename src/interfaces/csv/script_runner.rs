use super::command_reader::{CommandKind, CommandRecord};
use super::outcome_writer::Outcome;
use crate::application::engine::{ReservationEngine, ReservationRequest};
use crate::domain::calendar::DateRange;
use crate::domain::identity::{Actor, RequesterIdentity};
use crate::domain::item::BookableItemRef;
use crate::domain::payment::{CardSummary, PaymentMethod};
use crate::domain::reservation::{Reservation, ReservationId};
use crate::error::{BookingError, Result};
use crate::infrastructure::sandbox::SandboxProcessor;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct Booking {
    id: ReservationId,
    session: Option<String>,
}

/// Replays command rows against an engine wired to a sandbox processor.
///
/// Failures of individual commands become `error` outcomes; nothing here
/// aborts the script.
pub struct ScriptRunner {
    engine: ReservationEngine,
    sandbox: SandboxProcessor,
    bookings: HashMap<String, Booking>,
}

impl ScriptRunner {
    /// `sandbox` must be the processor `engine` was built with.
    pub fn new(engine: ReservationEngine, sandbox: SandboxProcessor) -> Self {
        Self {
            engine,
            sandbox,
            bookings: HashMap::new(),
        }
    }

    pub async fn run(&mut self, record: CommandRecord) -> Outcome {
        let label = record.booking.clone().unwrap_or_default();
        let command = record.command.as_str();
        debug!(command, booking = %label, "replaying command");
        match self.execute(&label, &record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut outcome = Outcome::error(&label, command, e.to_string());
                if let Some(booking) = self.bookings.get(&label)
                    && let Ok(current) = self.engine.reservation(booking.id, &admin()).await
                {
                    describe(&mut outcome, &current);
                }
                outcome
            }
        }
    }

    async fn execute(&mut self, label: &str, record: &CommandRecord) -> Result<Outcome> {
        let command = record.command.as_str();
        let mut outcome = Outcome::ok(label, command);

        match record.command {
            CommandKind::Check => {
                let availability = self
                    .engine
                    .check_availability(&item(record)?, &record.range()?)
                    .await?;
                outcome.status = if availability.available {
                    "available".to_string()
                } else {
                    "unavailable".to_string()
                };
                outcome.detail = join_ranges(&availability.blocking_ranges);
            }
            CommandKind::Quote => {
                let price = self
                    .engine
                    .quote(
                        &item(record)?,
                        &record.range()?,
                        record.guests.unwrap_or(1),
                        &record.option_ids(),
                    )
                    .await?;
                outcome.total = Some(price.total);
                outcome.detail = format!(
                    "base {} options {} tax {} for {} unit(s)",
                    price.base_price, price.options_price, price.tax_amount, price.days
                );
            }
            CommandKind::Create | CommandKind::Draft => {
                if label.is_empty() {
                    return Err(BookingError::InvalidRequest(
                        "booking label is required".to_string(),
                    ));
                }
                if self.bookings.contains_key(label) {
                    return Err(BookingError::InvalidRequest(format!(
                        "booking label '{}' is already used",
                        label
                    )));
                }
                let request = ReservationRequest {
                    item: item(record)?,
                    range: record.range()?,
                    guests: record.guests.unwrap_or(1),
                    option_ids: record.option_ids(),
                    requester: record.actor()?.identity,
                    note: record.reason.clone(),
                    draft: record.command == CommandKind::Draft,
                };
                let reservation = self.engine.create_reservation(request).await?;
                self.bookings.insert(
                    label.to_string(),
                    Booking {
                        id: reservation.id,
                        session: None,
                    },
                );
                describe(&mut outcome, &reservation);
            }
            CommandKind::Submit => {
                let booking = self.booking(label)?;
                let reservation = self
                    .engine
                    .submit_draft(booking.id, &record.actor()?)
                    .await?;
                describe(&mut outcome, &reservation);
            }
            CommandKind::Pay => {
                let booking = self.booking(label)?;
                let method: PaymentMethod = record.method.as_deref().unwrap_or("card").parse()?;
                let session = self.engine.pay(booking.id, method).await?;
                if let Some(booking) = self.bookings.get_mut(label) {
                    booking.session = Some(session.session_ref.clone());
                }
                let reservation = self.engine.reservation(booking.id, &admin()).await?;
                describe(&mut outcome, &reservation);
                outcome.total = Some(session.amount);
                outcome.detail = session.redirect_url;
            }
            CommandKind::Complete => {
                let session = self.session(label)?;
                let card = CardSummary::masked("visa", "4242424242424242");
                let transaction_ref = self.sandbox.mark_paid(&session, Some(card.clone())).await?;
                let reservation = self
                    .engine
                    .apply_payment_completion(&session, &transaction_ref, Some(card))
                    .await?;
                describe(&mut outcome, &reservation);
                outcome.detail = transaction_ref;
            }
            CommandKind::Fail => {
                let session = self.session(label)?;
                let reason = record.reason.as_deref().unwrap_or("declined");
                let attempt = self.engine.apply_payment_failure(&session, reason).await?;
                let reservation = self
                    .engine
                    .reservation(attempt.reservation_id, &admin())
                    .await?;
                describe(&mut outcome, &reservation);
                outcome.detail = reason.to_string();
            }
            CommandKind::Cancel => {
                let booking = self.booking(label)?;
                let reservation = self.engine.cancel(booking.id, &record.actor()?).await?;
                describe(&mut outcome, &reservation);
            }
        }
        Ok(outcome)
    }

    fn booking(&self, label: &str) -> Result<Booking> {
        self.bookings
            .get(label)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("booking '{}'", label)))
    }

    fn session(&self, label: &str) -> Result<String> {
        self.booking(label)?.session.ok_or_else(|| {
            BookingError::InvalidRequest(format!("booking '{}' has no payment session", label))
        })
    }
}

fn item(record: &CommandRecord) -> Result<BookableItemRef> {
    record
        .item
        .as_deref()
        .ok_or_else(|| BookingError::InvalidRequest("item is required".to_string()))?
        .parse()
}

/// Reads back reservations regardless of who made them.
fn admin() -> Actor {
    Actor::admin(RequesterIdentity::user("script"))
}

fn describe(outcome: &mut Outcome, reservation: &Reservation) {
    outcome.reference = reservation.reference.clone();
    outcome.status = reservation.status.to_string();
    outcome.payment_status = reservation.payment_status.to_string();
    outcome.total = Some(reservation.price.total);
}

fn join_ranges(ranges: &[DateRange]) -> String {
    ranges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
