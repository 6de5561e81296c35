use crate::domain::calendar::{DateRange, blocking_ranges};
use crate::domain::identity::RequesterIdentity;
use crate::domain::item::BookableItemRef;
use crate::domain::payment::{AttemptChange, AttemptId, PaymentAttempt};
use crate::domain::ports::{PaymentAttemptStore, ReservationStore};
use crate::domain::reservation::{
    NewReservation, PaymentStatus, Reservation, ReservationId, ReservationStatus,
    generate_reference,
};
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Reservation rows keyed by id.
pub const CF_RESERVATIONS: &str = "reservations";
/// Reference code to reservation id.
pub const CF_REFERENCES: &str = "references";
/// `<item key>/<reservation id>` to the date range, for blocking reservations only.
pub const CF_ITEM_CALENDARS: &str = "item_calendars";
/// Payment attempt rows keyed by id.
pub const CF_ATTEMPTS: &str = "attempts";
/// Processor session reference to attempt id.
pub const CF_SESSIONS: &str = "sessions";
/// Reservation id to the attempt that captured its payment.
pub const CF_CAPTURES: &str = "captures";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_RESERVATIONS,
    CF_REFERENCES,
    CF_ITEM_CALENDARS,
    CF_ATTEMPTS,
    CF_SESSIONS,
    CF_CAPTURES,
];

/// A persistent store for reservations and payment attempts backed by RocksDB.
///
/// Every mutation reads, validates and writes while holding `write_lock`,
/// and commits its keys in a single `WriteBatch`. RocksDB locks the data
/// directory, so the lock covers every writer of the database.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a database at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| BookingError::storage(format!("column family '{}' not found", name)))
    }

    fn read_json<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_id(&self, cf: &str, key: &[u8]) -> Result<Option<Uuid>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Uuid::from_slice(&bytes)
                .map(Some)
                .map_err(|e| BookingError::Storage(Box::new(e))),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Decoded values of every key in `cf` starting with `prefix`.
    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        let mut values = Vec::new();
        for entry in iter {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn reservation_row(&self, id: ReservationId) -> Result<Reservation> {
        self.read_json(CF_RESERVATIONS, id.0.as_bytes())?
            .ok_or_else(|| BookingError::NotFound(format!("reservation {}", id)))
    }

    fn attempt_row(&self, id: AttemptId) -> Result<PaymentAttempt> {
        self.read_json(CF_ATTEMPTS, id.0.as_bytes())?
            .ok_or_else(|| BookingError::NotFound(format!("payment attempt {}", id)))
    }

    fn blocking(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<DateRange>> {
        let entries: Vec<CalendarEntry> =
            self.scan(CF_ITEM_CALENDARS, calendar_prefix(item).as_bytes())?;
        Ok(blocking_ranges(
            entries
                .iter()
                // Item ids may contain '/', so the prefix can match longer ids.
                .filter(|entry| &entry.item == item)
                .filter(|entry| Some(entry.reservation) != exclude)
                .map(|entry| &entry.range),
            range,
        ))
    }

    fn fresh_reference(&self) -> Result<String> {
        let mut rng = rand::thread_rng();
        loop {
            let reference = generate_reference(Utc::now(), &mut rng);
            if self.read_id(CF_REFERENCES, reference.as_bytes())?.is_none() {
                return Ok(reference);
            }
        }
    }

    /// Writes the row and keeps the item calendar in step with its status.
    fn put_reservation(&self, batch: &mut WriteBatch, reservation: &Reservation) -> Result<()> {
        self.put_json(
            batch,
            CF_RESERVATIONS,
            reservation.id.0.as_bytes(),
            reservation,
        )?;
        let key = calendar_key(&reservation.item, reservation.id);
        if reservation.blocks_dates() {
            self.put_json(
                batch,
                CF_ITEM_CALENDARS,
                key.as_bytes(),
                &CalendarEntry {
                    item: reservation.item.clone(),
                    reservation: reservation.id,
                    range: reservation.range,
                },
            )?;
        } else {
            batch.delete_cf(self.cf(CF_ITEM_CALENDARS)?, key.as_bytes());
        }
        Ok(())
    }

    fn update_reservation<F>(&self, id: ReservationId, change: F) -> Result<Reservation>
    where
        F: FnOnce(&mut Reservation) -> Result<()>,
    {
        let mut updated = self.reservation_row(id)?;
        change(&mut updated)?;
        let mut batch = WriteBatch::default();
        self.put_reservation(&mut batch, &updated)?;
        self.db.write(batch)?;
        Ok(updated)
    }
}

#[derive(Serialize, Deserialize)]
struct CalendarEntry {
    item: BookableItemRef,
    reservation: ReservationId,
    range: DateRange,
}

fn calendar_prefix(item: &BookableItemRef) -> String {
    format!("{}/", item.key())
}

fn calendar_key(item: &BookableItemRef, id: ReservationId) -> String {
    format!("{}{}", calendar_prefix(item), id)
}

#[async_trait]
impl ReservationStore for RocksDBStore {
    async fn create(&self, candidate: NewReservation) -> Result<Reservation> {
        let _guard = self.write_lock.lock().await;

        if !candidate.draft {
            let blocking = self.blocking(&candidate.item, &candidate.range, None)?;
            if !blocking.is_empty() {
                return Err(BookingError::Overlap { blocking });
            }
        }

        let reference = self.fresh_reference()?;
        let reservation = Reservation::from_candidate(candidate, reference, Utc::now());

        let mut batch = WriteBatch::default();
        self.put_reservation(&mut batch, &reservation)?;
        batch.put_cf(
            self.cf(CF_REFERENCES)?,
            reservation.reference.as_bytes(),
            reservation.id.0.as_bytes(),
        );
        self.db.write(batch)?;
        Ok(reservation)
    }

    async fn get(&self, id: ReservationId) -> Result<Reservation> {
        self.reservation_row(id)
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Reservation> {
        let id = self
            .read_id(CF_REFERENCES, reference.as_bytes())?
            .ok_or_else(|| BookingError::NotFound(format!("reservation {}", reference)))?;
        self.reservation_row(ReservationId(id))
    }

    async fn transition(
        &self,
        id: ReservationId,
        from: &[ReservationStatus],
        to: ReservationStatus,
        payment: Option<PaymentStatus>,
    ) -> Result<Reservation> {
        let _guard = self.write_lock.lock().await;
        let current = self.reservation_row(id)?;
        let starts_blocking = to.blocks_dates() && !current.blocks_dates();
        let (item, range) = (current.item.clone(), current.range);

        self.update_reservation(id, |r| {
            r.apply_transition(from, to, payment, Utc::now())?;
            if starts_blocking {
                let blocking = self.blocking(&item, &range, Some(id))?;
                if !blocking.is_empty() {
                    return Err(BookingError::Overlap { blocking });
                }
            }
            Ok(())
        })
    }

    async fn set_payment_status(
        &self,
        id: ReservationId,
        from: &[PaymentStatus],
        to: PaymentStatus,
    ) -> Result<Reservation> {
        let _guard = self.write_lock.lock().await;
        self.update_reservation(id, |r| r.apply_payment_status(from, to, Utc::now()))
    }

    async fn record_attempt(&self, id: ReservationId, attempt: AttemptId) -> Result<Reservation> {
        let _guard = self.write_lock.lock().await;
        self.update_reservation(id, |r| {
            r.record_attempt(attempt, Utc::now());
            Ok(())
        })
    }

    async fn list_for_requester(&self, requester: &RequesterIdentity) -> Result<Vec<Reservation>> {
        let mut reservations: Vec<Reservation> = self
            .scan::<Reservation>(CF_RESERVATIONS, &[])?
            .into_iter()
            .filter(|r| r.requester.same_requester(requester))
            .collect();
        reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reservations)
    }

    async fn find_overlapping(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<DateRange>> {
        self.blocking(item, range, exclude)
    }
}

#[async_trait]
impl PaymentAttemptStore for RocksDBStore {
    async fn insert(&self, attempt: PaymentAttempt) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self
            .read_json::<PaymentAttempt>(CF_ATTEMPTS, attempt.id.0.as_bytes())?
            .is_some()
        {
            return Err(BookingError::Conflict(format!(
                "payment attempt {} already exists",
                attempt.id
            )));
        }

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ATTEMPTS, attempt.id.0.as_bytes(), &attempt)?;
        if let Some(session_ref) = &attempt.session_ref {
            batch.put_cf(
                self.cf(CF_SESSIONS)?,
                session_ref.as_bytes(),
                attempt.id.0.as_bytes(),
            );
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: AttemptId) -> Result<PaymentAttempt> {
        self.attempt_row(id)
    }

    async fn find_by_session(&self, session_ref: &str) -> Result<PaymentAttempt> {
        let id = self
            .read_id(CF_SESSIONS, session_ref.as_bytes())?
            .ok_or_else(|| BookingError::NotFound(format!("payment session {}", session_ref)))?;
        self.attempt_row(AttemptId(id))
    }

    async fn list_for_reservation(
        &self,
        reservation: ReservationId,
    ) -> Result<Vec<PaymentAttempt>> {
        let mut attempts: Vec<PaymentAttempt> = self
            .scan::<PaymentAttempt>(CF_ATTEMPTS, &[])?
            .into_iter()
            .filter(|a| a.reservation_id == reservation)
            .collect();
        // Order of record on the reservation; attempts not yet recorded go last.
        let recorded = self
            .read_json::<Reservation>(CF_RESERVATIONS, reservation.0.as_bytes())?
            .map(|row| row.payment_attempts)
            .unwrap_or_default();
        attempts.sort_by_key(|a| {
            let position = recorded
                .iter()
                .position(|id| *id == a.id)
                .unwrap_or(recorded.len());
            (position, a.created_at)
        });
        Ok(attempts)
    }

    async fn update(&self, id: AttemptId, change: AttemptChange) -> Result<PaymentAttempt> {
        let _guard = self.write_lock.lock().await;
        let mut updated = self.attempt_row(id)?;
        let captures = matches!(change, AttemptChange::Completed { .. });

        let reservation_key = updated.reservation_id.0.as_bytes().to_vec();
        if captures
            && let Some(other) = self.read_id(CF_CAPTURES, &reservation_key)?
            && other != id.0
        {
            return Err(BookingError::Conflict(format!(
                "reservation {} was already paid by attempt {}",
                updated.reservation_id, other
            )));
        }

        updated.apply(change, Utc::now())?;

        let mut batch = WriteBatch::default();
        self.put_json(&mut batch, CF_ATTEMPTS, id.0.as_bytes(), &updated)?;
        if let Some(session_ref) = &updated.session_ref {
            batch.put_cf(self.cf(CF_SESSIONS)?, session_ref.as_bytes(), id.0.as_bytes());
        }
        if captures {
            batch.put_cf(self.cf(CF_CAPTURES)?, &reservation_key, id.0.as_bytes());
        }
        self.db.write(batch)?;
        Ok(updated)
    }
}
