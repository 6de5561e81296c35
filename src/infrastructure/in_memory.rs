use crate::domain::calendar::{DateRange, blocking_ranges};
use crate::domain::identity::RequesterIdentity;
use crate::domain::item::{BookableItemRef, ItemSnapshot};
use crate::domain::payment::{AttemptChange, AttemptId, AttemptStatus, PaymentAttempt};
use crate::domain::ports::{Catalog, PaymentAttemptStore, ReservationStore};
use crate::domain::reservation::{
    NewReservation, PaymentStatus, Reservation, ReservationId, ReservationStatus,
    generate_reference,
};
use crate::error::{BookingError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory reservation store.
///
/// Every mutating call holds the table's write lock for its whole
/// check-and-write, which is what makes `create` and `transition` atomic.
#[derive(Default, Clone)]
pub struct InMemoryReservationStore {
    table: Arc<RwLock<ReservationTable>>,
}

#[derive(Default)]
struct ReservationTable {
    rows: HashMap<ReservationId, Reservation>,
    references: HashMap<String, ReservationId>,
    /// Insertion order, used for newest-first listings.
    order: Vec<ReservationId>,
}

impl ReservationTable {
    fn row(&self, id: ReservationId) -> Result<&Reservation> {
        self.rows
            .get(&id)
            .ok_or_else(|| BookingError::NotFound(format!("reservation {}", id)))
    }

    fn blocking(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
    ) -> Vec<DateRange> {
        blocking_ranges(
            self.rows
                .values()
                .filter(|r| r.item == *item && r.blocks_dates() && Some(r.id) != exclude)
                .map(|r| &r.range),
            range,
        )
    }

    fn fresh_reference(&self, now: DateTime<Utc>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let reference = generate_reference(now, &mut rng);
            if !self.references.contains_key(&reference) {
                return reference;
            }
        }
    }

    fn update<F>(&mut self, id: ReservationId, change: F) -> Result<Reservation>
    where
        F: FnOnce(&mut Reservation) -> Result<()>,
    {
        let mut updated = self.row(id)?.clone();
        change(&mut updated)?;
        self.rows.insert(id, updated.clone());
        Ok(updated)
    }
}

impl InMemoryReservationStore {
    /// Creates a new, empty in-memory reservation store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn create(&self, candidate: NewReservation) -> Result<Reservation> {
        let mut table = self.table.write().await;

        if !candidate.draft {
            let blocking = table.blocking(&candidate.item, &candidate.range, None);
            if !blocking.is_empty() {
                return Err(BookingError::Overlap { blocking });
            }
        }

        let now = Utc::now();
        let reference = table.fresh_reference(now);
        let reservation = Reservation::from_candidate(candidate, reference, now);

        table
            .references
            .insert(reservation.reference.clone(), reservation.id);
        table.order.push(reservation.id);
        table.rows.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn get(&self, id: ReservationId) -> Result<Reservation> {
        let table = self.table.read().await;
        table.row(id).cloned()
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Reservation> {
        let table = self.table.read().await;
        let id = table
            .references
            .get(reference)
            .copied()
            .ok_or_else(|| BookingError::NotFound(format!("reservation {}", reference)))?;
        table.row(id).cloned()
    }

    async fn transition(
        &self,
        id: ReservationId,
        from: &[ReservationStatus],
        to: ReservationStatus,
        payment: Option<PaymentStatus>,
    ) -> Result<Reservation> {
        let mut table = self.table.write().await;

        let current = table.row(id)?;
        let starts_blocking = to.blocks_dates() && !current.blocks_dates();
        let (item, range) = (current.item.clone(), current.range);

        let mut updated = current.clone();
        updated.apply_transition(from, to, payment, Utc::now())?;

        if starts_blocking {
            let blocking = table.blocking(&item, &range, Some(id));
            if !blocking.is_empty() {
                return Err(BookingError::Overlap { blocking });
            }
        }

        table.rows.insert(id, updated.clone());
        Ok(updated)
    }

    async fn set_payment_status(
        &self,
        id: ReservationId,
        from: &[PaymentStatus],
        to: PaymentStatus,
    ) -> Result<Reservation> {
        let mut table = self.table.write().await;
        table.update(id, |r| r.apply_payment_status(from, to, Utc::now()))
    }

    async fn record_attempt(&self, id: ReservationId, attempt: AttemptId) -> Result<Reservation> {
        let mut table = self.table.write().await;
        table.update(id, |r| {
            r.record_attempt(attempt, Utc::now());
            Ok(())
        })
    }

    async fn list_for_requester(&self, requester: &RequesterIdentity) -> Result<Vec<Reservation>> {
        let table = self.table.read().await;
        Ok(table
            .order
            .iter()
            .rev()
            .filter_map(|id| table.rows.get(id))
            .filter(|r| r.requester.same_requester(requester))
            .cloned()
            .collect())
    }

    async fn find_overlapping(
        &self,
        item: &BookableItemRef,
        range: &DateRange,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<DateRange>> {
        let table = self.table.read().await;
        Ok(table.blocking(item, range, exclude))
    }
}

/// A thread-safe in-memory store for payment attempts.
#[derive(Default, Clone)]
pub struct InMemoryPaymentAttemptStore {
    table: Arc<RwLock<AttemptTable>>,
}

#[derive(Default)]
struct AttemptTable {
    rows: HashMap<AttemptId, PaymentAttempt>,
    sessions: HashMap<String, AttemptId>,
    by_reservation: HashMap<ReservationId, Vec<AttemptId>>,
}

impl AttemptTable {
    fn row(&self, id: AttemptId) -> Result<&PaymentAttempt> {
        self.rows
            .get(&id)
            .ok_or_else(|| BookingError::NotFound(format!("payment attempt {}", id)))
    }

    fn captured_by_other(&self, attempt: &PaymentAttempt) -> Option<AttemptId> {
        self.by_reservation
            .get(&attempt.reservation_id)?
            .iter()
            .filter(|id| **id != attempt.id)
            .filter_map(|id| self.rows.get(id))
            .find(|other| {
                matches!(
                    other.status,
                    AttemptStatus::Completed | AttemptStatus::Refunded
                )
            })
            .map(|other| other.id)
    }
}

impl InMemoryPaymentAttemptStore {
    /// Creates a new, empty in-memory attempt store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentAttemptStore for InMemoryPaymentAttemptStore {
    async fn insert(&self, attempt: PaymentAttempt) -> Result<()> {
        let mut table = self.table.write().await;
        if table.rows.contains_key(&attempt.id) {
            return Err(BookingError::Conflict(format!(
                "payment attempt {} already exists",
                attempt.id
            )));
        }
        table
            .by_reservation
            .entry(attempt.reservation_id)
            .or_default()
            .push(attempt.id);
        if let Some(session_ref) = &attempt.session_ref {
            table.sessions.insert(session_ref.clone(), attempt.id);
        }
        table.rows.insert(attempt.id, attempt);
        Ok(())
    }

    async fn get(&self, id: AttemptId) -> Result<PaymentAttempt> {
        let table = self.table.read().await;
        table.row(id).cloned()
    }

    async fn find_by_session(&self, session_ref: &str) -> Result<PaymentAttempt> {
        let table = self.table.read().await;
        let id = table
            .sessions
            .get(session_ref)
            .copied()
            .ok_or_else(|| BookingError::NotFound(format!("payment session {}", session_ref)))?;
        table.row(id).cloned()
    }

    async fn list_for_reservation(
        &self,
        reservation: ReservationId,
    ) -> Result<Vec<PaymentAttempt>> {
        let table = self.table.read().await;
        Ok(table
            .by_reservation
            .get(&reservation)
            .map(|ids| ids.iter().filter_map(|id| table.rows.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn update(&self, id: AttemptId, change: AttemptChange) -> Result<PaymentAttempt> {
        let mut table = self.table.write().await;
        let mut updated = table.row(id)?.clone();

        if matches!(change, AttemptChange::Completed { .. })
            && let Some(other) = table.captured_by_other(&updated)
        {
            return Err(BookingError::Conflict(format!(
                "reservation {} was already paid by attempt {}",
                updated.reservation_id, other
            )));
        }

        updated.apply(change, Utc::now())?;
        if let Some(session_ref) = &updated.session_ref {
            table.sessions.insert(session_ref.clone(), id);
        }
        table.rows.insert(id, updated.clone());
        Ok(updated)
    }
}

/// Listing snapshots held in memory, typically loaded from a JSON file.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    items: Arc<RwLock<HashMap<BookableItemRef, ItemSnapshot>>>,
}

impl InMemoryCatalog {
    pub fn with_items(items: impl IntoIterator<Item = ItemSnapshot>) -> Self {
        let items = items
            .into_iter()
            .map(|snapshot| (snapshot.item.clone(), snapshot))
            .collect();
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    /// Reads a JSON array of item snapshots.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        let items: Vec<ItemSnapshot> = serde_json::from_reader(reader)
            .map_err(|e| BookingError::InvalidRequest(format!("invalid catalog: {}", e)))?;
        Ok(Self::with_items(items))
    }

    /// Inserts or replaces a listing, e.g. after a price change.
    pub async fn upsert(&self, snapshot: ItemSnapshot) {
        let mut items = self.items.write().await;
        items.insert(snapshot.item.clone(), snapshot);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn pricing_snapshot(&self, item: &BookableItemRef) -> Result<ItemSnapshot> {
        let items = self.items.read().await;
        items
            .get(item)
            .filter(|snapshot| snapshot.published)
            .cloned()
            .ok_or_else(|| BookingError::NotFound(format!("item {}", item)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::{ItemType, PriceUnit};
    use crate::domain::payment::PaymentMethod;
    use crate::domain::pricing::PriceBreakdown;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 7, start).unwrap(),
            NaiveDate::from_ymd_opt(2024, 7, end).unwrap(),
        )
        .unwrap()
    }

    fn candidate(item: &str, range: DateRange, draft: bool) -> NewReservation {
        NewReservation {
            item: BookableItemRef::new(ItemType::Property, item),
            range,
            guests: 2,
            requester: RequesterIdentity::user("u1"),
            note: None,
            price: PriceBreakdown {
                base_price: dec!(100),
                options_price: dec!(0),
                tax_amount: dec!(20),
                discount: dec!(0),
                total: dec!(120),
                currency: "THB".to_string(),
                days: range.days(),
                options: vec![],
            },
            draft,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_overlap() {
        let store = InMemoryReservationStore::new();
        let first = store.create(candidate("42", range(10, 15), false)).await.unwrap();
        assert_eq!(first.status, ReservationStatus::Pending);

        let err = store
            .create(candidate("42", range(12, 20), false))
            .await
            .unwrap_err();
        assert_eq!(err.blocking_ranges(), &[range(10, 15)]);

        // Other items and adjacent ranges are unaffected.
        assert!(store.create(candidate("43", range(12, 20), false)).await.is_ok());
        assert!(store.create(candidate("42", range(15, 20), false)).await.is_ok());
    }

    #[tokio::test]
    async fn test_drafts_do_not_block_and_are_checked_on_submit() {
        let store = InMemoryReservationStore::new();
        let draft = store.create(candidate("42", range(10, 15), true)).await.unwrap();
        assert_eq!(draft.status, ReservationStatus::Draft);

        let pending = store.create(candidate("42", range(12, 14), false)).await.unwrap();

        let err = store
            .transition(
                draft.id,
                &[ReservationStatus::Draft],
                ReservationStatus::Pending,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Overlap { .. }));
        assert_eq!(store.get(draft.id).await.unwrap().status, ReservationStatus::Draft);

        store
            .transition(
                pending.id,
                &[ReservationStatus::Pending],
                ReservationStatus::Canceled,
                None,
            )
            .await
            .unwrap();
        let submitted = store
            .transition(
                draft.id,
                &[ReservationStatus::Draft],
                ReservationStatus::Pending,
                None,
            )
            .await
            .unwrap();
        assert_eq!(submitted.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn test_canceled_reservations_free_dates() {
        let store = InMemoryReservationStore::new();
        let r = store.create(candidate("42", range(10, 15), false)).await.unwrap();
        store
            .transition(
                r.id,
                &ReservationStatus::CANCELABLE,
                ReservationStatus::Canceled,
                None,
            )
            .await
            .unwrap();
        let free = store
            .find_overlapping(&r.item, &range(10, 15), None)
            .await
            .unwrap();
        assert!(free.is_empty());
    }

    #[tokio::test]
    async fn test_find_overlapping_excludes_own_id() {
        let store = InMemoryReservationStore::new();
        let r = store.create(candidate("42", range(10, 15), false)).await.unwrap();
        let blocking = store
            .find_overlapping(&r.item, &r.range, Some(r.id))
            .await
            .unwrap();
        assert!(blocking.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_and_listing() {
        let store = InMemoryReservationStore::new();
        let a = store.create(candidate("1", range(1, 2), false)).await.unwrap();
        let b = store.create(candidate("2", range(1, 2), false)).await.unwrap();

        assert_eq!(store.find_by_reference(&a.reference).await.unwrap().id, a.id);
        assert!(matches!(
            store.get(ReservationId::new()).await,
            Err(BookingError::NotFound(_))
        ));

        let listed = store
            .list_for_requester(&RequesterIdentity::user("u1"))
            .await
            .unwrap();
        assert_eq!(
            listed.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![b.id, a.id]
        );
        assert!(
            store
                .list_for_requester(&RequesterIdentity::user("u2"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_attempt_store_single_capture() {
        let store = InMemoryPaymentAttemptStore::new();
        let reservation = ReservationId::new();
        let first = PaymentAttempt::new(reservation, PaymentMethod::Card, dec!(120), "THB", Utc::now());
        let second = PaymentAttempt::new(reservation, PaymentMethod::Card, dec!(120), "THB", Utc::now());
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        store
            .update(
                first.id,
                AttemptChange::SessionOpened {
                    session_ref: "cs_1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.find_by_session("cs_1").await.unwrap().id, first.id);

        store
            .update(
                first.id,
                AttemptChange::Completed {
                    transaction_ref: "pi_1".to_string(),
                    card: None,
                },
            )
            .await
            .unwrap();
        let err = store
            .update(
                second.id,
                AttemptChange::Completed {
                    transaction_ref: "pi_2".to_string(),
                    card: None,
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let listed = store.list_for_reservation(reservation).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
    }

    #[tokio::test]
    async fn test_catalog_hides_unpublished() {
        let snapshot = ItemSnapshot {
            item: BookableItemRef::new(ItemType::Vehicle, "7"),
            price: dec!(2500),
            extra_guest_price: None,
            currency: "THB".to_string(),
            price_unit: PriceUnit::Day,
            options: vec![],
            max_guests: None,
            published: false,
        };
        let catalog = InMemoryCatalog::with_items([snapshot.clone()]);
        assert!(matches!(
            catalog.pricing_snapshot(&snapshot.item).await,
            Err(BookingError::NotFound(_))
        ));

        catalog
            .upsert(ItemSnapshot {
                published: true,
                ..snapshot.clone()
            })
            .await;
        assert_eq!(
            catalog.pricing_snapshot(&snapshot.item).await.unwrap().price,
            dec!(2500)
        );
    }
}
