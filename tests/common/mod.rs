#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use stayline::application::engine::{Collaborators, ReservationEngine, ReservationRequest};
use stayline::config::EngineConfig;
use stayline::domain::calendar::DateRange;
use stayline::domain::identity::{Actor, RequesterIdentity};
use stayline::domain::item::{
    BookableItemRef, ItemOption, ItemSnapshot, ItemType, PriceType, PriceUnit,
};
use stayline::domain::payment::PaymentMethod;
use stayline::domain::ports::{NotificationKind, Notifier, NotifierRef};
use stayline::domain::reservation::Reservation;
use stayline::error::{BookingError, Result};
use stayline::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryPaymentAttemptStore, InMemoryReservationStore,
};
use stayline::infrastructure::sandbox::SandboxProcessor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn range(start: NaiveDate, end: NaiveDate) -> DateRange {
    DateRange::new(start, end).unwrap()
}

pub fn property() -> BookableItemRef {
    BookableItemRef::new(ItemType::Property, "42")
}

pub fn vehicle() -> BookableItemRef {
    BookableItemRef::new(ItemType::Vehicle, "7")
}

pub fn tour() -> BookableItemRef {
    BookableItemRef::new(ItemType::Tour, "3")
}

pub fn user(id: &str) -> RequesterIdentity {
    RequesterIdentity::user(id)
}

pub fn owner(id: &str) -> Actor {
    Actor::requester(user(id))
}

pub fn admin() -> Actor {
    Actor::admin(user("ops"))
}

/// Listings used across the suite, mirroring `tests/fixtures/catalog.json`.
pub fn catalog_items() -> Vec<ItemSnapshot> {
    vec![
        ItemSnapshot {
            item: property(),
            price: dec!(1000),
            extra_guest_price: Some(dec!(200)),
            currency: "THB".to_string(),
            price_unit: PriceUnit::Night,
            options: vec![ItemOption {
                id: "cleaning".to_string(),
                name: "Final cleaning".to_string(),
                price: dec!(300),
                price_type: PriceType::Flat,
            }],
            max_guests: Some(4),
            published: true,
        },
        ItemSnapshot {
            item: vehicle(),
            price: dec!(2500),
            extra_guest_price: None,
            currency: "THB".to_string(),
            price_unit: PriceUnit::Day,
            options: vec![ItemOption {
                id: "gps".to_string(),
                name: "GPS".to_string(),
                price: dec!(100),
                price_type: PriceType::PerDay,
            }],
            max_guests: None,
            published: true,
        },
        ItemSnapshot {
            item: tour(),
            price: dec!(1500),
            extra_guest_price: None,
            currency: "THB".to_string(),
            price_unit: PriceUnit::Fixed,
            options: vec![],
            max_guests: Some(1),
            published: true,
        },
    ]
}

pub fn request(
    item: BookableItemRef,
    range: DateRange,
    requester: RequesterIdentity,
) -> ReservationRequest {
    ReservationRequest {
        item,
        range,
        guests: 1,
        option_ids: vec![],
        requester,
        note: None,
        draft: false,
    }
}

/// Collects notifications so tests can assert on them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKind, String)>>,
}

impl RecordingNotifier {
    /// Polls until `count` notifications arrived or a second has passed.
    pub async fn wait_for(&self, count: usize) -> Vec<(NotificationKind, String)> {
        for _ in 0..100 {
            let sent = self.sent.lock().unwrap().clone();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        _recipient: &RequesterIdentity,
        kind: NotificationKind,
        reservation: &Reservation,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((kind, reservation.reference.clone()));
        Ok(())
    }
}

/// A mail relay that is always down.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(
        &self,
        _recipient: &RequesterIdentity,
        _kind: NotificationKind,
        _reservation: &Reservation,
    ) -> Result<()> {
        Err(BookingError::storage("smtp relay unavailable"))
    }
}

pub struct Harness {
    pub engine: Arc<ReservationEngine>,
    pub catalog: InMemoryCatalog,
    pub sandbox: SandboxProcessor,
    pub notifier: Arc<RecordingNotifier>,
}

/// Short timeouts so fault-injection tests finish quickly.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_processor_timeout(Duration::from_millis(200))
        .with_session_retry_backoff(Duration::from_millis(10))
}

pub fn harness() -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    harness_with(test_config(), notifier.clone(), notifier)
}

pub fn harness_with(
    config: EngineConfig,
    notifier: NotifierRef,
    recorder: Arc<RecordingNotifier>,
) -> Harness {
    let catalog = InMemoryCatalog::with_items(catalog_items());
    let sandbox = SandboxProcessor::new();
    let engine = ReservationEngine::new(
        &config,
        Collaborators {
            catalog: Arc::new(catalog.clone()),
            reservations: Arc::new(InMemoryReservationStore::new()),
            attempts: Arc::new(InMemoryPaymentAttemptStore::new()),
            processor: Arc::new(sandbox.clone()),
            notifier,
        },
    );
    Harness {
        engine: Arc::new(engine),
        catalog,
        sandbox,
        notifier: recorder,
    }
}

impl Harness {
    /// Creates, pays and confirms a reservation. Returns it with its session reference.
    pub async fn confirmed(
        &self,
        item: BookableItemRef,
        range: DateRange,
        requester: &str,
    ) -> (Reservation, String) {
        let created = self
            .engine
            .create_reservation(request(item, range, user(requester)))
            .await
            .unwrap();
        let session = self
            .engine
            .pay(created.id, PaymentMethod::Card)
            .await
            .unwrap();
        let txn = self
            .sandbox
            .mark_paid(&session.session_ref, None)
            .await
            .unwrap();
        let confirmed = self
            .engine
            .apply_payment_completion(&session.session_ref, &txn, None)
            .await
            .unwrap();
        (confirmed, session.session_ref)
    }
}
