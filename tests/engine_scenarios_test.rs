mod common;

use common::*;
use rust_decimal_macros::dec;
use stayline::domain::payment::{AttemptStatus, PaymentMethod};
use stayline::domain::ports::NotificationKind;
use stayline::domain::reservation::{PaymentStatus, ReservationStatus};
use stayline::error::BookingError;

#[tokio::test]
async fn test_confirmed_reservation_blocks_overlapping_check() {
    let h = harness();
    h.confirmed(property(), range(date(2024, 7, 10), date(2024, 7, 15)), "u1")
        .await;

    let availability = h
        .engine
        .check_availability(&property(), &range(date(2024, 7, 12), date(2024, 7, 20)))
        .await
        .unwrap();
    assert!(!availability.available);
    assert_eq!(
        availability.blocking_ranges,
        vec![range(date(2024, 7, 10), date(2024, 7, 15))]
    );

    // Checkout day is free for the next guest.
    let after = h
        .engine
        .check_availability(&property(), &range(date(2024, 7, 15), date(2024, 7, 20)))
        .await
        .unwrap();
    assert!(after.available);
    assert!(after.blocking_ranges.is_empty());
}

#[tokio::test]
async fn test_vehicle_quote() {
    let h = harness();
    let price = h
        .engine
        .quote(&vehicle(), &range(date(2024, 8, 1), date(2024, 8, 4)), 1, &[])
        .await
        .unwrap();

    assert_eq!(price.days, 3);
    assert_eq!(price.base_price, dec!(7500));
    assert_eq!(price.options_price, dec!(0));
    assert_eq!(price.tax_amount, dec!(1500));
    assert_eq!(price.discount, dec!(0));
    assert_eq!(price.total, dec!(9000));
    assert_eq!(price.currency, "THB");
}

#[tokio::test]
async fn test_concurrent_tour_bookings_one_wins() {
    let h = harness();
    let day = range(date(2024, 9, 1), date(2024, 9, 2));

    let first = {
        let engine = h.engine.clone();
        tokio::spawn(async move {
            engine
                .create_reservation(request(tour(), day, user("u1")))
                .await
        })
    };
    let second = {
        let engine = h.engine.clone();
        tokio::spawn(async move {
            engine
                .create_reservation(request(tour(), day, user("u2")))
                .await
        })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won.len(), 1);
    assert_eq!(won[0].status, ReservationStatus::Pending);

    let lost = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(lost, BookingError::Overlap { .. }));
    assert_eq!(lost.blocking_ranges(), &[day]);
}

#[tokio::test]
async fn test_session_amount_locked_after_price_change() {
    let h = harness();
    let reservation = h
        .engine
        .create_reservation(request(
            vehicle(),
            range(date(2024, 8, 1), date(2024, 8, 4)),
            user("u1"),
        ))
        .await
        .unwrap();
    assert_eq!(reservation.price.total, dec!(9000));

    let mut repriced = catalog_items()[1].clone();
    repriced.price = dec!(4000);
    h.catalog.upsert(repriced).await;

    let session = h.engine.pay(reservation.id, PaymentMethod::Card).await.unwrap();
    assert_eq!(session.amount, dec!(9000));
    assert_eq!(session.currency, "THB");
    assert_eq!(
        h.sandbox
            .session_request(&session.session_ref)
            .await
            .unwrap()
            .amount,
        dec!(9000)
    );

    let attempts = h
        .engine
        .payment_attempts(reservation.id, &owner("u1"))
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Pending);
    assert_eq!(attempts[0].amount, dec!(9000));
}

#[tokio::test]
async fn test_completion_confirms_and_repeats_as_noop() {
    let h = harness();
    let reservation = h
        .engine
        .create_reservation(request(
            vehicle(),
            range(date(2024, 8, 1), date(2024, 8, 4)),
            user("u1"),
        ))
        .await
        .unwrap();
    let session = h.engine.pay(reservation.id, PaymentMethod::Card).await.unwrap();
    let txn = h.sandbox.mark_paid(&session.session_ref, None).await.unwrap();

    let first = h
        .engine
        .apply_payment_completion(&session.session_ref, &txn, None)
        .await
        .unwrap();
    assert_eq!(first.status, ReservationStatus::Confirmed);
    assert_eq!(first.payment_status, PaymentStatus::Completed);

    let second = h
        .engine
        .apply_payment_completion(&session.session_ref, &txn, None)
        .await
        .unwrap();
    assert_eq!(second, first);

    let attempts = h
        .engine
        .payment_attempts(reservation.id, &owner("u1"))
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, AttemptStatus::Completed);
    assert_eq!(attempts[0].transaction_ref.as_deref(), Some(txn.as_str()));
}

#[tokio::test]
async fn test_failed_refund_keeps_reservation_confirmed() {
    let h = harness();
    let (confirmed, _) = h
        .confirmed(vehicle(), range(date(2024, 8, 1), date(2024, 8, 4)), "u1")
        .await;
    h.sandbox.decline_refunds(true);

    let err = h.engine.cancel(confirmed.id, &owner("u1")).await.unwrap_err();
    assert!(matches!(err, BookingError::Refund(_)));
    assert!(err.to_string().contains("remains active"));

    let current = h.engine.reservation(confirmed.id, &owner("u1")).await.unwrap();
    assert_eq!(current.status, ReservationStatus::Confirmed);
    assert_eq!(current.payment_status, PaymentStatus::Completed);
    assert_eq!(current, confirmed);
}

#[tokio::test]
async fn test_lifecycle_notifications() {
    let h = harness();
    let (confirmed, _) = h
        .confirmed(property(), range(date(2024, 7, 1), date(2024, 7, 3)), "u1")
        .await;
    h.engine.cancel(confirmed.id, &owner("u1")).await.unwrap();

    let sent = h.notifier.wait_for(3).await;
    let kinds: Vec<NotificationKind> = sent.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&NotificationKind::Received));
    assert!(kinds.contains(&NotificationKind::Confirmed));
    assert!(kinds.contains(&NotificationKind::Canceled));
    assert!(sent.iter().all(|(_, reference)| *reference == confirmed.reference));
}
