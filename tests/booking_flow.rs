//! End-to-end booking scenarios against the public API.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use slotguard::clock::{Clock, ManualClock};
use slotguard::collaborators::{Collaborators, FlatRatePricing, InMemoryCatalog, InMemoryDirectory};
use slotguard::config::BookingPolicy;
use slotguard::engine::{Engine, EngineError};
use slotguard::model::*;
use slotguard::notify::NotifyHub;
use slotguard::request::ReservationRequest;
use slotguard::sequence::DayKey;

const D: Ms = DAY_MS;
const JAN_1: Ms = 1_798_761_600_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotguard_test_flow");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

struct Desk {
    engine: Arc<Engine>,
    clock: Arc<ManualClock>,
    resource: ResourceRef,
    guest: Ulid,
}

impl Desk {
    fn open(name: &str) -> Self {
        let clock = Arc::new(ManualClock::new(JAN_1 - 14 * D));
        let catalog = Arc::new(InMemoryCatalog::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let resource = ResourceRef::new(ResourceKind::Package, Ulid::new());
        let guest = Ulid::new();
        catalog.add_active(resource, 12_500);
        directory.register(guest, None);

        let collaborators = Collaborators {
            catalog,
            requesters: directory,
            pricing: Arc::new(FlatRatePricing),
            notifier: Arc::new(NotifyHub::new()),
        };
        let engine = Engine::new(test_wal_path(name), collaborators, clock.clone(), BookingPolicy::default())
            .unwrap();
        Self {
            engine: Arc::new(engine),
            clock,
            resource,
            guest,
        }
    }

    fn stay(&self, from: Ms, to: Ms) -> ReservationRequest {
        ReservationRequest {
            resource: self.resource,
            requester_id: self.guest,
            start: Some(from),
            end: Some(to),
            duration_days: None,
            quantity: 1,
            notes: None,
        }
    }
}

fn jan(day: i64) -> Ms {
    JAN_1 + (day - 1) * D
}

#[tokio::test]
async fn book_conflict_and_rebook_suggested_window() {
    let desk = Desk::open("flow_conflict.wal");
    let today = DayKey::for_instant(desk.clock.now_ms());

    // Empty resource: first booking of the day.
    let first = assert_ok!(desk.engine.create_reservation(desk.stay(jan(1), jan(6))).await);
    assert_eq!(first.id.as_str(), format!("BKG-{today}-0001"));

    // Overlapping request: structured conflict with a suggestion at the first booking's end.
    let err = assert_err!(desk.engine.create_reservation(desk.stay(jan(4), jan(9))).await);
    let conflict = match err {
        EngineError::Overlap(conflict) => conflict,
        other => panic!("expected overlap, got {other}"),
    };
    assert_eq!(conflict.conflicting[0].id, first.id);
    let suggestion = conflict.suggestions[0].span;
    assert_eq!(suggestion.start, jan(6));

    // The suggestion is bookable.
    let second = assert_ok!(
        desk.engine
            .create_reservation(desk.stay(suggestion.start, suggestion.end))
            .await
    );
    assert_eq!(second.id.sequence(), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn identical_concurrent_requests_admit_exactly_one() {
    for round in 0..5 {
        let desk = Desk::open(&format!("flow_race_{round}.wal"));
        let attempts = (0..8).map(|_| {
            let engine = desk.engine.clone();
            let request = desk.stay(jan(1), jan(6));
            tokio::spawn(async move { engine.create_reservation(request).await })
        });
        let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "round {round}");
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.overlap().is_some()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_parallel_bookings_get_contiguous_ids() {
    let desk = Desk::open("flow_hundred.wal");
    let attempts = (0..100).map(|i| {
        let engine = desk.engine.clone();
        let request = desk.stay(jan(1) + i * D, jan(2) + i * D);
        tokio::spawn(async move { engine.create_reservation(request).await })
    });
    let mut ids: Vec<String> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().id.as_str().to_string())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 100);
    assert!(ids[0].ends_with("-0001"));
    assert!(ids[99].ends_with("-0100"));
}

#[tokio::test]
async fn unpaid_hold_expires_after_a_day() {
    let desk = Desk::open("flow_expiry.wal");
    let hold = assert_ok!(desk.engine.create_reservation(desk.stay(jan(1), jan(6))).await);
    assert_eq!(hold.expires_at, desk.clock.now_ms() + D);

    assert_eq!(assert_ok!(desk.engine.sweep_expired().await), 0);
    desk.clock.advance(D + 1);

    let fetched = assert_ok!(desk.engine.get_reservation(&hold.id).await);
    assert_eq!(fetched.status, ReservationStatus::Expired);
    assert_eq!(fetched.payment_status, PaymentStatus::Unpaid);

    // The window is open again.
    assert_ok!(desk.engine.create_reservation(desk.stay(jan(1), jan(6))).await);
}

#[tokio::test]
async fn paid_booking_then_cancellation() {
    let desk = Desk::open("flow_paid_cancel.wal");
    let r = assert_ok!(desk.engine.create_reservation(desk.stay(jan(10), jan(12))).await);
    assert_eq!(r.price.total, 25_000);

    let paid = assert_ok!(desk.engine.confirm_payment(&r.id).await);
    assert_eq!(paid.payment_status, PaymentStatus::Paid);

    desk.clock.advance(5 * D);
    assert_eq!(assert_ok!(desk.engine.sweep_expired().await), 0);

    let cancelled = assert_ok!(desk.engine.cancel_reservation(&r.id, "weather").await);
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Paid);

    let history = desk.engine.list_reservations(&desk.resource).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cancel_reason.as_deref(), Some("weather"));
}
