use super::*;
use super::conflict::today;
use crate::limits::*;
use chrono::{Days, NaiveDate};
use ulid::Ulid;

/// `n` days from today.
fn day(n: u64) -> NaiveDate {
    today() + Days::new(n)
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("staykeep_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn spec(owner_id: UserId, guests: u32) -> RentalSpec {
    RentalSpec {
        id: Ulid::new(),
        owner_id,
        guests,
        nightly_rate: 10_000,
        weekend_rate: None,
    }
}

/// Register a 4-guest rental at a flat 100.00 per night. Returns (rental, owner).
async fn listed(engine: &Engine) -> (RentalId, UserId) {
    let owner = Ulid::new();
    let info = engine.register_rental(spec(owner, 4)).await.unwrap();
    (info.id, owner)
}

// ── Rentals ──────────────────────────────────────────────

#[tokio::test]
async fn register_and_get_rental() {
    let engine = new_engine("register.wal");
    let owner = Ulid::new();
    let s = RentalSpec {
        weekend_rate: Some(15_000),
        ..spec(owner, 6)
    };
    engine.register_rental(s.clone()).await.unwrap();

    let info = engine.get_rental(s.id).await.unwrap();
    assert_eq!(info.owner_id, owner);
    assert_eq!(info.guests, 6);
    assert_eq!(info.weekend_rate, Some(15_000));
    assert!(info.blocked_dates.is_empty());
    assert_eq!(engine.rental_count(), 1);
}

#[tokio::test]
async fn register_duplicate_rejected() {
    let engine = new_engine("register_dup.wal");
    let s = spec(Ulid::new(), 2);
    engine.register_rental(s.clone()).await.unwrap();
    let err = engine.register_rental(s.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(id) if id == s.id));
}

#[tokio::test]
async fn register_zero_capacity_rejected() {
    let engine = new_engine("register_zero.wal");
    let err = engine.register_rental(spec(Ulid::new(), 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidGuests(0)));
    assert_eq!(engine.rental_count(), 0);
}

#[tokio::test]
async fn unknown_rental_is_not_found() {
    let engine = new_engine("unknown_rental.wal");
    let missing = Ulid::new();
    assert!(matches!(
        engine.get_rental(missing).await,
        Err(EngineError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        engine.check_availability(missing, day(1), day(3)).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        engine.reserve(missing, Ulid::new(), day(1), day(3), 1).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn update_rental_owner_only() {
    let engine = new_engine("update_rental.wal");
    let (rid, owner) = listed(&engine).await;

    let err = engine
        .update_rental(rid, Ulid::new(), 8, 20_000, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden { .. }));

    let info = engine
        .update_rental(rid, owner, 8, 20_000, Some(25_000))
        .await
        .unwrap();
    assert_eq!(info.guests, 8);
    assert_eq!(info.nightly_rate, 20_000);
    assert_eq!(info.weekend_rate, Some(25_000));
}

#[tokio::test]
async fn update_rental_keeps_existing_booking_price() {
    let engine = new_engine("update_keeps_price.wal");
    let (rid, owner) = listed(&engine).await;
    let guest = Ulid::new();
    let booking = engine.reserve(rid, guest, day(10), day(12), 4).await.unwrap();
    assert_eq!(booking.total_price, 20_000);

    engine.update_rental(rid, owner, 2, 50_000, None).await.unwrap();

    let info = engine.get_booking(booking.id, guest).await.unwrap();
    assert_eq!(info.total_price, 20_000);
    assert_eq!(info.guests, 4);
}

#[tokio::test]
async fn oversized_rates_rejected() {
    let engine = new_engine("oversized_rates.wal");
    let owner = Ulid::new();

    let err = engine
        .register_rental(RentalSpec {
            nightly_rate: MAX_NIGHTLY_RATE + 1,
            ..spec(owner, 2)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    let err = engine
        .register_rental(RentalSpec {
            weekend_rate: Some(MAX_NIGHTLY_RATE + 1),
            ..spec(owner, 2)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    assert_eq!(engine.rental_count(), 0);

    let (rid, owner) = listed(&engine).await;
    let err = engine
        .update_rental(rid, owner, 2, u64::MAX, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    assert_eq!(engine.get_rental(rid).await.unwrap().nightly_rate, 10_000);
}

#[tokio::test]
async fn overflowing_price_is_rejected() {
    let engine = new_engine("overflowing_price.wal");
    let (rid, _) = listed(&engine).await;
    // Only reachable through a log written before rates were capped.
    let rs = engine.get_rental_state(&rid).unwrap();
    rs.write().await.nightly_rate = u64::MAX / 2 + 1;

    let err = engine
        .reserve(rid, Ulid::new(), day(10), day(12), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
    assert!(matches!(
        engine.quote(rid, day(10), day(12)).await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert_eq!(rs.read().await.live_booking_count(), 0);
}

// ── Validation ───────────────────────────────────────────

#[tokio::test]
async fn invalid_ranges_rejected() {
    let engine = new_engine("invalid_ranges.wal");
    let (rid, _) = listed(&engine).await;

    // inverted
    assert!(matches!(
        engine.check_availability(rid, day(5), day(3)).await,
        Err(EngineError::InvalidRange(_))
    ));
    // empty
    assert!(matches!(
        engine.check_availability(rid, day(5), day(5)).await,
        Err(EngineError::InvalidRange(_))
    ));
    // past
    let yesterday = today() - Days::new(1);
    assert!(matches!(
        engine.reserve(rid, Ulid::new(), yesterday, day(2), 1).await,
        Err(EngineError::InvalidRange(_))
    ));
    // starting today is fine
    assert!(engine.check_availability(rid, today(), day(1)).await.unwrap().available);
}

#[tokio::test]
async fn range_limits_enforced() {
    let engine = new_engine("range_limits.wal");
    let (rid, _) = listed(&engine).await;

    let too_long = day(1) + Days::new(MAX_STAY_NIGHTS as u64 + 1);
    assert!(matches!(
        engine.check_availability(rid, day(1), too_long).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let far = day(MAX_BOOKING_HORIZON_DAYS as u64 + 1);
    assert!(matches!(
        engine.reserve(rid, Ulid::new(), far, far + Days::new(2), 1).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn guest_count_checked() {
    let engine = new_engine("guest_count.wal");
    let (rid, _) = listed(&engine).await;

    assert!(matches!(
        engine.reserve(rid, Ulid::new(), day(1), day(3), 0).await,
        Err(EngineError::InvalidGuests(0))
    ));
    assert!(matches!(
        engine.reserve(rid, Ulid::new(), day(1), day(3), 5).await,
        Err(EngineError::CapacityExceeded {
            requested: 5,
            capacity: 4
        })
    ));
    engine.reserve(rid, Ulid::new(), day(1), day(3), 4).await.unwrap();
}

// ── Availability and reservation ─────────────────────────

#[tokio::test]
async fn worked_example() {
    let engine = new_engine("worked_example.wal");
    let (rid, _) = listed(&engine).await;

    let first = engine.reserve(rid, Ulid::new(), day(10), day(14), 2).await.unwrap();

    // Checkout day of the first booking is free.
    let touching = engine.check_availability(rid, day(14), day(17)).await.unwrap();
    assert!(touching.available);
    assert!(touching.conflicting_bookings.is_empty());
    assert!(touching.blocked_dates.is_empty());

    let straddling = engine.check_availability(rid, day(13), day(15)).await.unwrap();
    assert!(!straddling.available);
    assert_eq!(straddling.conflicting_bookings.len(), 1);
    assert_eq!(straddling.conflicting_bookings[0].id, first.id);

    let second = engine.reserve(rid, Ulid::new(), day(14), day(17), 2).await.unwrap();
    assert_eq!(second.status, BookingStatus::Pending);
    assert_eq!(second.stay, Stay::new(day(14), day(17)));
    assert_eq!(second.total_price, 30_000);
}

#[tokio::test]
async fn overlapping_reserve_rejected_with_details() {
    let engine = new_engine("overlap_rejected.wal");
    let (rid, _) = listed(&engine).await;
    let first = engine.reserve(rid, Ulid::new(), day(10), day(14), 2).await.unwrap();

    let err = engine
        .reserve(rid, Ulid::new(), day(12), day(16), 2)
        .await
        .unwrap_err();
    match err {
        EngineError::DateConflict { bookings, blocked } => {
            assert_eq!(bookings, vec![first.id]);
            assert!(blocked.is_empty());
        }
        other => panic!("expected DateConflict, got {other:?}"),
    }
    let all = engine.bookings_for_rental(rid, listed_owner(&engine, rid).await).await.unwrap();
    assert_eq!(all.len(), 1);
}

async fn listed_owner(engine: &Engine, rid: RentalId) -> UserId {
    engine.get_rental(rid).await.unwrap().owner_id
}

#[tokio::test]
async fn availability_reads_are_idempotent() {
    let engine = new_engine("idempotent_reads.wal");
    let (rid, owner) = listed(&engine).await;
    engine.reserve(rid, Ulid::new(), day(5), day(8), 1).await.unwrap();
    engine
        .block_dates(rid, owner, vec![day(9)], BlockMode::Replace)
        .await
        .unwrap();

    let a = engine.check_availability(rid, day(4), day(12)).await.unwrap();
    let b = engine.check_availability(rid, day(4), day(12)).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.conflicting_bookings.len(), 1);
    assert_eq!(a.blocked_dates, vec![day(9)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_reserves_one_winner() {
    let engine = Arc::new(new_engine("concurrent_winner.wal"));
    let (rid, _) = listed(&engine).await;

    let n = 24;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        // [10,14), [11,15), [12,16): every pair overlaps.
        let offset = (i % 3) as u64;
        handles.push(tokio::spawn(async move {
            eng.reserve(rid, Ulid::new(), day(10 + offset), day(14 + offset), 1)
                .await
        }));
    }

    let mut won = 0;
    let mut conflicted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => won += 1,
            Err(EngineError::DateConflict { .. }) => conflicted += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicted, n - 1);

    let rs = engine.get_rental_state(&rid).unwrap();
    assert_eq!(rs.read().await.live_booking_count(), 1);
}

#[tokio::test]
async fn concurrent_reserves_on_different_rentals_all_commit() {
    let engine = Arc::new(new_engine("concurrent_rentals.wal"));
    let mut rentals = Vec::new();
    for _ in 0..8 {
        rentals.push(listed(&engine).await.0);
    }

    let mut handles = Vec::new();
    for rid in rentals {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.reserve(rid, Ulid::new(), day(3), day(6), 2).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
}

// ── Blocked dates ────────────────────────────────────────

#[tokio::test]
async fn blocked_dates_exclude_reservations() {
    let engine = new_engine("blocked_exclude.wal");
    let (rid, owner) = listed(&engine).await;
    engine
        .block_dates(rid, owner, vec![day(12)], BlockMode::Replace)
        .await
        .unwrap();

    let err = engine
        .reserve(rid, Ulid::new(), day(10), day(14), 2)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::DateConflict { ref bookings, ref blocked }
            if bookings.is_empty() && *blocked == vec![day(12)]
    ));

    // A stay that checks out on the blocked day does not occupy it.
    engine.reserve(rid, Ulid::new(), day(10), day(12), 2).await.unwrap();
    engine.reserve(rid, Ulid::new(), day(13), day(15), 2).await.unwrap();
}

#[tokio::test]
async fn block_dates_replace_and_merge() {
    let engine = new_engine("block_modes.wal");
    let (rid, owner) = listed(&engine).await;

    engine
        .block_dates(rid, owner, vec![day(3), day(1), day(3)], BlockMode::Replace)
        .await
        .unwrap();
    let info = engine
        .block_dates(rid, owner, vec![day(7)], BlockMode::Merge)
        .await
        .unwrap();
    assert_eq!(info.blocked_dates, vec![day(1), day(3), day(7)]);

    let info = engine
        .block_dates(rid, owner, vec![day(20)], BlockMode::Replace)
        .await
        .unwrap();
    assert_eq!(info.blocked_dates, vec![day(20)]);

    let info = engine
        .block_dates(rid, owner, Vec::new(), BlockMode::Replace)
        .await
        .unwrap();
    assert!(info.blocked_dates.is_empty());
}

#[tokio::test]
async fn block_dates_owner_only() {
    let engine = new_engine("block_owner_only.wal");
    let (rid, _) = listed(&engine).await;
    let err = engine
        .block_dates(rid, Ulid::new(), vec![day(2)], BlockMode::Replace)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden { .. }));
    assert!(engine.get_rental(rid).await.unwrap().blocked_dates.is_empty());
}

#[tokio::test]
async fn block_dates_limit() {
    let engine = new_engine("block_limit.wal");
    let (rid, owner) = listed(&engine).await;
    let dates: Vec<NaiveDate> = (0..=MAX_BLOCKED_DATES as u64).map(day).collect();
    let err = engine
        .block_dates(rid, owner, dates, BlockMode::Replace)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LimitExceeded(_)));
}

#[tokio::test]
async fn blocking_over_live_booking_leaves_it() {
    let engine = new_engine("block_over_booking.wal");
    let (rid, owner) = listed(&engine).await;
    let guest = Ulid::new();
    let booking = engine.reserve(rid, guest, day(10), day(14), 2).await.unwrap();

    engine
        .block_dates(rid, owner, vec![day(11)], BlockMode::Replace)
        .await
        .unwrap();

    let info = engine.get_booking(booking.id, guest).await.unwrap();
    assert_eq!(info.status, BookingStatus::Pending);

    let check = engine.check_availability(rid, day(10), day(14)).await.unwrap();
    assert_eq!(check.conflicting_bookings.len(), 1);
    assert_eq!(check.blocked_dates, vec![day(11)]);
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn cancellation_frees_the_range() {
    let engine = new_engine("cancel_frees.wal");
    let (rid, _) = listed(&engine).await;
    let guest = Ulid::new();
    let booking = engine.reserve(rid, guest, day(10), day(14), 2).await.unwrap();

    assert!(!engine.check_availability(rid, day(10), day(14)).await.unwrap().available);

    let cancelled = engine.cancel_booking(booking.id, guest).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.updated_at >= cancelled.created_at);

    assert!(engine.check_availability(rid, day(10), day(14)).await.unwrap().available);
    let again = engine.reserve(rid, Ulid::new(), day(10), day(14), 2).await.unwrap();
    assert_eq!(again.status, BookingStatus::Pending);
}

#[tokio::test]
async fn confirm_then_cancel_by_owner() {
    let engine = new_engine("confirm_cancel.wal");
    let (rid, owner) = listed(&engine).await;
    let booking = engine.reserve(rid, Ulid::new(), day(3), day(5), 1).await.unwrap();

    let confirmed = engine.confirm_booking(booking.id, owner).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert!(!engine.check_availability(rid, day(3), day(5)).await.unwrap().available);

    let cancelled = engine.cancel_booking(booking.id, owner).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn invalid_transitions_rejected() {
    let engine = new_engine("invalid_transitions.wal");
    let (rid, owner) = listed(&engine).await;
    let guest = Ulid::new();
    let booking = engine.reserve(rid, guest, day(3), day(5), 1).await.unwrap();

    engine.confirm_booking(booking.id, owner).await.unwrap();
    assert!(matches!(
        engine.confirm_booking(booking.id, owner).await,
        Err(EngineError::InvalidTransition {
            from: BookingStatus::Confirmed,
            to: BookingStatus::Confirmed,
            ..
        })
    ));

    engine.cancel_booking(booking.id, guest).await.unwrap();
    assert!(matches!(
        engine.confirm_booking(booking.id, owner).await,
        Err(EngineError::InvalidTransition {
            from: BookingStatus::Cancelled,
            ..
        })
    ));
    assert!(matches!(
        engine.cancel_booking(booking.id, guest).await,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn transition_authority() {
    let engine = new_engine("transition_authority.wal");
    let (rid, _) = listed(&engine).await;
    let guest = Ulid::new();
    let booking = engine.reserve(rid, guest, day(3), day(5), 1).await.unwrap();

    // Guests cannot confirm their own booking; strangers cannot cancel it.
    assert!(matches!(
        engine.confirm_booking(booking.id, guest).await,
        Err(EngineError::Forbidden { .. })
    ));
    assert!(matches!(
        engine.cancel_booking(booking.id, Ulid::new()).await,
        Err(EngineError::Forbidden { .. })
    ));
    assert!(matches!(
        engine.confirm_booking(Ulid::new(), guest).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn booking_visibility() {
    let engine = new_engine("booking_visibility.wal");
    let (rid, owner) = listed(&engine).await;
    let guest = Ulid::new();
    let booking = engine.reserve(rid, guest, day(3), day(5), 1).await.unwrap();

    assert_eq!(engine.get_booking(booking.id, guest).await.unwrap().id, booking.id);
    assert_eq!(engine.get_booking(booking.id, owner).await.unwrap().id, booking.id);
    assert!(matches!(
        engine.get_booking(booking.id, Ulid::new()).await,
        Err(EngineError::Forbidden { .. })
    ));
    assert!(matches!(
        engine.bookings_for_rental(rid, guest).await,
        Err(EngineError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn bookings_for_guest_spans_rentals() {
    let engine = new_engine("guest_trips.wal");
    let (a, _) = listed(&engine).await;
    let (b, _) = listed(&engine).await;
    let guest = Ulid::new();

    let first = engine.reserve(a, guest, day(3), day(5), 1).await.unwrap();
    let second = engine.reserve(b, guest, day(8), day(9), 1).await.unwrap();
    engine.reserve(b, Ulid::new(), day(20), day(22), 1).await.unwrap();
    engine.cancel_booking(first.id, guest).await.unwrap();

    let trips = engine.bookings_for_guest(guest).await;
    let ids: Vec<BookingId> = trips.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(trips[0].status, BookingStatus::Cancelled);

    assert!(engine.bookings_for_guest(Ulid::new()).await.is_empty());
}

#[tokio::test]
async fn quote_prices_each_night() {
    let engine = new_engine("quote.wal");
    let owner = Ulid::new();
    let s = RentalSpec {
        weekend_rate: Some(15_000),
        ..spec(owner, 2)
    };
    engine.register_rental(s.clone()).await.unwrap();

    let quote = engine.quote(s.id, day(1), day(8)).await.unwrap();
    assert_eq!(quote.nights.len(), 7);
    let weekend_nights = quote.nights.iter().filter(|n| n.weekend).count() as u64;
    assert_eq!(weekend_nights, 2);
    assert_eq!(quote.total, 5 * 10_000 + weekend_nights * 15_000);
    for n in &quote.nights {
        assert_eq!(n.weekend, is_weekend_night(n.date));
    }

    // The reservation is charged what the quote said.
    let booking = engine.reserve(s.id, Ulid::new(), day(1), day(8), 2).await.unwrap();
    assert_eq!(booking.total_price, quote.total);
}

#[tokio::test]
async fn calendar_open_ranges() {
    let engine = new_engine("calendar.wal");
    let (rid, owner) = listed(&engine).await;
    engine.reserve(rid, Ulid::new(), day(10), day(14), 1).await.unwrap();
    let cancelled = engine.reserve(rid, Ulid::new(), day(25), day(27), 1).await.unwrap();
    engine.cancel_booking(cancelled.id, owner).await.unwrap();
    engine
        .block_dates(rid, owner, vec![day(20)], BlockMode::Replace)
        .await
        .unwrap();

    let open = engine.open_ranges(rid, day(5), day(30)).await.unwrap();
    let spans: Vec<(NaiveDate, NaiveDate)> =
        open.iter().map(|r| (r.start_date, r.end_date)).collect();
    assert_eq!(
        spans,
        vec![(day(5), day(10)), (day(14), day(20)), (day(21), day(30))]
    );
}

#[tokio::test]
async fn calendar_window_rules() {
    let engine = new_engine("calendar_window.wal");
    let (rid, _) = listed(&engine).await;
    let past = today() - Days::new(10);

    assert!(matches!(
        engine.open_ranges(rid, day(5), day(5)).await,
        Err(EngineError::InvalidRange(_))
    ));
    assert!(matches!(
        engine
            .open_ranges(rid, day(0), day(MAX_CALENDAR_WINDOW_DAYS as u64 + 1))
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(engine.open_ranges(rid, past, past + Days::new(5)).await.unwrap().is_empty());

    let clamped = engine.open_ranges(rid, past, day(3)).await.unwrap();
    assert_eq!(clamped.len(), 1);
    assert_eq!(clamped[0].start_date, today());
    assert_eq!(clamped[0].end_date, day(3));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn committed_events_are_broadcast() {
    let engine = new_engine("broadcast.wal");
    let (rid, owner) = listed(&engine).await;
    let mut rx = engine.notify.subscribe(rid);

    let booking = engine.reserve(rid, Ulid::new(), day(3), day(5), 1).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::BookingReserved { booking: b } => assert_eq!(b.id, booking.id),
        other => panic!("expected BookingReserved, got {other:?}"),
    }

    // Rejected reservations publish nothing.
    let _ = engine.reserve(rid, Ulid::new(), day(4), day(6), 1).await;
    engine.confirm_booking(booking.id, owner).await.unwrap();
    match rx.recv().await.unwrap() {
        Event::BookingStatusChanged { id, status, .. } => {
            assert_eq!(id, booking.id);
            assert_eq!(status, BookingStatus::Confirmed);
        }
        other => panic!("expected BookingStatusChanged, got {other:?}"),
    }
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let notify = Arc::new(NotifyHub::new());
    let guest = Ulid::new();
    let owner = Ulid::new();
    let s = spec(owner, 4);
    let rid = s.id;

    let (kept, dropped) = {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        engine.register_rental(s).await.unwrap();
        engine
            .block_dates(rid, owner, vec![day(30), day(31)], BlockMode::Replace)
            .await
            .unwrap();
        let kept = engine.reserve(rid, guest, day(3), day(5), 2).await.unwrap();
        let dropped = engine.reserve(rid, guest, day(10), day(12), 2).await.unwrap();
        engine.confirm_booking(kept.id, owner).await.unwrap();
        engine.cancel_booking(dropped.id, guest).await.unwrap();
        (kept, dropped)
    };

    let engine = Engine::new(path, notify).unwrap();
    let info = engine.get_rental(rid).await.unwrap();
    assert_eq!(info.blocked_dates, vec![day(30), day(31)]);

    let kept_info = engine.get_booking(kept.id, guest).await.unwrap();
    assert_eq!(kept_info.status, BookingStatus::Confirmed);
    assert_eq!(kept_info.total_price, kept.total_price);
    let dropped_info = engine.get_booking(dropped.id, owner).await.unwrap();
    assert_eq!(dropped_info.status, BookingStatus::Cancelled);

    assert_eq!(engine.bookings_for_guest(guest).await.len(), 2);
    assert!(!engine.check_availability(rid, day(3), day(5)).await.unwrap().available);
    assert!(engine.check_availability(rid, day(10), day(12)).await.unwrap().available);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact_restart.wal");
    let notify = Arc::new(NotifyHub::new());
    let owner = Ulid::new();
    let guest = Ulid::new();
    let s = spec(owner, 4);
    let rid = s.id;

    let before = {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        engine.register_rental(s).await.unwrap();
        for i in 0..20 {
            engine
                .block_dates(rid, owner, vec![day(40 + i)], BlockMode::Replace)
                .await
                .unwrap();
        }
        let b = engine.reserve(rid, guest, day(3), day(6), 2).await.unwrap();
        engine.confirm_booking(b.id, owner).await.unwrap();
        let c = engine.reserve(rid, guest, day(8), day(9), 2).await.unwrap();
        engine.cancel_booking(c.id, guest).await.unwrap();

        let size_before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() < size_before);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Appends after compaction land in the new file.
        engine.reserve(rid, guest, day(15), day(16), 1).await.unwrap();
        engine.bookings_for_rental(rid, owner).await.unwrap()
    };

    let engine = Engine::new(path, notify).unwrap();
    let after = engine.bookings_for_rental(rid, owner).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(
        engine.get_rental(rid).await.unwrap().blocked_dates,
        vec![day(59)]
    );
}

#[tokio::test]
async fn appends_counted_through_writer() {
    let engine = new_engine("appends_counter.wal");
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    let (rid, owner) = listed(&engine).await;
    engine.reserve(rid, Ulid::new(), day(3), day(5), 1).await.unwrap();
    engine
        .block_dates(rid, owner, vec![day(9)], BlockMode::Merge)
        .await
        .unwrap();
    // Rejected writes never reach the log.
    let _ = engine.reserve(rid, Ulid::new(), day(4), day(6), 1).await;

    assert_eq!(engine.wal_appends_since_compact().await, 3);
}

#[tokio::test]
async fn group_commit_survives_replay() {
    let path = test_wal_path("group_commit.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for _ in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.register_rental(spec(Ulid::new(), 2)).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.rental_count(), n);

    let engine2 = Engine::new(path, notify).unwrap();
    assert_eq!(engine2.rental_count(), n);
}

// ── Persistence failures ─────────────────────────────────

#[tokio::test]
async fn failed_sync_leaves_no_trace() {
    let path = test_wal_path("failed_sync.wal");
    let notify = Arc::new(NotifyHub::new());
    let guest = Ulid::new();

    let rid = {
        let engine = Engine::new(path.clone(), notify.clone()).unwrap();
        let (rid, _) = listed(&engine).await;

        engine.wal_tx.send(WalCommand::FailNextSync).await.unwrap();
        let err = engine
            .reserve(rid, guest, day(10), day(14), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PersistenceUnavailable(_)));

        let rs = engine.get_rental_state(&rid).unwrap();
        assert_eq!(rs.read().await.live_booking_count(), 0);
        assert!(engine.check_availability(rid, day(10), day(14)).await.unwrap().available);
        assert!(engine.bookings_for_guest(guest).await.is_empty());
        assert_eq!(engine.wal_appends_since_compact().await, 1);

        // A retry of the same dates commits.
        engine.reserve(rid, Ulid::new(), day(10), day(14), 2).await.unwrap();
        rid
    };

    // The failed reservation never comes back on replay.
    let engine = Engine::new(path, notify).unwrap();
    let rs = engine.get_rental_state(&rid).unwrap();
    assert_eq!(rs.read().await.bookings.len(), 1);
    assert!(engine.bookings_for_guest(guest).await.is_empty());
}

#[tokio::test]
async fn writer_gone_fails_writes_without_mutation() {
    let engine = new_engine("writer_gone.wal");
    let (rid, owner) = listed(&engine).await;
    engine.wal_tx.send(WalCommand::Halt).await.unwrap();

    let err = engine
        .reserve(rid, Ulid::new(), day(10), day(14), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PersistenceUnavailable(_)));
    let rs = engine.get_rental_state(&rid).unwrap();
    assert_eq!(rs.read().await.live_booking_count(), 0);
    assert!(engine.check_availability(rid, day(10), day(14)).await.unwrap().available);

    let err = engine
        .block_dates(rid, owner, vec![day(3)], BlockMode::Replace)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PersistenceUnavailable(_)));
    assert!(engine.get_rental(rid).await.unwrap().blocked_dates.is_empty());

    assert!(matches!(
        engine.register_rental(spec(owner, 2)).await,
        Err(EngineError::PersistenceUnavailable(_))
    ));
    assert_eq!(engine.rental_count(), 1);
}
