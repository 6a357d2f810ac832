use super::*;
use crate::limits::*;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn money(units: i64) -> Decimal {
    Decimal::new(units, 0)
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("innkeep_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn suite(base: i64) -> Room {
    Room::new(Ulid::new(), "EUR", money(base))
}

fn room_type(base: i64, units: u32) -> Room {
    let mut room = suite(base);
    room.inventory_mode = InventoryMode::RoomType;
    room.total_units = units;
    room.max_guests = 4;
    room
}

async fn engine_with_room(name: &str, room: Room) -> (Engine, Ulid) {
    let engine = Engine::new(test_wal_path(name)).unwrap();
    let id = room.id;
    engine.create_room(room).await.unwrap();
    (engine, id)
}

/// Engine whose log accepts `budget` records and fails every write after.
fn engine_with_wal_budget(budget: usize) -> Engine {
    let (wal_tx, mut rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut written = 0usize;
        let mut admit = |n: usize| -> io::Result<()> {
            if written + n > budget {
                return Err(io::Error::other("disk full"));
            }
            written += n;
            Ok(())
        };
        while let Some(cmd) = rx.recv().await {
            match cmd {
                WalCommand::Append { response, .. } => {
                    let _ = response.send(admit(1));
                }
                WalCommand::AppendBatch { events, response } => {
                    let _ = response.send(admit(events.len()));
                }
                WalCommand::Compact { response, .. } => {
                    let _ = response.send(Ok(()));
                }
                WalCommand::AppendsSinceCompact { response } => {
                    let _ = response.send(0);
                }
            }
        }
    });
    Engine::with_writer(wal_tx)
}

async fn book(engine: &Engine, room_id: Ulid, check_in: NaiveDate, check_out: NaiveDate) -> Result<Booking, EngineError> {
    engine
        .create_booking(NewBooking::new(Ulid::new(), room_id, check_in, check_out))
        .await
}

// ── Rate resolution ──────────────────────────────────────

#[tokio::test]
async fn effective_price_without_seasons_is_base() {
    let (engine, rid) = engine_with_room("base_price.wal", suite(120)).await;
    let price = engine.get_effective_price(rid, d(2024, 3, 14)).await.unwrap();
    assert_eq!(price.effective_price, money(120));
    assert_eq!(price.base_price, money(120));
    assert!(price.seasonal_rate.is_none());
    assert_eq!(price.currency, "EUR");
}

#[tokio::test]
async fn seasonal_rate_applies_inside_range_only() {
    let (engine, rid) = engine_with_room("season_range.wal", suite(100)).await;
    let mut summer = SeasonalRate::new(Ulid::new(), rid, d(2024, 7, 1), d(2024, 7, 31), money(150));
    summer.name = Some("Summer".into());
    let summer = engine.add_seasonal_rate(summer).await.unwrap();
    assert!(summer.created_at > 0);

    let inside = engine.get_effective_price(rid, d(2024, 7, 31)).await.unwrap();
    assert_eq!(inside.effective_price, money(150));
    assert_eq!(inside.seasonal_rate.unwrap().name.as_deref(), Some("Summer"));

    let outside = engine.get_effective_price(rid, d(2024, 8, 1)).await.unwrap();
    assert_eq!(outside.effective_price, money(100));
    assert!(outside.seasonal_rate.is_none());
}

#[tokio::test]
async fn higher_priority_wins_regardless_of_insertion_order() {
    for flip in [false, true] {
        let name = if flip { "priority_b.wal" } else { "priority_a.wal" };
        let (engine, rid) = engine_with_room(name, suite(100)).await;
        let mut low = SeasonalRate::new(Ulid::new(), rid, d(2024, 12, 1), d(2024, 12, 31), money(140));
        low.priority = 1;
        let mut high = SeasonalRate::new(Ulid::new(), rid, d(2024, 12, 20), d(2024, 12, 26), money(220));
        high.priority = 5;
        let order = if flip { [high.clone(), low.clone()] } else { [low.clone(), high.clone()] };
        for rate in order {
            engine.add_seasonal_rate(rate).await.unwrap();
        }

        let xmas = engine.get_effective_price(rid, d(2024, 12, 24)).await.unwrap();
        assert_eq!(xmas.effective_price, money(220));
        assert_eq!(xmas.seasonal_rate.unwrap().id, high.id);
        let early = engine.get_effective_price(rid, d(2024, 12, 5)).await.unwrap();
        assert_eq!(early.effective_price, money(140));
    }
}

#[tokio::test]
async fn seasonal_rate_update_and_remove() {
    let (engine, rid) = engine_with_room("season_update.wal", suite(100)).await;
    let rate = SeasonalRate::new(Ulid::new(), rid, d(2024, 5, 1), d(2024, 5, 10), money(80));
    let rate = engine.add_seasonal_rate(rate).await.unwrap();

    let updated = engine
        .update_seasonal_rate(rate.id, &[RateChange::PricePerNight(money(90)), RateChange::Priority(3)])
        .await
        .unwrap();
    assert_eq!(updated.created_at, rate.created_at);
    assert_eq!(engine.get_effective_price(rid, d(2024, 5, 2)).await.unwrap().effective_price, money(90));

    assert_eq!(engine.remove_seasonal_rate(rate.id).await.unwrap(), rid);
    assert_eq!(engine.get_effective_price(rid, d(2024, 5, 2)).await.unwrap().effective_price, money(100));
    assert!(matches!(engine.remove_seasonal_rate(rate.id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn seasonal_rate_rejects_inverted_range() {
    let (engine, rid) = engine_with_room("season_inverted.wal", suite(100)).await;
    let rate = SeasonalRate::new(Ulid::new(), rid, d(2024, 5, 10), d(2024, 5, 1), money(80));
    assert!(matches!(
        engine.add_seasonal_rate(rate).await,
        Err(EngineError::InvalidDateRange(_))
    ));
}

#[tokio::test]
async fn unknown_room_is_not_found() {
    let engine = Engine::new(test_wal_path("unknown_room.wal")).unwrap();
    let ghost = Ulid::new();
    assert!(matches!(
        engine.get_effective_price(ghost, d(2024, 1, 1)).await,
        Err(EngineError::NotFound(id)) if id == ghost
    ));
    assert!(matches!(
        engine.check_availability(ghost, d(2024, 1, 1), d(2024, 1, 2), false).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        book(&engine, ghost, d(2024, 1, 1), d(2024, 1, 2)).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Pricing ──────────────────────────────────────────────

#[tokio::test]
async fn batch_total_equals_sum_of_single_nights() {
    let (engine, rid) = engine_with_room("batch_sum.wal", suite(100)).await;
    let mut weekend = SeasonalRate::new(Ulid::new(), rid, d(2024, 6, 7), d(2024, 6, 8), money(175));
    weekend.priority = 2;
    engine.add_seasonal_rate(weekend).await.unwrap();

    let guests = GuestComposition::adults(2);
    let q = engine
        .get_batch_pricing(rid, d(2024, 6, 3), d(2024, 6, 10), &guests)
        .await
        .unwrap();
    assert_eq!(q.night_count, 7);
    assert_eq!(q.nights.len(), 7);

    let mut sum = Decimal::ZERO;
    for night in &q.nights {
        let single = engine.get_effective_price(rid, night.date).await.unwrap();
        assert_eq!(single.effective_price, night.effective_price);
        sum += night.charge;
    }
    assert_eq!(sum, q.total_amount);
    assert_eq!(q.total_amount, money(5 * 100 + 2 * 175));
}

#[tokio::test]
async fn per_unit_price_ignores_guests_and_per_person_scales() {
    let (engine, per_unit) = engine_with_room("guest_invariance.wal", room_type(90, 2)).await;
    let one = engine
        .get_batch_pricing(per_unit, d(2024, 9, 1), d(2024, 9, 4), &GuestComposition::adults(1))
        .await
        .unwrap();
    let four = engine
        .get_batch_pricing(per_unit, d(2024, 9, 1), d(2024, 9, 4), &GuestComposition::adults(4))
        .await
        .unwrap();
    assert_eq!(one.total_amount, four.total_amount);

    let mut pp = room_type(50, 2);
    pp.pricing_mode = PricingMode::PerPerson;
    let pp_id = pp.id;
    engine.create_room(pp).await.unwrap();
    let two = engine
        .get_batch_pricing(pp_id, d(2024, 9, 1), d(2024, 9, 4), &GuestComposition::adults(2))
        .await
        .unwrap();
    let four = engine
        .get_batch_pricing(pp_id, d(2024, 9, 1), d(2024, 9, 4), &GuestComposition::adults(4))
        .await
        .unwrap();
    assert_eq!(four.total_amount, two.total_amount * Decimal::from(2));
}

#[tokio::test]
async fn check_out_day_never_charged() {
    let (engine, rid) = engine_with_room("checkout_uncharged.wal", suite(100)).await;
    let q = engine
        .get_batch_pricing(rid, d(2024, 2, 28), d(2024, 3, 1), &GuestComposition::adults(1))
        .await
        .unwrap();
    // 2024 is a leap year: Feb 28 and Feb 29
    let dates: Vec<_> = q.nights.iter().map(|n| n.date).collect();
    assert_eq!(dates, vec![d(2024, 2, 28), d(2024, 2, 29)]);
}

#[tokio::test]
async fn pricing_rejects_bad_ranges_and_guests() {
    let (engine, rid) = engine_with_room("pricing_rejects.wal", suite(100)).await;
    let g = GuestComposition::adults(1);
    assert!(matches!(
        engine.get_batch_pricing(rid, d(2024, 6, 5), d(2024, 6, 5), &g).await,
        Err(EngineError::InvalidDateRange(_))
    ));
    assert!(matches!(
        engine.get_batch_pricing(rid, d(2024, 6, 5), d(2024, 6, 1), &g).await,
        Err(EngineError::InvalidDateRange(_))
    ));
    let crowd = GuestComposition::adults(3);
    assert!(matches!(
        engine.get_batch_pricing(rid, d(2024, 6, 1), d(2024, 6, 2), &crowd).await,
        Err(EngineError::GuestCountInvalid(_))
    ));
    assert!(matches!(
        engine.get_batch_pricing(rid, d(2024, 1, 1), d(2026, 6, 1), &g).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn empty_range_has_all_units() {
    let (engine, rid) = engine_with_room("empty_range.wal", room_type(100, 5)).await;
    let a = engine
        .check_availability(rid, d(2024, 4, 1), d(2024, 4, 8), false)
        .await
        .unwrap();
    assert!(a.available);
    assert_eq!(a.available_units, 5);
    assert_eq!(a.total_units, 5);
    assert_eq!(a.nights, 7);
}

#[tokio::test]
async fn availability_beyond_longest_stay_is_answered() {
    let (engine, rid) = engine_with_room("long_availability.wal", room_type(100, 2)).await;
    let a = engine.check_availability(rid, d(2024, 1, 1), d(2026, 6, 1), true).await.unwrap();
    assert_eq!(a.nights, 882);
    assert_eq!(a.available_units, 2);
    assert!(!a.meets_max_stay);
    assert!(!a.available);
    assert!(matches!(
        engine.check_availability(rid, d(2024, 1, 1), d(2030, 1, 1), false).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn exclusive_check_out_allows_back_to_back() {
    let (engine, rid) = engine_with_room("back_to_back.wal", suite(100)).await;
    assert_ok!(book(&engine, rid, d(2024, 6, 1), d(2024, 6, 5)).await);

    let same_day = engine
        .check_availability(rid, d(2024, 6, 5), d(2024, 6, 7), false)
        .await
        .unwrap();
    assert!(same_day.available);
    assert_ok!(book(&engine, rid, d(2024, 6, 5), d(2024, 6, 7)).await);

    let overlap = engine
        .check_availability(rid, d(2024, 6, 4), d(2024, 6, 5), false)
        .await
        .unwrap();
    assert!(!overlap.available);
    assert_eq!(overlap.available_units, 0);
}

#[tokio::test]
async fn room_type_capacity_exhaustion() {
    let (engine, rid) = engine_with_room("capacity_exhaustion.wal", room_type(100, 3)).await;
    for _ in 0..3 {
        assert_ok!(book(&engine, rid, d(2024, 8, 10), d(2024, 8, 13)).await);
    }
    let a = engine
        .check_availability(rid, d(2024, 8, 11), d(2024, 8, 12), false)
        .await
        .unwrap();
    assert!(!a.available);
    assert_eq!(a.available_units, 0);

    let err = assert_err!(book(&engine, rid, d(2024, 8, 12), d(2024, 8, 15)).await);
    assert!(matches!(err, EngineError::AvailabilityConflict { available_units: 0, .. }));
    assert_eq!(engine.get_bookings(rid).await.len(), 3);
}

#[tokio::test]
async fn cancellation_restores_a_unit() {
    let (engine, rid) = engine_with_room("cancel_restores.wal", room_type(100, 2)).await;
    let first = book(&engine, rid, d(2024, 8, 1), d(2024, 8, 4)).await.unwrap();
    book(&engine, rid, d(2024, 8, 1), d(2024, 8, 4)).await.unwrap();
    let full = engine.check_availability(rid, d(2024, 8, 2), d(2024, 8, 3), false).await.unwrap();
    assert_eq!(full.available_units, 0);

    let cancelled = engine.cancel_booking(first.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let after = engine.check_availability(rid, d(2024, 8, 2), d(2024, 8, 3), false).await.unwrap();
    assert_eq!(after.available_units, 1);
    assert_ok!(book(&engine, rid, d(2024, 8, 1), d(2024, 8, 4)).await);
}

#[tokio::test]
async fn stay_rule_violation_and_override() {
    let mut room = suite(100);
    room.min_stay_nights = 3;
    room.max_stay_nights = Some(10);
    let (engine, rid) = engine_with_room("stay_rules.wal", room).await;

    let a = engine.check_availability(rid, d(2024, 5, 1), d(2024, 5, 3), false).await.unwrap();
    assert!(!a.available);
    assert!(!a.meets_min_stay);
    assert_eq!(a.available_units, 1);

    let err = assert_err!(book(&engine, rid, d(2024, 5, 1), d(2024, 5, 3)).await);
    assert!(matches!(err, EngineError::StayRuleViolation { nights: 2, min_stay_nights: 3, .. }));
    assert!(engine.get_bookings(rid).await.is_empty());

    let mut nb = NewBooking::new(Ulid::new(), rid, d(2024, 5, 1), d(2024, 5, 3));
    nb.override_stay_rules = true;
    let booking = engine.create_booking(nb).await.unwrap();
    assert!(booking.stay_rule_override);

    let taken = engine.check_availability(rid, d(2024, 5, 1), d(2024, 5, 3), true).await.unwrap();
    assert_eq!(taken.available_units, 0);
    assert!(!taken.available);
    let err = assert_err!(book(&engine, rid, d(2024, 5, 2), d(2024, 5, 6)).await);
    assert!(matches!(err, EngineError::AvailabilityConflict { .. }));

    let long = engine.check_availability(rid, d(2024, 6, 1), d(2024, 6, 20), false).await.unwrap();
    assert!(!long.meets_max_stay);
    assert!(long.meets_min_stay);
}

#[tokio::test]
async fn single_unit_room_ignores_total_units() {
    let mut room = suite(100);
    room.total_units = 7;
    let (engine, rid) = engine_with_room("single_unit.wal", room).await;
    assert_ok!(book(&engine, rid, d(2024, 8, 1), d(2024, 8, 3)).await);
    let a = engine.check_availability(rid, d(2024, 8, 2), d(2024, 8, 4), false).await.unwrap();
    assert_eq!(a.total_units, 1);
    assert_eq!(a.available_units, 0);
}

#[tokio::test]
async fn inventory_calendar() {
    let (engine, rid) = engine_with_room("inventory_calendar.wal", room_type(100, 2)).await;
    book(&engine, rid, d(2024, 8, 2), d(2024, 8, 4)).await.unwrap();
    book(&engine, rid, d(2024, 8, 3), d(2024, 8, 5)).await.unwrap();
    let days = engine.get_inventory(rid, d(2024, 8, 1), d(2024, 8, 6)).await.unwrap();
    let committed: Vec<_> = days.iter().map(|day| day.committed_units).collect();
    assert_eq!(committed, vec![0, 1, 2, 1, 0]);
    assert_eq!(days[2].available_units, 0);
}

// ── Conflict guard ───────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_race_admits_exactly_the_free_units() {
    let path = test_wal_path("last_unit_race.wal");
    let engine = Arc::new(Engine::new(path).unwrap());
    let room = room_type(100, 2);
    let rid = room.id;
    engine.create_room(room).await.unwrap();

    let start = Arc::new(tokio::sync::Barrier::new(8));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let start = start.clone();
        handles.push(tokio::spawn(async move {
            start.wait().await;
            book(&engine, rid, d(2024, 10, 1), d(2024, 10, 3)).await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(EngineError::AvailabilityConflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 2);
    assert_eq!(conflicts, 6);
    assert_eq!(engine.get_bookings(rid).await.len(), 2);
    let a = engine.check_availability(rid, d(2024, 10, 1), d(2024, 10, 3), false).await.unwrap();
    assert_eq!(a.available_units, 0);
}

#[tokio::test]
async fn booking_priced_at_commit_when_amount_missing() {
    let mut room = suite(80);
    room.pricing_mode = PricingMode::PerPerson;
    let (engine, rid) = engine_with_room("priced_at_commit.wal", room).await;

    let mut nb = NewBooking::new(Ulid::new(), rid, d(2024, 6, 1), d(2024, 6, 4));
    nb.guests = GuestComposition::adults(2);
    let booking = engine.create_booking(nb).await.unwrap();
    assert_eq!(booking.total_amount, money(480));
    assert_eq!(booking.currency, "EUR");

    let mut agreed = NewBooking::new(Ulid::new(), rid, d(2024, 7, 1), d(2024, 7, 2));
    agreed.total_amount = Some(Decimal::new(9950, 2));
    agreed.currency = Some("USD".into());
    let booking = engine.create_booking(agreed).await.unwrap();
    assert_eq!(booking.total_amount, Decimal::new(9950, 2));
    assert_eq!(booking.currency, "USD");
}

#[tokio::test]
async fn booking_amount_not_recomputed_on_rate_change() {
    let (engine, rid) = engine_with_room("amount_frozen.wal", suite(100)).await;
    let booking = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 3)).await.unwrap();
    assert_eq!(booking.total_amount, money(200));

    engine.update_room(rid, &[RoomChange::BasePrice(money(300))]).await.unwrap();
    let stored = engine.get_booking(booking.id).await.unwrap();
    assert_eq!(stored.total_amount, money(200));
}

#[tokio::test]
async fn duplicate_booking_id_rejected() {
    let (engine, rid) = engine_with_room("dup_booking.wal", room_type(100, 5)).await;
    let id = Ulid::new();
    engine
        .create_booking(NewBooking::new(id, rid, d(2024, 6, 1), d(2024, 6, 2)))
        .await
        .unwrap();
    assert!(matches!(
        engine.create_booking(NewBooking::new(id, rid, d(2024, 7, 1), d(2024, 7, 2))).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let (engine, rid) = engine_with_room("batch_atomic.wal", room_type(100, 2)).await;
    let other = suite(60);
    let other_id = other.id;
    engine.create_room(other).await.unwrap();

    // Three stays on a two-unit room: the third conflicts with the first two.
    let batch = vec![
        NewBooking::new(Ulid::new(), other_id, d(2024, 9, 1), d(2024, 9, 2)),
        NewBooking::new(Ulid::new(), rid, d(2024, 9, 1), d(2024, 9, 3)),
        NewBooking::new(Ulid::new(), rid, d(2024, 9, 2), d(2024, 9, 4)),
        NewBooking::new(Ulid::new(), rid, d(2024, 9, 2), d(2024, 9, 3)),
    ];
    let err = assert_err!(engine.batch_create_bookings(batch).await);
    assert!(matches!(err, EngineError::AvailabilityConflict { .. }));
    assert!(engine.get_bookings(rid).await.is_empty());
    assert!(engine.get_bookings(other_id).await.is_empty());

    let batch = vec![
        NewBooking::new(Ulid::new(), other_id, d(2024, 9, 1), d(2024, 9, 2)),
        NewBooking::new(Ulid::new(), rid, d(2024, 9, 1), d(2024, 9, 3)),
        NewBooking::new(Ulid::new(), rid, d(2024, 9, 2), d(2024, 9, 4)),
    ];
    let committed = engine.batch_create_bookings(batch).await.unwrap();
    assert_eq!(committed.len(), 3);
    assert_eq!(engine.get_bookings(rid).await.len(), 2);
}

#[tokio::test]
async fn batch_rejects_duplicate_ids() {
    let (engine, rid) = engine_with_room("batch_dup.wal", room_type(100, 5)).await;
    let id = Ulid::new();
    let batch = vec![
        NewBooking::new(id, rid, d(2024, 9, 1), d(2024, 9, 2)),
        NewBooking::new(id, rid, d(2024, 9, 5), d(2024, 9, 6)),
    ];
    assert!(matches!(
        engine.batch_create_bookings(batch).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

// ── Resize & status ──────────────────────────────────────

#[tokio::test]
async fn resize_excludes_own_booking() {
    let (engine, rid) = engine_with_room("resize_self.wal", suite(100)).await;
    let booking = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 4)).await.unwrap();

    // Extending into its own nights must not conflict with itself.
    let resized = engine
        .resize_booking(booking.id, None, Some(d(2024, 6, 6)), false, None)
        .await
        .unwrap();
    assert_eq!(resized.stay, StayRange::new(d(2024, 6, 1), d(2024, 6, 6)));
    assert_eq!(resized.total_amount, money(500));

    let shifted = engine
        .resize_booking(booking.id, Some(d(2024, 6, 3)), Some(d(2024, 6, 5)), false, Some(money(150)))
        .await
        .unwrap();
    assert_eq!(shifted.total_amount, money(150));
}

#[tokio::test]
async fn resize_into_taken_nights_conflicts() {
    let (engine, rid) = engine_with_room("resize_conflict.wal", suite(100)).await;
    let a = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 4)).await.unwrap();
    book(&engine, rid, d(2024, 6, 6), d(2024, 6, 8)).await.unwrap();

    let err = assert_err!(
        engine
            .resize_booking(a.id, None, Some(d(2024, 6, 7)), false, None)
            .await
    );
    assert!(matches!(err, EngineError::AvailabilityConflict { .. }));
    let unchanged = engine.get_booking(a.id).await.unwrap();
    assert_eq!(unchanged.stay.check_out, d(2024, 6, 4));
}

#[tokio::test]
async fn resize_respects_stay_rules_and_status() {
    let mut room = suite(100);
    room.min_stay_nights = 2;
    let (engine, rid) = engine_with_room("resize_rules.wal", room).await;
    let b = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 4)).await.unwrap();

    let err = assert_err!(engine.resize_booking(b.id, None, Some(d(2024, 6, 2)), false, None).await);
    assert!(matches!(err, EngineError::StayRuleViolation { .. }));
    let short = engine
        .resize_booking(b.id, None, Some(d(2024, 6, 2)), true, None)
        .await
        .unwrap();
    assert!(short.stay_rule_override);

    engine.cancel_booking(b.id).await.unwrap();
    assert!(matches!(
        engine.resize_booking(b.id, None, Some(d(2024, 6, 5)), false, None).await,
        Err(EngineError::InvalidBooking(_))
    ));
}

#[tokio::test]
async fn status_machine_enforced() {
    let (engine, rid) = engine_with_room("status_machine.wal", suite(100)).await;
    let b = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 3)).await.unwrap();
    assert_eq!(b.status, BookingStatus::Pending);

    assert!(matches!(
        engine.transition_booking(b.id, BookingStatus::CheckedIn).await,
        Err(EngineError::InvalidTransition { from: BookingStatus::Pending, .. })
    ));
    for next in [
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::CheckedOut,
        BookingStatus::Completed,
    ] {
        let updated = engine.transition_booking(b.id, next).await.unwrap();
        assert_eq!(updated.status, next);
    }
    assert!(matches!(
        engine.cancel_booking(b.id).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    // Completed stays still hold their unit.
    let a = engine.check_availability(rid, d(2024, 6, 1), d(2024, 6, 2), false).await.unwrap();
    assert!(!a.available);
}

#[tokio::test]
async fn booking_cannot_start_cancelled() {
    let (engine, rid) = engine_with_room("start_cancelled.wal", suite(100)).await;
    let mut nb = NewBooking::new(Ulid::new(), rid, d(2024, 6, 1), d(2024, 6, 3));
    nb.status = BookingStatus::Cancelled;
    assert!(matches!(engine.create_booking(nb).await, Err(EngineError::InvalidBooking(_))));
}

// ── Rooms ────────────────────────────────────────────────

#[tokio::test]
async fn room_validation() {
    let engine = Engine::new(test_wal_path("room_validation.wal")).unwrap();
    let mut bad = suite(100);
    bad.min_stay_nights = 5;
    bad.max_stay_nights = Some(2);
    assert!(matches!(engine.create_room(bad).await, Err(EngineError::InvalidRoom(_))));

    let mut negative = suite(100);
    negative.base_price_per_night = money(-1);
    assert!(matches!(engine.create_room(negative).await, Err(EngineError::InvalidRoom(_))));

    let mut zero_units = room_type(100, 1);
    zero_units.total_units = 0;
    assert!(matches!(engine.create_room(zero_units).await, Err(EngineError::InvalidRoom(_))));

    let ok = suite(100);
    let id = ok.id;
    engine.create_room(ok.clone()).await.unwrap();
    assert!(matches!(engine.create_room(ok).await, Err(EngineError::AlreadyExists(x)) if x == id));
}

#[tokio::test]
async fn delete_room_with_active_bookings_rejected() {
    let (engine, rid) = engine_with_room("delete_room.wal", suite(100)).await;
    let b = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 3)).await.unwrap();
    assert!(matches!(engine.delete_room(rid).await, Err(EngineError::HasBookings(_))));

    engine.cancel_booking(b.id).await.unwrap();
    engine.delete_room(rid).await.unwrap();
    assert!(engine.get_room(&rid).is_none());
    assert!(engine.get_room_for_entity(&b.id).is_none());
    assert!(engine.list_rooms().await.is_empty());
}

#[tokio::test]
async fn update_room_changes_pricing() {
    let (engine, rid) = engine_with_room("update_room.wal", suite(100)).await;
    let room = engine
        .update_room(
            rid,
            &[
                RoomChange::Name(Some("Loft".into())),
                RoomChange::PricingMode(PricingMode::PerPerson),
                RoomChange::MaxGuests(3),
            ],
        )
        .await
        .unwrap();
    assert_eq!(room.name.as_deref(), Some("Loft"));
    let q = engine
        .get_batch_pricing(rid, d(2024, 6, 1), d(2024, 6, 2), &GuestComposition::adults(3))
        .await
        .unwrap();
    assert_eq!(q.total_amount, money(300));

    assert!(matches!(
        engine.update_room(rid, &[RoomChange::TotalUnits(0), RoomChange::InventoryMode(InventoryMode::RoomType)]).await,
        Err(EngineError::InvalidRoom(_))
    ));
}

#[tokio::test]
async fn room_limit_enforced() {
    let engine = Engine::new(test_wal_path("room_limit.wal")).unwrap();
    for _ in 0..MAX_ROOMS_PER_TENANT {
        engine.state.insert(Ulid::new(), Arc::new(RwLock::new(RoomState::new(suite(1)))));
    }
    assert!(matches!(engine.create_room(suite(1)).await, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_booking_id_on_two_rooms_has_one_owner() {
    let engine = Arc::new(Engine::new(test_wal_path("dup_id_race.wal")).unwrap());
    let (a, b) = (room_type(100, 5), room_type(100, 5));
    let rooms = [a.id, b.id];
    engine.create_room(a).await.unwrap();
    engine.create_room(b).await.unwrap();

    for night in 1..=20u32 {
        let id = Ulid::new();
        let handles: Vec<_> = rooms
            .into_iter()
            .map(|rid| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let nb = NewBooking::new(id, rid, d(2024, 3, night), d(2024, 3, night + 1));
                    engine.create_booking(nb).await
                })
            })
            .collect();

        let mut owners = Vec::new();
        for h in handles {
            match h.await.unwrap() {
                Ok(booking) => owners.push(booking.room_id),
                Err(EngineError::AlreadyExists(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(owners.len(), 1);
        assert_eq!(engine.get_room_for_entity(&id), Some(owners[0]));
    }

    let total = engine.get_bookings(rooms[0]).await.len() + engine.get_bookings(rooms[1]).await.len();
    assert_eq!(total, 20);
}

#[tokio::test]
async fn rejected_booking_frees_its_id() {
    let (engine, full) = engine_with_room("rejected_frees_id.wal", suite(100)).await;
    let open = suite(90);
    let open_id = open.id;
    engine.create_room(open).await.unwrap();
    book(&engine, full, d(2024, 4, 1), d(2024, 4, 5)).await.unwrap();

    let id = Ulid::new();
    let err = assert_err!(
        engine
            .create_booking(NewBooking::new(id, full, d(2024, 4, 2), d(2024, 4, 3)))
            .await
    );
    assert!(matches!(err, EngineError::AvailabilityConflict { .. }));
    assert!(engine.get_room_for_entity(&id).is_none());

    assert_ok!(
        engine
            .create_booking(NewBooking::new(id, open_id, d(2024, 4, 2), d(2024, 4, 3)))
            .await
    );
    assert_eq!(engine.get_room_for_entity(&id), Some(open_id));
}

#[tokio::test]
async fn failed_batch_write_leaves_nothing_behind() {
    // One record for the room, then the two-booking batch overruns the log.
    let engine = engine_with_wal_budget(2);
    let room = room_type(100, 4);
    let rid = room.id;
    engine.create_room(room).await.unwrap();

    let batch = vec![
        NewBooking::new(Ulid::new(), rid, d(2024, 9, 1), d(2024, 9, 3)),
        NewBooking::new(Ulid::new(), rid, d(2024, 9, 2), d(2024, 9, 4)),
    ];
    let ids: Vec<Ulid> = batch.iter().map(|nb| nb.id).collect();
    let err = assert_err!(engine.batch_create_bookings(batch).await);
    assert!(matches!(err, EngineError::WalError(_)));
    assert!(engine.get_bookings(rid).await.is_empty());
    assert!(ids.iter().all(|id| engine.get_room_for_entity(id).is_none()));
    let a = engine.check_availability(rid, d(2024, 9, 1), d(2024, 9, 4), false).await.unwrap();
    assert_eq!(a.available_units, 4);

    let retry = engine
        .create_booking(NewBooking::new(ids[0], rid, d(2024, 9, 1), d(2024, 9, 3)))
        .await
        .unwrap();
    assert_eq!(engine.get_room_for_entity(&retry.id), Some(rid));
}

#[tokio::test]
async fn batch_survives_restart() {
    let path = test_wal_path("batch_replay.wal");
    let room = room_type(100, 3);
    let rid = room.id;
    let committed;
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_room(room).await.unwrap();
        let batch = (0..3)
            .map(|_| NewBooking::new(Ulid::new(), rid, d(2024, 9, 1), d(2024, 9, 3)))
            .collect();
        committed = engine.batch_create_bookings(batch).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let mut ids: Vec<Ulid> = engine.get_bookings(rid).await.iter().map(|b| b.id).collect();
    let mut expected: Vec<Ulid> = committed.iter().map(|b| b.id).collect();
    ids.sort();
    expected.sort();
    assert_eq!(ids, expected);
}

// ── WAL replay & compaction ──────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let room = room_type(100, 3);
    let rid = room.id;
    let (kept, cancelled, resized, rate_id);
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_room(room).await.unwrap();
        let mut rate = SeasonalRate::new(Ulid::new(), rid, d(2024, 6, 1), d(2024, 6, 30), money(130));
        rate.priority = 4;
        rate_id = engine.add_seasonal_rate(rate).await.unwrap().id;
        kept = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 3)).await.unwrap();
        cancelled = book(&engine, rid, d(2024, 6, 1), d(2024, 6, 3)).await.unwrap();
        resized = book(&engine, rid, d(2024, 6, 10), d(2024, 6, 12)).await.unwrap();
        engine.cancel_booking(cancelled.id).await.unwrap();
        engine.transition_booking(kept.id, BookingStatus::Confirmed).await.unwrap();
        engine
            .resize_booking(resized.id, Some(d(2024, 6, 9)), None, false, None)
            .await
            .unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.get_room_for_entity(&rate_id), Some(rid));
    assert_eq!(engine.get_booking(kept.id).await.unwrap().status, BookingStatus::Confirmed);
    assert_eq!(engine.get_booking(cancelled.id).await.unwrap().status, BookingStatus::Cancelled);
    let r = engine.get_booking(resized.id).await.unwrap();
    assert_eq!(r.stay, StayRange::new(d(2024, 6, 9), d(2024, 6, 12)));
    assert_eq!(r.total_amount, money(390));

    let a = engine.check_availability(rid, d(2024, 6, 1), d(2024, 6, 2), false).await.unwrap();
    assert_eq!(a.available_units, 2);
    let p = engine.get_effective_price(rid, d(2024, 6, 15)).await.unwrap();
    assert_eq!(p.effective_price, money(130));
}

#[tokio::test]
async fn replay_handles_room_deleted() {
    let path = test_wal_path("replay_room_deleted.wal");
    let room = suite(100);
    let rid = room.id;
    let rate_id;
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_room(room).await.unwrap();
        let rate = SeasonalRate::new(Ulid::new(), rid, d(2024, 6, 1), d(2024, 6, 30), money(130));
        rate_id = engine.add_seasonal_rate(rate).await.unwrap().id;
        engine.delete_room(rid).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    assert!(engine.get_room(&rid).is_none());
    assert!(engine.get_room_for_entity(&rate_id).is_none());
}

#[tokio::test]
async fn compact_wal_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let engine = Engine::new(path.clone()).unwrap();
    let room = room_type(100, 4);
    let rid = room.id;
    engine.create_room(room).await.unwrap();
    for i in 0..10u32 {
        let b = book(&engine, rid, d(2024, 6, 1 + i), d(2024, 6, 2 + i)).await.unwrap();
        engine.transition_booking(b.id, BookingStatus::Confirmed).await.unwrap();
        if i % 2 == 0 {
            engine.cancel_booking(b.id).await.unwrap();
        }
    }
    let before = engine.get_bookings(rid).await;

    let size_before = std::fs::metadata(&path).unwrap().len();
    engine.compact_wal().await.unwrap();
    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(
        size_after < size_before,
        "compacted WAL ({size_after}) should be smaller than original ({size_before})"
    );

    drop(engine);
    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.get_bookings(rid).await, before);
}

#[tokio::test]
async fn compact_wal_survives_restart_with_later_appends() {
    let path = test_wal_path("compact_restart.wal");
    let room = suite(100);
    let rid = room.id;
    let late;
    {
        let engine = Engine::new(path.clone()).unwrap();
        engine.create_room(room).await.unwrap();
        book(&engine, rid, d(2024, 6, 1), d(2024, 6, 3)).await.unwrap();
        engine.compact_wal().await.unwrap();
        late = book(&engine, rid, d(2024, 6, 3), d(2024, 6, 5)).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let bookings = engine.get_bookings(rid).await;
    assert_eq!(bookings.len(), 2);
    assert_eq!(bookings[1].id, late.id);
}

#[tokio::test]
async fn room_created_during_compaction_survives_restart() {
    let path = test_wal_path("compact_vs_create.wal");
    let first = suite(100);
    let first_id = first.id;
    let late = suite(80);
    let late_id = late.id;
    let booking;
    {
        let engine = Arc::new(Engine::new(path.clone()).unwrap());
        engine.create_room(first).await.unwrap();

        // Stall the snapshot on the first room while the second is created.
        let held = engine.get_room(&first_id).unwrap().write_owned().await;
        let compaction = tokio::spawn({
            let engine = engine.clone();
            async move { engine.compact_wal().await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        let creation = tokio::spawn({
            let engine = engine.clone();
            async move { engine.create_room(late).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        drop(held);
        assert_ok!(compaction.await.unwrap());
        assert_ok!(creation.await.unwrap());
        booking = book(&engine, late_id, d(2024, 7, 1), d(2024, 7, 3)).await.unwrap();
    }

    let engine = Engine::new(path).unwrap();
    let rooms: Vec<Ulid> = engine.list_rooms().await.iter().map(|r| r.id).collect();
    assert_eq!(rooms.len(), 2);
    assert!(rooms.contains(&late_id));
    assert_eq!(engine.get_booking(booking.id).await.unwrap().room_id, late_id);
}

#[tokio::test]
async fn compact_resets_append_counter() {
    let (engine, rid) = engine_with_room("compact_counter.wal", suite(100)).await;
    book(&engine, rid, d(2024, 6, 1), d(2024, 6, 2)).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 2);
    engine.compact_wal().await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
}
