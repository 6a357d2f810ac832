use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

// ── Inventory Ledger ──────────────────────────────────────────────
//
// Unit usage is always derived from the booking list. There is no stored
// counter to drift out of sync with the bookings.

/// Units committed on `date`: non-cancelled bookings whose stay contains it.
/// `exclude` leaves one booking out (the one being modified).
pub fn committed_units(rs: &RoomState, date: NaiveDate, exclude: Option<Ulid>) -> u32 {
    let Some(next) = date.succ_opt() else {
        return 0;
    };
    let night = StayRange::new(date, next);
    rs.overlapping(&night)
        .filter(|b| b.status.consumes_inventory() && Some(b.id) != exclude)
        .count() as u32
}

/// Committed units for every night of `stay`, in order.
///
/// Sweep over the stay: +1 where a booking's overlap begins, -1 where it
/// ends. `extra` are stays not yet in the room state (pending batch members)
/// that count against inventory as well.
pub fn nightly_commitments(
    rs: &RoomState,
    stay: &StayRange,
    exclude: Option<Ulid>,
    extra: &[StayRange],
) -> Vec<u32> {
    let n = stay.nights().max(0) as usize;
    let mut delta = vec![0i64; n + 1];

    let mut add = |other: &StayRange| {
        if let Some(overlap) = other.intersect(stay) {
            let from = (overlap.check_in - stay.check_in).num_days() as usize;
            let to = (overlap.check_out - stay.check_in).num_days() as usize;
            delta[from] += 1;
            delta[to] -= 1;
        }
    };

    for booking in rs.overlapping(stay) {
        if booking.status.consumes_inventory() && Some(booking.id) != exclude {
            add(&booking.stay);
        }
    }
    for other in extra {
        add(other);
    }

    let mut counts = Vec::with_capacity(n);
    let mut running = 0i64;
    for d in delta.iter().take(n) {
        running += d;
        counts.push(running.max(0) as u32);
    }
    counts
}

/// Calendar view: committed and remaining units per date in `window`.
pub fn inventory_days(rs: &RoomState, window: &StayRange) -> Vec<InventoryDay> {
    let total_units = rs.room.bookable_units();
    window
        .night_dates()
        .zip(nightly_commitments(rs, window, None, &[]))
        .map(|(date, committed_units)| InventoryDay {
            date,
            committed_units,
            available_units: total_units.saturating_sub(committed_units),
            total_units,
        })
        .collect()
}
