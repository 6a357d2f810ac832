use ulid::Ulid;

use crate::model::*;

use super::ledger::nightly_commitments;

// ── Availability Algorithm ────────────────────────────────────────

/// `(meets_min_stay, meets_max_stay)` for a stay of `nights` on `room`.
pub fn stay_rules(room: &Room, nights: i64) -> (bool, bool) {
    let meets_min = nights >= room.min_stay_nights as i64;
    let meets_max = room.max_stay_nights.is_none_or(|max| nights <= max as i64);
    (meets_min, meets_max)
}

/// Decide whether `stay` can be booked on a room.
///
/// The unit count is the minimum over all nights: a multi-night stay needs
/// one unit free on every night at once, so a single full night blocks the
/// whole range. `exclude` drops one booking from the ledger and `extra`
/// adds stays that are about to be committed alongside this one.
pub fn availability(
    rs: &RoomState,
    stay: &StayRange,
    exclude: Option<Ulid>,
    extra: &[StayRange],
    override_stay_rules: bool,
) -> Availability {
    let room = &rs.room;
    let total_units = room.bookable_units();
    let nights = stay.nights();
    let (meets_min_stay, meets_max_stay) = stay_rules(room, nights);

    let available_units = nightly_commitments(rs, stay, exclude, extra)
        .into_iter()
        .map(|committed| total_units.saturating_sub(committed))
        .min()
        .unwrap_or(total_units);

    let rules_ok = override_stay_rules || (meets_min_stay && meets_max_stay);

    Availability {
        available: available_units > 0 && rules_ok,
        available_units,
        total_units,
        nights,
        min_stay_nights: room.min_stay_nights,
        max_stay_nights: room.max_stay_nights,
        meets_min_stay,
        meets_max_stay,
    }
}
