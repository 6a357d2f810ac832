use chrono::NaiveDate;

use crate::model::*;

// ── Rate Resolution ───────────────────────────────────────────────

/// The seasonal rate in force on `date`, if any.
///
/// Highest `priority` wins. Equal priorities go to the most recently created
/// rate, and the id settles anything left so the answer never depends on
/// insertion order.
pub fn winning_rate(rates: &[SeasonalRate], date: NaiveDate) -> Option<&SeasonalRate> {
    rates
        .iter()
        .filter(|r| r.covers(date))
        .max_by_key(|r| (r.priority, r.created_at, r.id))
}

/// Resolve the nightly rate for one date on one room.
pub fn resolve_rate(rs: &RoomState, date: NaiveDate) -> ResolvedRate {
    let room = &rs.room;
    let room_terms = PricingTerms {
        mode: room.pricing_mode,
        additional_person_rate: room.additional_person_rate,
        child_price_per_night: room.child_price_per_night,
    };

    match winning_rate(&rs.seasonal_rates, date) {
        None => ResolvedRate {
            date,
            base_price: room.base_price_per_night,
            effective_price: room.base_price_per_night,
            seasonal_rate: None,
            terms: room_terms,
        },
        Some(rate) => ResolvedRate {
            date,
            base_price: room.base_price_per_night,
            effective_price: rate.price_per_night,
            seasonal_rate: Some(SeasonalRateRef {
                id: rate.id,
                name: rate.name.clone(),
                price_per_night: rate.price_per_night,
            }),
            terms: PricingTerms {
                mode: rate.pricing_mode.unwrap_or(room_terms.mode),
                additional_person_rate: rate
                    .additional_person_rate
                    .or(room_terms.additional_person_rate),
                child_price_per_night: rate
                    .child_price_per_night
                    .or(room_terms.child_price_per_night),
            },
        },
    }
}

/// Resolve every night of a stay, in order.
pub fn resolve_stay(rs: &RoomState, stay: &StayRange) -> Vec<ResolvedRate> {
    stay.night_dates().map(|date| resolve_rate(rs, date)).collect()
}
