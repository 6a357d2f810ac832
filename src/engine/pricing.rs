use rust_decimal::Decimal;

use crate::limits::*;
use crate::model::*;

use super::rates::resolve_stay;
use super::EngineError;

// ── Pricing Calculation ───────────────────────────────────────────

/// Guests sorted into pricing buckets for one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    /// Adults plus children at or above the room's child age limit.
    pub adults: u32,
    pub billable_children: u32,
    pub free_children: u32,
}

/// Build a guest composition from signed counts as they arrive off the wire.
pub fn guests_from_counts(
    adults: i64,
    children: i64,
    child_ages: &[i64],
) -> Result<GuestComposition, EngineError> {
    if adults < 0 || children < 0 {
        return Err(EngineError::GuestCountInvalid(format!(
            "negative guest count: adults={adults}, children={children}"
        )));
    }
    if adults.saturating_add(children) > MAX_GUESTS as i64 {
        return Err(EngineError::LimitExceeded("too many guests"));
    }
    let mut ages = Vec::with_capacity(child_ages.len());
    for &age in child_ages {
        if age < 0 || age > MAX_CHILD_AGE as i64 {
            return Err(EngineError::GuestCountInvalid(format!("child age {age} out of range")));
        }
        ages.push(age as u32);
    }
    let guests = GuestComposition {
        adults: adults as u32,
        children: children as u32,
        child_ages: ages,
    };
    if guests.child_ages.len() > guests.children as usize {
        return Err(EngineError::GuestCountInvalid(format!(
            "{} child ages given for {} children",
            guests.child_ages.len(),
            guests.children
        )));
    }
    Ok(guests)
}

pub fn validate_guests(room: &Room, guests: &GuestComposition) -> Result<(), EngineError> {
    if guests.child_ages.len() > guests.children as usize {
        return Err(EngineError::GuestCountInvalid(format!(
            "{} child ages given for {} children",
            guests.child_ages.len(),
            guests.children
        )));
    }
    if let Some(age) = guests.child_ages.iter().find(|&&a| a > MAX_CHILD_AGE) {
        return Err(EngineError::GuestCountInvalid(format!("child age {age} out of range")));
    }
    if guests.occupants() > room.max_guests {
        return Err(EngineError::GuestCountInvalid(format!(
            "{} guests exceed room maximum of {}",
            guests.occupants(),
            room.max_guests
        )));
    }
    Ok(())
}

/// Sort guests into adults, paying children and free children.
///
/// Ages are taken as of check-in and hold for the whole stay. Children
/// without an age are billable. A party with nobody paying is charged as a
/// single adult so no night is ever free.
pub fn classify_guests(room: &Room, guests: &GuestComposition) -> Occupancy {
    let mut occ = Occupancy {
        adults: guests.adults,
        billable_children: 0,
        free_children: 0,
    };
    for i in 0..guests.children as usize {
        match guests.child_ages.get(i) {
            Some(&age) if room.child_age_limit.is_some_and(|limit| age >= limit) => {
                occ.adults += 1;
            }
            Some(&age) if room.child_free_until_age.is_some_and(|free| age < free) => {
                occ.free_children += 1;
            }
            _ => occ.billable_children += 1,
        }
    }
    if occ.adults + occ.billable_children == 0 {
        occ.adults = 1;
    }
    occ
}

/// Charge for one night given the resolved rate and the party.
pub fn night_charge(rate: &ResolvedRate, occ: &Occupancy) -> Decimal {
    let price = rate.effective_price;
    match rate.terms.mode {
        PricingMode::PerUnit => price,
        PricingMode::PerPerson => price * Decimal::from(occ.adults + occ.billable_children),
        PricingMode::PerPersonSharing => {
            let extra_adult = rate.terms.additional_person_rate.unwrap_or(Decimal::ZERO);
            let extra_child = rate
                .terms
                .child_price_per_night
                .or(rate.terms.additional_person_rate)
                .unwrap_or(Decimal::ZERO);
            // The base price covers the first payer: an adult if there is one.
            let (extra_adults, extra_children) = if occ.adults > 0 {
                (occ.adults - 1, occ.billable_children)
            } else {
                (0, occ.billable_children.saturating_sub(1))
            };
            price
                + extra_adult * Decimal::from(extra_adults)
                + extra_child * Decimal::from(extra_children)
        }
    }
}

/// Price every night of `stay` and total it.
pub fn quote(rs: &RoomState, stay: &StayRange, guests: &GuestComposition) -> PricingQuote {
    let occ = classify_guests(&rs.room, guests);
    let nights: Vec<NightQuote> = resolve_stay(rs, stay)
        .into_iter()
        .map(|rate| NightQuote {
            date: rate.date,
            base_price: rate.base_price,
            effective_price: rate.effective_price,
            charge: night_charge(&rate, &occ),
            seasonal_rate: rate.seasonal_rate,
        })
        .collect();
    let total_amount = nights.iter().map(|n| n.charge).sum();
    PricingQuote {
        room_id: rs.id(),
        night_count: nights.len() as i64,
        nights,
        total_amount,
        currency: rs.room.currency.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn money(units: i64) -> Decimal {
        Decimal::new(units, 0)
    }

    fn room(mode: PricingMode) -> Room {
        Room {
            id: Ulid::new(),
            name: None,
            currency: "EUR".into(),
            pricing_mode: mode,
            base_price_per_night: money(100),
            additional_person_rate: Some(money(30)),
            child_price_per_night: None,
            child_free_until_age: Some(3),
            child_age_limit: Some(12),
            min_stay_nights: 1,
            max_stay_nights: None,
            inventory_mode: InventoryMode::SingleUnit,
            total_units: 1,
            max_guests: 6,
        }
    }

    fn guests(adults: u32, children: u32, ages: &[u32]) -> GuestComposition {
        GuestComposition {
            adults,
            children,
            child_ages: ages.to_vec(),
        }
    }

    fn week() -> StayRange {
        StayRange::new(d(2024, 6, 1), d(2024, 6, 8))
    }

    #[test]
    fn per_unit_ignores_guest_count() {
        let rs = RoomState::new(room(PricingMode::PerUnit));
        let one = quote(&rs, &week(), &guests(1, 0, &[]));
        let four = quote(&rs, &week(), &guests(2, 2, &[5, 8]));
        assert_eq!(one.total_amount, money(700));
        assert_eq!(four.total_amount, one.total_amount);
        assert_eq!(one.night_count, 7);
        assert_eq!(one.currency, "EUR");
    }

    #[test]
    fn per_person_doubles_with_adults() {
        let rs = RoomState::new(room(PricingMode::PerPerson));
        let two = quote(&rs, &week(), &guests(2, 0, &[]));
        let four = quote(&rs, &week(), &guests(4, 0, &[]));
        assert_eq!(two.nights[0].charge, money(200));
        assert_eq!(four.nights[0].charge, money(400));
        assert_eq!(four.total_amount, two.total_amount * Decimal::from(2));
    }

    #[test]
    fn per_person_child_age_rules() {
        let rs = RoomState::new(room(PricingMode::PerPerson));
        // age 2: free, age 7: billable child, age 14: adult, no age: billable
        let q = quote(&rs, &week(), &guests(1, 4, &[2, 7, 14]));
        assert_eq!(q.nights[0].charge, money(400));
    }

    #[test]
    fn per_person_sharing_formula() {
        let rs = RoomState::new(room(PricingMode::PerPersonSharing));
        // base 100 + 2 extra adults * 30
        assert_eq!(quote(&rs, &week(), &guests(3, 0, &[])).nights[0].charge, money(160));
        // children fall back to the additional person rate
        assert_eq!(quote(&rs, &week(), &guests(2, 1, &[6])).nights[0].charge, money(160));
        // free infant adds nothing
        assert_eq!(quote(&rs, &week(), &guests(2, 1, &[1])).nights[0].charge, money(130));
    }

    #[test]
    fn per_person_sharing_child_price() {
        let mut r = room(PricingMode::PerPersonSharing);
        r.child_price_per_night = Some(money(15));
        let rs = RoomState::new(r);
        // 100 + 1 adult * 30 + 2 children * 15
        assert_eq!(quote(&rs, &week(), &guests(2, 2, &[5, 9])).nights[0].charge, money(160));
        // teenager over the age limit pays the adult rate
        assert_eq!(quote(&rs, &week(), &guests(1, 1, &[13])).nights[0].charge, money(130));
    }

    #[test]
    fn zero_occupants_charged_as_one_adult() {
        let rs = RoomState::new(room(PricingMode::PerPerson));
        assert_eq!(quote(&rs, &week(), &guests(0, 0, &[])).nights[0].charge, money(100));
        // a lone infant still pays for the room
        assert_eq!(quote(&rs, &week(), &guests(0, 1, &[1])).nights[0].charge, money(100));
    }

    #[test]
    fn seasonal_mode_override_applies_per_night() {
        let mut rs = RoomState::new(room(PricingMode::PerUnit));
        rs.upsert_rate(SeasonalRate {
            id: Ulid::new(),
            room_id: rs.id(),
            name: Some("Festival".into()),
            start_date: d(2024, 6, 3),
            end_date: d(2024, 6, 4),
            price_per_night: money(50),
            priority: 1,
            pricing_mode: Some(PricingMode::PerPerson),
            additional_person_rate: None,
            child_price_per_night: None,
            created_at: 1,
        });
        let q = quote(&rs, &week(), &guests(3, 0, &[]));
        let charges: Vec<_> = q.nights.iter().map(|n| n.charge).collect();
        assert_eq!(
            charges,
            vec![money(100), money(100), money(150), money(150), money(100), money(100), money(100)]
        );
        assert_eq!(q.total_amount, money(800));
        assert!(q.nights[2].seasonal_rate.is_some());
    }

    #[test]
    fn fractional_prices_sum_exactly() {
        let mut r = room(PricingMode::PerUnit);
        r.base_price_per_night = Decimal::new(3333, 2); // 33.33
        let rs = RoomState::new(r);
        let q = quote(&rs, &StayRange::new(d(2024, 1, 1), d(2024, 1, 4)), &GuestComposition::default());
        assert_eq!(q.total_amount, Decimal::new(9999, 2));
    }

    #[test]
    fn guests_from_counts_rejects_bad_input() {
        assert!(matches!(guests_from_counts(-1, 0, &[]), Err(EngineError::GuestCountInvalid(_))));
        assert!(matches!(guests_from_counts(2, -1, &[]), Err(EngineError::GuestCountInvalid(_))));
        assert!(matches!(guests_from_counts(2, 1, &[4, 6]), Err(EngineError::GuestCountInvalid(_))));
        assert!(matches!(guests_from_counts(2, 1, &[-3]), Err(EngineError::GuestCountInvalid(_))));
        let g = guests_from_counts(2, 2, &[4]).unwrap();
        assert_eq!(g.occupants(), 4);
        assert_eq!(g.child_ages, vec![4]);
    }

    #[test]
    fn validate_guests_enforces_max_guests() {
        let r = room(PricingMode::PerPerson);
        assert!(validate_guests(&r, &guests(6, 0, &[])).is_ok());
        assert!(matches!(
            validate_guests(&r, &guests(5, 2, &[])),
            Err(EngineError::GuestCountInvalid(_))
        ));
    }
}
