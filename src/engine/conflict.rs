use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::availability;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if date.year() < MIN_VALID_YEAR || date.year() > MAX_VALID_YEAR {
        return Err(EngineError::InvalidDateRange(format!("date {date} out of range")));
    }
    Ok(())
}

fn validate_range(check_in: NaiveDate, check_out: NaiveDate, max_nights: i64) -> Result<StayRange, EngineError> {
    validate_date(check_in)?;
    validate_date(check_out)?;
    if check_out <= check_in {
        return Err(EngineError::InvalidDateRange(format!(
            "check_out {check_out} must be after check_in {check_in}"
        )));
    }
    let stay = StayRange::new(check_in, check_out);
    if stay.nights() > max_nights {
        return Err(EngineError::LimitExceeded("date range too wide"));
    }
    Ok(stay)
}

/// A bookable or quotable stay: at least one night, bounded length.
pub(crate) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<StayRange, EngineError> {
    validate_range(check_in, check_out, MAX_STAY_NIGHTS)
}

/// A calendar query window `[start, end)`.
pub(crate) fn validate_window(start: NaiveDate, end: NaiveDate) -> Result<StayRange, EngineError> {
    validate_range(start, end, MAX_QUERY_NIGHTS)
}

fn non_negative(value: Decimal, field: &str) -> Result<(), EngineError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(EngineError::InvalidRoom(format!("{field} must not be negative")));
    }
    Ok(())
}

fn check_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

pub(crate) fn validate_room(room: &Room) -> Result<(), EngineError> {
    check_name(&room.name)?;
    if room.currency.is_empty() || room.currency.len() > MAX_CURRENCY_LEN {
        return Err(EngineError::InvalidRoom(format!("bad currency tag: {:?}", room.currency)));
    }
    non_negative(room.base_price_per_night, "base_price")?;
    if let Some(rate) = room.additional_person_rate {
        non_negative(rate, "additional_person_rate")?;
    }
    if let Some(rate) = room.child_price_per_night {
        non_negative(rate, "child_price")?;
    }
    if room.total_units < 1 {
        return Err(EngineError::InvalidRoom("total_units must be at least 1".into()));
    }
    if room.total_units > MAX_UNITS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many units"));
    }
    if room.min_stay_nights < 1 {
        return Err(EngineError::InvalidRoom("min_stay must be at least 1".into()));
    }
    if let Some(max) = room.max_stay_nights
        && max < room.min_stay_nights
    {
        return Err(EngineError::InvalidRoom(format!(
            "max_stay {max} below min_stay {}",
            room.min_stay_nights
        )));
    }
    if room.max_guests < 1 || room.max_guests > MAX_GUESTS {
        return Err(EngineError::InvalidRoom(format!("max_guests {} out of range", room.max_guests)));
    }
    if let (Some(free), Some(limit)) = (room.child_free_until_age, room.child_age_limit)
        && free > limit
    {
        return Err(EngineError::InvalidRoom(format!(
            "child_free_until_age {free} above child_age_limit {limit}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_rate(rate: &SeasonalRate) -> Result<(), EngineError> {
    check_name(&rate.name)?;
    validate_date(rate.start_date)?;
    validate_date(rate.end_date)?;
    if rate.end_date < rate.start_date {
        return Err(EngineError::InvalidDateRange(format!(
            "seasonal rate ends {} before it starts {}",
            rate.end_date, rate.start_date
        )));
    }
    non_negative(rate.price_per_night, "price_per_night")?;
    if let Some(r) = rate.additional_person_rate {
        non_negative(r, "additional_person_rate")?;
    }
    if let Some(r) = rate.child_price_per_night {
        non_negative(r, "child_price")?;
    }
    Ok(())
}

/// Commit-time gate for a new or modified booking.
///
/// Must run under the room's write lock, right before the booking event is
/// appended, so nothing can slip in between the check and the write.
pub(crate) fn check_bookable(
    rs: &RoomState,
    stay: &StayRange,
    exclude: Option<Ulid>,
    extra: &[StayRange],
    override_stay_rules: bool,
) -> Result<Availability, EngineError> {
    let avail = availability(rs, stay, exclude, extra, override_stay_rules);
    if !override_stay_rules && !(avail.meets_min_stay && avail.meets_max_stay) {
        return Err(EngineError::StayRuleViolation {
            nights: avail.nights,
            min_stay_nights: avail.min_stay_nights,
            max_stay_nights: avail.max_stay_nights,
        });
    }
    if avail.available_units == 0 {
        return Err(EngineError::AvailabilityConflict {
            room_id: rs.id(),
            stay: *stay,
            available_units: 0,
        });
    }
    Ok(avail)
}
