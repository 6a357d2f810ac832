use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::availability::availability;
use super::conflict::{validate_date, validate_stay, validate_window};
use super::ledger::inventory_days;
use super::pricing::{quote, validate_guests};
use super::rates::resolve_rate;
use super::{Engine, EngineError, SharedRoomState};

impl Engine {
    fn room_or_not_found(&self, room_id: Ulid) -> Result<SharedRoomState, EngineError> {
        self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))
    }

    /// Nightly price in force on `date`, with the seasonal rate that set it.
    pub async fn get_effective_price(
        &self,
        room_id: Ulid,
        date: NaiveDate,
    ) -> Result<EffectivePrice, EngineError> {
        validate_date(date)?;
        let rs = self.room_or_not_found(room_id)?;
        let guard = rs.read().await;
        let resolved = resolve_rate(&guard, date);
        Ok(EffectivePrice {
            date,
            base_price: resolved.base_price,
            effective_price: resolved.effective_price,
            seasonal_rate: resolved.seasonal_rate,
            currency: guard.room.currency.clone(),
        })
    }

    /// Night-by-night quote for `[start_date, end_date)`.
    pub async fn get_batch_pricing(
        &self,
        room_id: Ulid,
        start_date: NaiveDate,
        end_date: NaiveDate,
        guests: &GuestComposition,
    ) -> Result<PricingQuote, EngineError> {
        let stay = validate_stay(start_date, end_date)?;
        let rs = self.room_or_not_found(room_id)?;
        let guard = rs.read().await;
        validate_guests(&guard.room, guests)?;
        Ok(quote(&guard, &stay, guests))
    }

    /// Never fails for lack of units: a full room is reported, not rejected.
    /// Ranges longer than any bookable stay are answered as unavailable
    /// with `meets_max_stay` false, even under an override.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        override_stay_rules: bool,
    ) -> Result<Availability, EngineError> {
        let stay = validate_window(check_in, check_out)?;
        let rs = self.room_or_not_found(room_id)?;
        let guard = rs.read().await;
        let mut result = availability(&guard, &stay, None, &[], override_stay_rules);
        if stay.nights() > MAX_STAY_NIGHTS {
            result.meets_max_stay = false;
            result.available = false;
        }
        Ok(result)
    }

    /// Per-date unit usage over `[start, end)`.
    pub async fn get_inventory(
        &self,
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InventoryDay>, EngineError> {
        let window = validate_window(start, end)?;
        let rs = self.room_or_not_found(room_id)?;
        let guard = rs.read().await;
        Ok(inventory_days(&guard, &window))
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let rooms: Vec<SharedRoomState> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(rooms.len());
        for rs in rooms {
            out.push(rs.read().await.room.clone());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_room_info(&self, room_id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_or_not_found(room_id)?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn get_seasonal_rates(&self, room_id: Ulid) -> Vec<SeasonalRate> {
        let Some(rs) = self.get_room(&room_id) else {
            return vec![];
        };
        let guard = rs.read().await;
        let mut rates = guard.seasonal_rates.clone();
        rates.sort_by_key(|r| (r.start_date, r.id));
        rates
    }

    pub async fn get_bookings(&self, room_id: Ulid) -> Vec<Booking> {
        let Some(rs) = self.get_room(&room_id) else {
            return vec![];
        };
        let guard = rs.read().await;
        guard.bookings.clone()
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }
}
