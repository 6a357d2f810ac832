use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{AVAILABILITY_CONFLICTS_TOTAL, BOOKINGS_COMMITTED_TOTAL};

use super::conflict::{check_bookable, now_ms, validate_rate, validate_room, validate_stay};
use super::pricing::{quote, validate_guests};
use super::{apply_to_room, Engine, EngineError, SharedRoomState, WalCommand};

/// Count guard rejections before handing the error back.
fn note_rejection(room_id: Ulid, err: EngineError) -> EngineError {
    match &err {
        EngineError::AvailabilityConflict { .. } => {
            metrics::counter!(AVAILABILITY_CONFLICTS_TOTAL, "reason" => "units").increment(1);
            tracing::debug!(%room_id, "{err}");
        }
        EngineError::StayRuleViolation { .. } => {
            metrics::counter!(AVAILABILITY_CONFLICTS_TOTAL, "reason" => "stay_rules").increment(1);
            tracing::debug!(%room_id, "{err}");
        }
        _ => {}
    }
    err
}

fn check_len(value: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.as_ref().is_some_and(|v| v.len() > max) {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_amount(amount: Decimal) -> Result<(), EngineError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(EngineError::InvalidBooking(format!("total_amount {amount} is negative")));
    }
    Ok(())
}

/// Validate a new booking against the locked room and build the record.
///
/// `extra` holds stays already accepted earlier in the same batch.
fn prepare_booking(
    rs: &RoomState,
    nb: NewBooking,
    extra: &[StayRange],
    now: Ms,
) -> Result<Booking, EngineError> {
    check_len(&nb.guest_name, MAX_NAME_LEN, "guest name too long")?;
    check_len(&nb.guest_email, MAX_EMAIL_LEN, "guest email too long")?;
    if !nb.status.is_modifiable() {
        return Err(EngineError::InvalidBooking(format!(
            "booking cannot start out {}",
            nb.status
        )));
    }
    let stay = validate_stay(nb.check_in, nb.check_out)?;
    validate_guests(&rs.room, &nb.guests)?;
    if rs.bookings.len() + extra.len() >= MAX_BOOKINGS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many bookings on room"));
    }
    let currency = nb.currency.unwrap_or_else(|| rs.room.currency.clone());
    if currency.is_empty() || currency.len() > MAX_CURRENCY_LEN {
        return Err(EngineError::InvalidBooking(format!("bad currency tag: {currency:?}")));
    }
    if let Some(amount) = nb.total_amount {
        check_amount(amount)?;
    }

    check_bookable(rs, &stay, None, extra, nb.override_stay_rules)
        .map_err(|e| note_rejection(rs.id(), e))?;

    let total_amount = match nb.total_amount {
        Some(amount) => amount,
        None => quote(rs, &stay, &nb.guests).total_amount,
    };

    Ok(Booking {
        id: nb.id,
        room_id: rs.id(),
        stay,
        status: nb.status,
        guest_name: nb.guest_name,
        guest_email: nb.guest_email,
        guests: nb.guests,
        total_amount,
        currency,
        stay_rule_override: nb.override_stay_rules,
        created_at: now,
    })
}

impl Engine {
    /// Reserve booking ids in the entity index, all or none.
    fn claim_booking_ids(&self, claims: &[(Ulid, Ulid)]) -> Result<(), EngineError> {
        for (n, &(id, room_id)) in claims.iter().enumerate() {
            let taken = self.state.contains_key(&id)
                || match self.entity_to_room.entry(id) {
                    Entry::Occupied(_) => true,
                    Entry::Vacant(slot) => {
                        slot.insert(room_id);
                        false
                    }
                };
            if taken {
                self.release_booking_ids(&claims[..n]);
                return Err(EngineError::AlreadyExists(id));
            }
        }
        Ok(())
    }

    fn release_booking_ids(&self, claims: &[(Ulid, Ulid)]) {
        for (id, _) in claims {
            self.entity_to_room.remove(id);
        }
    }

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        let _room_set = self.room_set_lock.write().await;
        if self.state.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        validate_room(&room)?;
        if self.state.contains_key(&room.id) || self.entity_to_room.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }

        let id = room.id;
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.state.insert(id, Arc::new(RwLock::new(RoomState::new(room))));
        tracing::debug!(room_id = %id, "room created");
        Ok(())
    }

    /// Apply column changes to a room. Existing bookings keep their amounts.
    pub async fn update_room(&self, id: Ulid, changes: &[RoomChange]) -> Result<Room, EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let mut room = guard.room.clone();
        for change in changes {
            change.apply(&mut room);
        }
        validate_room(&room)?;

        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room)
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _room_set = self.room_set_lock.write().await;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;
        if guard.has_active_bookings() {
            return Err(EngineError::HasBookings(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        for booking in &guard.bookings {
            self.entity_to_room.remove(&booking.id);
        }
        for rate in &guard.seasonal_rates {
            self.entity_to_room.remove(&rate.id);
        }
        drop(guard);
        self.state.remove(&id);
        tracing::debug!(room_id = %id, "room deleted");
        Ok(())
    }

    /// Attach a seasonal rate to its room. The creation stamp is assigned
    /// here and breaks priority ties in favour of the newer rate.
    pub async fn add_seasonal_rate(&self, mut rate: SeasonalRate) -> Result<SeasonalRate, EngineError> {
        validate_rate(&rate)?;
        let rs = self
            .get_room(&rate.room_id)
            .ok_or(EngineError::NotFound(rate.room_id))?;
        let mut guard = rs.write().await;
        if guard.seasonal_rates.len() >= MAX_SEASONAL_RATES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many seasonal rates on room"));
        }
        if self.entity_to_room.contains_key(&rate.id) || self.state.contains_key(&rate.id) {
            return Err(EngineError::AlreadyExists(rate.id));
        }

        rate.created_at = now_ms();
        let event = Event::SeasonalRateAdded { rate: rate.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(rate)
    }

    pub async fn update_seasonal_rate(
        &self,
        id: Ulid,
        changes: &[RateChange],
    ) -> Result<SeasonalRate, EngineError> {
        let (_, mut guard) = self.resolve_entity_write(&id).await?;
        let mut rate = guard.rate(id).cloned().ok_or(EngineError::NotFound(id))?;
        for change in changes {
            change.apply(&mut rate);
        }
        validate_rate(&rate)?;

        let event = Event::SeasonalRateUpdated { rate: rate.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(rate)
    }

    pub async fn remove_seasonal_rate(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.rate(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::SeasonalRateRemoved { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(room_id)
    }

    /// Commit one booking. The guard re-check, WAL append and in-memory apply
    /// all happen under the room's write lock.
    pub async fn create_booking(&self, nb: NewBooking) -> Result<Booking, EngineError> {
        let room_id = nb.room_id;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        let claim = [(nb.id, room_id)];
        self.claim_booking_ids(&claim)?;

        let committed = match prepare_booking(&guard, nb, &[], now_ms()) {
            Ok(booking) => {
                let event = Event::BookingCreated { booking: booking.clone() };
                self.persist_and_apply(&mut guard, &event).await.map(|()| booking)
            }
            Err(e) => Err(e),
        };
        let booking = committed.inspect_err(|_| self.release_booking_ids(&claim))?;

        metrics::counter!(BOOKINGS_COMMITTED_TOTAL).increment(1);
        tracing::info!(
            booking_id = %booking.id,
            %room_id,
            stay = %booking.stay,
            total = %booking.total_amount,
            "booking committed"
        );
        Ok(booking)
    }

    /// Atomically commit several bookings. All-or-nothing: if any one is
    /// rejected or the log write fails, none are written or applied.
    /// Bookings may span different rooms, and bookings in the same batch
    /// count against each other's inventory.
    pub async fn batch_create_bookings(
        &self,
        bookings: Vec<NewBooking>,
    ) -> Result<Vec<Booking>, EngineError> {
        if bookings.is_empty() {
            return Ok(Vec::new());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }

        let mut seen = HashSet::new();
        for nb in &bookings {
            if !seen.insert(nb.id) {
                return Err(EngineError::AlreadyExists(nb.id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut room_ids: Vec<Ulid> = bookings.iter().map(|nb| nb.room_id).collect();
        room_ids.sort();
        room_ids.dedup();

        let mut guards = Vec::with_capacity(room_ids.len());
        let mut slot = HashMap::new();
        for rid in &room_ids {
            let rs = self.get_room(rid).ok_or(EngineError::NotFound(*rid))?;
            slot.insert(*rid, guards.len());
            guards.push(rs.write_owned().await);
        }

        let claims: Vec<(Ulid, Ulid)> = bookings.iter().map(|nb| (nb.id, nb.room_id)).collect();
        self.claim_booking_ids(&claims)?;

        // Phase 1: validate everything against current state plus the
        // stays accepted so far in this batch.
        let now = now_ms();
        let mut pending: HashMap<Ulid, Vec<StayRange>> = HashMap::new();
        let mut prepared = Vec::with_capacity(bookings.len());
        for nb in bookings {
            let rid = nb.room_id;
            let extra = pending.entry(rid).or_default();
            match prepare_booking(&guards[slot[&rid]], nb, extra, now) {
                Ok(booking) => {
                    extra.push(booking.stay);
                    prepared.push(booking);
                }
                Err(e) => {
                    self.release_booking_ids(&claims);
                    return Err(e);
                }
            }
        }

        // Phase 2: one durable write for the whole batch, then apply.
        let events: Vec<Event> = prepared
            .iter()
            .map(|booking| Event::BookingCreated { booking: booking.clone() })
            .collect();
        if let Err(e) = self.wal_append_batch(events.clone()).await {
            self.release_booking_ids(&claims);
            return Err(e);
        }
        for (booking, event) in prepared.iter().zip(&events) {
            apply_to_room(&mut guards[slot[&booking.room_id]], event, &self.entity_to_room);
        }

        metrics::counter!(BOOKINGS_COMMITTED_TOTAL).increment(prepared.len() as u64);
        tracing::info!(count = prepared.len(), rooms = room_ids.len(), "booking batch committed");
        Ok(prepared)
    }

    /// Move a booking's check-in and/or check-out. The booking's own unit is
    /// excluded from the re-check so shrinking or shifting never conflicts
    /// with itself. Without an explicit amount the new stay is re-priced.
    pub async fn resize_booking(
        &self,
        id: Ulid,
        new_check_in: Option<NaiveDate>,
        new_check_out: Option<NaiveDate>,
        override_stay_rules: bool,
        total_amount: Option<Decimal>,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let current = guard.booking(id).cloned().ok_or(EngineError::NotFound(id))?;
        if !current.status.is_modifiable() {
            return Err(EngineError::InvalidBooking(format!(
                "booking {id} is {} and cannot be resized",
                current.status
            )));
        }
        if let Some(amount) = total_amount {
            check_amount(amount)?;
        }

        let stay = validate_stay(
            new_check_in.unwrap_or(current.stay.check_in),
            new_check_out.unwrap_or(current.stay.check_out),
        )?;
        check_bookable(&guard, &stay, Some(id), &[], override_stay_rules)
            .map_err(|e| note_rejection(room_id, e))?;

        let total_amount =
            total_amount.unwrap_or_else(|| quote(&guard, &stay, &current.guests).total_amount);
        let event = Event::BookingResized {
            id,
            room_id,
            stay,
            total_amount,
            stay_rule_override: override_stay_rules,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(booking_id = %id, %room_id, from = %current.stay, to = %stay, "booking resized");

        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Move a booking along its status machine.
    pub async fn transition_booking(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let from = guard.booking(id).map(|b| b.status).ok_or(EngineError::NotFound(id))?;
        if !from.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { id, from, to: status });
        }

        let event = Event::BookingStatusChanged { id, room_id, status };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::debug!(booking_id = %id, %from, to = %status, "booking status changed");

        guard.booking(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.transition_booking(id, BookingStatus::Cancelled).await
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let room_set = self.room_set_lock.write().await;
        // Same lock order as batch commits.
        let mut rooms: Vec<(Ulid, SharedRoomState)> =
            self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        rooms.sort_by_key(|(id, _)| *id);
        let mut events = Vec::new();

        // Read guards stay held until the rewrite lands so no booking write
        // can reach the old log after its room was snapshotted.
        let mut guards = Vec::with_capacity(rooms.len());
        for (_, rs) in rooms {
            let guard = rs.read_owned().await;
            events.push(Event::RoomCreated { room: guard.room.clone() });
            for rate in &guard.seasonal_rates {
                events.push(Event::SeasonalRateAdded { rate: rate.clone() });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated { booking: booking.clone() });
            }
            guards.push(guard);
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);
        drop(room_set);
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
