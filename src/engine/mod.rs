mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod pricing;
mod queries;
mod rates;
#[cfg(test)]
mod tests;

pub use availability::{availability, stay_rules};
pub use error::EngineError;
pub use ledger::{committed_units, inventory_days, nightly_commitments};
pub use pricing::{classify_guests, guests_from_counts, night_charge, quote, Occupancy};
pub use rates::{resolve_rate, resolve_stay, winning_rate};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Several events that must become durable together or not at all.
    AppendBatch {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush what we have before running the other command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendBatch { events, response } => {
            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(events.len() as f64);
            let flush_start = std::time::Instant::now();
            let result = wal.append_batch(&events);
            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                .record(flush_start.elapsed().as_secs_f64());
            if let Err(e) = &result {
                tracing::error!("WAL batch append of {} events failed: {e}", events.len());
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Per-tenant booking engine. Each room sits behind its own RwLock:
/// quotes and availability checks share it, booking commits hold it
/// exclusively from the conflict re-check through the WAL append.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking / seasonal rate id → room id
    pub(super) entity_to_room: DashMap<Ulid, Ulid>,
    /// Held for write by room creation, room deletion and compaction, so a
    /// compaction snapshot always covers every room the log knows about.
    pub(super) room_set_lock: RwLock<()>,
}

/// Apply an event directly to a RoomState. The caller holds the lock.
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { room } => {
            rs.room = room.clone();
        }
        Event::SeasonalRateAdded { rate } | Event::SeasonalRateUpdated { rate } => {
            rs.upsert_rate(rate.clone());
            entity_map.insert(rate.id, rate.room_id);
        }
        Event::SeasonalRateRemoved { id, .. } => {
            rs.remove_rate(*id);
            entity_map.remove(id);
        }
        Event::BookingCreated { booking } => {
            rs.insert_booking(booking.clone());
            entity_map.insert(booking.id, booking.room_id);
        }
        Event::BookingResized {
            id,
            stay,
            total_amount,
            stay_rule_override,
            ..
        } => {
            // Re-insert so the list stays sorted by check-in
            if let Some(mut booking) = rs.remove_booking(*id) {
                booking.stay = *stay;
                booking.total_amount = *total_amount;
                booking.stay_rule_override = *stay_rule_override;
                rs.insert_booking(booking);
            }
        }
        Event::BookingStatusChanged { id, status, .. } => {
            if let Some(booking) = rs.booking_mut(*id) {
                booking.status = *status;
            }
        }
        // RoomCreated/Deleted are handled at the DashMap level, not here
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self::with_writer(wal_tx);

        // We're the sole owner of these Arcs during replay, so try_read/try_write
        // always succeed instantly. Never use blocking_read/blocking_write here:
        // this may run inside an async context (lazy tenant creation).
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    let rs = RoomState::new(room.clone());
                    engine.state.insert(room.id, Arc::new(RwLock::new(rs)));
                }
                Event::RoomDeleted { id } => {
                    engine.forget_room(id);
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = engine.state.get(&room_id) {
                            let rs_arc = entry.clone();
                            drop(entry);
                            if let Ok(mut guard) = rs_arc.try_write() {
                                apply_to_room(&mut guard, other, &engine.entity_to_room);
                            }
                        }
                }
            }
        }

        if !events.is_empty() {
            tracing::info!(
                "replayed {} events into {} rooms from {}",
                events.len(),
                engine.state.len(),
                wal_path.display()
            );
        }

        Ok(engine)
    }

    /// Empty engine feeding an already running WAL writer.
    pub(super) fn with_writer(wal_tx: mpsc::Sender<WalCommand>) -> Self {
        Self {
            state: DashMap::new(),
            wal_tx,
            entity_to_room: DashMap::new(),
            room_set_lock: RwLock::new(()),
        }
    }

    /// Drop a room and its entity index entries from memory.
    fn forget_room(&self, id: &Ulid) {
        if let Some((_, rs)) = self.state.remove(id)
            && let Ok(guard) = rs.try_read() {
                for booking in &guard.bookings {
                    self.entity_to_room.remove(&booking.id);
                }
                for rate in &guard.seasonal_rates {
                    self.entity_to_room.remove(&rate.id);
                }
            }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Write several events as one durable unit.
    async fn wal_append_batch(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendBatch { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.entity_to_room);
        Ok(())
    }

    /// Lookup entity → room, get room, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .get_room_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }

    /// Lookup entity → room, get room, acquire read lock.
    pub(super) async fn resolve_entity_read(
        &self,
        entity_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<RoomState>, EngineError> {
        let room_id = self
            .get_room_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        Ok(rs.read_owned().await)
    }
}

/// Extract the room id from an event (for non-Create/Delete events).
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::RoomUpdated { room } => Some(room.id),
        Event::SeasonalRateAdded { rate } | Event::SeasonalRateUpdated { rate } => Some(rate.room_id),
        Event::BookingCreated { booking } => Some(booking.room_id),
        Event::SeasonalRateRemoved { room_id, .. }
        | Event::BookingResized { room_id, .. }
        | Event::BookingStatusChanged { room_id, .. } => Some(*room_id),
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => None,
    }
}
