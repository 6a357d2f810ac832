use ulid::Ulid;

use crate::model::{BookingStatus, StayRange};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidDateRange(String),
    GuestCountInvalid(String),
    InvalidRoom(String),
    InvalidBooking(String),
    /// Not enough free units left for the requested stay.
    AvailabilityConflict {
        room_id: Ulid,
        stay: StayRange,
        available_units: u32,
    },
    StayRuleViolation {
        nights: i64,
        min_stay_nights: u32,
        max_stay_nights: Option<u32>,
    },
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    HasBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidDateRange(msg) => write!(f, "invalid date range: {msg}"),
            EngineError::GuestCountInvalid(msg) => write!(f, "invalid guest count: {msg}"),
            EngineError::InvalidRoom(msg) => write!(f, "invalid room: {msg}"),
            EngineError::InvalidBooking(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::AvailabilityConflict {
                room_id,
                stay,
                available_units,
            } => write!(
                f,
                "availability conflict on room {room_id} for {stay}: {available_units} units free"
            ),
            EngineError::StayRuleViolation {
                nights,
                min_stay_nights,
                max_stay_nights,
            } => match max_stay_nights {
                Some(max) => write!(
                    f,
                    "stay of {nights} nights outside allowed range {min_stay_nights}..={max}"
                ),
                None => write!(
                    f,
                    "stay of {nights} nights shorter than minimum {min_stay_nights}"
                ),
            },
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id}: cannot move from {from} to {to}")
            }
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete room {id}: has active bookings")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
