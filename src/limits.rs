//! Hard limits enforced by the engine and the tenant manager.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_SEASONAL_RATES_PER_ROOM: usize = 1_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_CURRENCY_LEN: usize = 8;

/// Longest bookable stay.
pub const MAX_STAY_NIGHTS: i64 = 730;
/// Widest window accepted by calendar-style inventory queries.
pub const MAX_QUERY_NIGHTS: i64 = 1_096;

pub const MAX_GUESTS: u32 = 1_000;
pub const MAX_CHILD_AGE: u32 = 120;
pub const MAX_UNITS_PER_ROOM: u32 = 100_000;

/// Calendar dates outside [MIN_VALID_YEAR, MAX_VALID_YEAR] are rejected.
pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 2200;

/// Statements with more VALUES rows than this are rejected.
pub const MAX_BATCH_SIZE: usize = 1_000;
