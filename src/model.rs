use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Only used for engine-assigned creation stamps.
pub type Ms = i64;

/// Half-open range of nights `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "StayRange check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    /// True if `date` is one of the charged nights. `check_out` never is.
    pub fn contains_night(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.check_out
    }

    /// Every night of the stay in calendar order.
    pub fn night_dates(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let n = self.nights().max(0) as usize;
        self.check_in.iter_days().take(n)
    }

    /// Overlapping part of two ranges, if any.
    pub fn intersect(&self, other: &StayRange) -> Option<StayRange> {
        let check_in = self.check_in.max(other.check_in);
        let check_out = self.check_out.min(other.check_out);
        (check_in < check_out).then(|| StayRange::new(check_in, check_out))
    }
}

impl fmt::Display for StayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

// ── Enumerations ─────────────────────────────────────────────────

/// How occupant count affects the nightly charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PricingMode {
    PerUnit,
    PerPerson,
    PerPersonSharing,
}

impl PricingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingMode::PerUnit => "per_unit",
            PricingMode::PerPerson => "per_person",
            PricingMode::PerPersonSharing => "per_person_sharing",
        }
    }
}

impl FromStr for PricingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per_unit" => Ok(PricingMode::PerUnit),
            "per_person" => Ok(PricingMode::PerPerson),
            "per_person_sharing" => Ok(PricingMode::PerPersonSharing),
            other => Err(format!("unknown pricing mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryMode {
    /// One physical room; `total_units` is ignored.
    SingleUnit,
    /// A room type with `total_units` identical units.
    RoomType,
}

impl InventoryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryMode::SingleUnit => "single_unit",
            InventoryMode::RoomType => "room_type",
        }
    }
}

impl FromStr for InventoryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_unit" => Ok(InventoryMode::SingleUnit),
            "room_type" => Ok(InventoryMode::RoomType),
            other => Err(format!("unknown inventory mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked_in",
            BookingStatus::CheckedOut => "checked_out",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Every status except `Cancelled` holds a unit.
    pub fn consumes_inventory(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    /// Stay dates may only change while the guest has not left.
    pub fn is_modifiable(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::CheckedIn
        )
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, CheckedIn)
                | (CheckedIn, CheckedOut)
                | (CheckedOut, Completed)
                | (Pending | Confirmed | CheckedIn, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "checked_in" => Ok(BookingStatus::CheckedIn),
            "checked_out" => Ok(BookingStatus::CheckedOut),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: Option<String>,
    /// Opaque currency tag, copied onto every quote and booking.
    pub currency: String,
    pub pricing_mode: PricingMode,
    pub base_price_per_night: Decimal,
    /// Charge per occupant beyond the first (`per_person_sharing` only).
    pub additional_person_rate: Option<Decimal>,
    pub child_price_per_night: Option<Decimal>,
    /// Children younger than this stay free.
    pub child_free_until_age: Option<u32>,
    /// Children this old or older are priced as adults.
    pub child_age_limit: Option<u32>,
    pub min_stay_nights: u32,
    pub max_stay_nights: Option<u32>,
    pub inventory_mode: InventoryMode,
    pub total_units: u32,
    pub max_guests: u32,
}

impl Room {
    /// A single-unit, per-unit priced room with no stay or child rules.
    pub fn new(id: Ulid, currency: impl Into<String>, base_price_per_night: Decimal) -> Self {
        Self {
            id,
            name: None,
            currency: currency.into(),
            pricing_mode: PricingMode::PerUnit,
            base_price_per_night,
            additional_person_rate: None,
            child_price_per_night: None,
            child_free_until_age: None,
            child_age_limit: None,
            min_stay_nights: 1,
            max_stay_nights: None,
            inventory_mode: InventoryMode::SingleUnit,
            total_units: 1,
            max_guests: 2,
        }
    }

    /// Units the ledger is allowed to hand out.
    pub fn bookable_units(&self) -> u32 {
        match self.inventory_mode {
            InventoryMode::SingleUnit => 1,
            InventoryMode::RoomType => self.total_units,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalRate {
    pub id: Ulid,
    pub room_id: Ulid,
    pub name: Option<String>,
    /// Inclusive.
    pub start_date: NaiveDate,
    /// Inclusive.
    pub end_date: NaiveDate,
    pub price_per_night: Decimal,
    pub priority: i32,
    /// Overrides the room's mode for covered nights when set.
    pub pricing_mode: Option<PricingMode>,
    pub additional_person_rate: Option<Decimal>,
    pub child_price_per_night: Option<Decimal>,
    pub created_at: Ms,
}

impl SeasonalRate {
    pub fn new(id: Ulid, room_id: Ulid, start_date: NaiveDate, end_date: NaiveDate, price_per_night: Decimal) -> Self {
        Self {
            id,
            room_id,
            name: None,
            start_date,
            end_date,
            price_per_night,
            priority: 0,
            pricing_mode: None,
            additional_person_rate: None,
            child_price_per_night: None,
            created_at: 0,
        }
    }

    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// One column assignment from an update on a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomChange {
    Name(Option<String>),
    Currency(String),
    PricingMode(PricingMode),
    BasePrice(Decimal),
    AdditionalPersonRate(Option<Decimal>),
    ChildPrice(Option<Decimal>),
    ChildFreeUntilAge(Option<u32>),
    ChildAgeLimit(Option<u32>),
    MinStayNights(u32),
    MaxStayNights(Option<u32>),
    InventoryMode(InventoryMode),
    TotalUnits(u32),
    MaxGuests(u32),
}

impl RoomChange {
    pub fn apply(&self, room: &mut Room) {
        match self {
            RoomChange::Name(v) => room.name = v.clone(),
            RoomChange::Currency(v) => room.currency = v.clone(),
            RoomChange::PricingMode(v) => room.pricing_mode = *v,
            RoomChange::BasePrice(v) => room.base_price_per_night = *v,
            RoomChange::AdditionalPersonRate(v) => room.additional_person_rate = *v,
            RoomChange::ChildPrice(v) => room.child_price_per_night = *v,
            RoomChange::ChildFreeUntilAge(v) => room.child_free_until_age = *v,
            RoomChange::ChildAgeLimit(v) => room.child_age_limit = *v,
            RoomChange::MinStayNights(v) => room.min_stay_nights = *v,
            RoomChange::MaxStayNights(v) => room.max_stay_nights = *v,
            RoomChange::InventoryMode(v) => room.inventory_mode = *v,
            RoomChange::TotalUnits(v) => room.total_units = *v,
            RoomChange::MaxGuests(v) => room.max_guests = *v,
        }
    }
}

/// One column assignment from an update on a seasonal rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateChange {
    Name(Option<String>),
    StartDate(NaiveDate),
    EndDate(NaiveDate),
    PricePerNight(Decimal),
    Priority(i32),
    PricingMode(Option<PricingMode>),
    AdditionalPersonRate(Option<Decimal>),
    ChildPrice(Option<Decimal>),
}

impl RateChange {
    pub fn apply(&self, rate: &mut SeasonalRate) {
        match self {
            RateChange::Name(v) => rate.name = v.clone(),
            RateChange::StartDate(v) => rate.start_date = *v,
            RateChange::EndDate(v) => rate.end_date = *v,
            RateChange::PricePerNight(v) => rate.price_per_night = *v,
            RateChange::Priority(v) => rate.priority = *v,
            RateChange::PricingMode(v) => rate.pricing_mode = *v,
            RateChange::AdditionalPersonRate(v) => rate.additional_person_rate = *v,
            RateChange::ChildPrice(v) => rate.child_price_per_night = *v,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestComposition {
    pub adults: u32,
    pub children: u32,
    /// Ages at check-in for the first `child_ages.len()` children.
    pub child_ages: Vec<u32>,
}

impl GuestComposition {
    pub fn adults(adults: u32) -> Self {
        Self {
            adults,
            ..Self::default()
        }
    }

    pub fn occupants(&self) -> u32 {
        self.adults.saturating_add(self.children)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub stay: StayRange,
    pub status: BookingStatus,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guests: GuestComposition,
    /// Captured at creation; later rate changes do not touch it.
    pub total_amount: Decimal,
    pub currency: String,
    /// Set when the stay was accepted despite failing min/max stay rules.
    pub stay_rule_override: bool,
    pub created_at: Ms,
}

/// Write-side request for a new booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub guests: GuestComposition,
    /// Amount agreed with the guest. `None` prices the stay at commit time.
    pub total_amount: Option<Decimal>,
    pub currency: Option<String>,
    pub status: BookingStatus,
    pub override_stay_rules: bool,
}

impl NewBooking {
    pub fn new(id: Ulid, room_id: Ulid, check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self {
            id,
            room_id,
            check_in,
            check_out,
            guest_name: None,
            guest_email: None,
            guests: GuestComposition::default(),
            total_amount: None,
            currency: None,
            status: BookingStatus::Pending,
            override_stay_rules: false,
        }
    }
}

/// All mutable state for a single room. Bookings sorted by `stay.check_in`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub seasonal_rates: Vec<SeasonalRate>,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            seasonal_rates: Vec::new(),
            bookings: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.room.id
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.stay.check_in <= booking.stay.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings (any status) whose stay overlaps `query`.
    /// Binary search skips bookings checking in at or after `query.check_out`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.check_in < query.check_out);
        let check_in = query.check_in;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.check_out > check_in)
    }

    pub fn has_active_bookings(&self) -> bool {
        self.bookings.iter().any(|b| b.status.consumes_inventory())
    }

    pub fn upsert_rate(&mut self, rate: SeasonalRate) {
        match self.seasonal_rates.iter_mut().find(|r| r.id == rate.id) {
            Some(existing) => *existing = rate,
            None => self.seasonal_rates.push(rate),
        }
    }

    pub fn remove_rate(&mut self, id: Ulid) -> Option<SeasonalRate> {
        let pos = self.seasonal_rates.iter().position(|r| r.id == id)?;
        Some(self.seasonal_rates.remove(pos))
    }

    pub fn rate(&self, id: Ulid) -> Option<&SeasonalRate> {
        self.seasonal_rates.iter().find(|r| r.id == id)
    }
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    SeasonalRateAdded {
        rate: SeasonalRate,
    },
    SeasonalRateUpdated {
        rate: SeasonalRate,
    },
    SeasonalRateRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingResized {
        id: Ulid,
        room_id: Ulid,
        stay: StayRange,
        total_amount: Decimal,
        stay_rule_override: bool,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonalRateRef {
    pub id: Ulid,
    pub name: Option<String>,
    pub price_per_night: Decimal,
}

/// Pricing parameters in force for one night after seasonal resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingTerms {
    pub mode: PricingMode,
    pub additional_person_rate: Option<Decimal>,
    pub child_price_per_night: Option<Decimal>,
}

/// Output of the rate resolver for one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRate {
    pub date: NaiveDate,
    pub base_price: Decimal,
    pub effective_price: Decimal,
    pub seasonal_rate: Option<SeasonalRateRef>,
    pub terms: PricingTerms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePrice {
    pub date: NaiveDate,
    pub base_price: Decimal,
    pub effective_price: Decimal,
    pub seasonal_rate: Option<SeasonalRateRef>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NightQuote {
    pub date: NaiveDate,
    pub base_price: Decimal,
    pub effective_price: Decimal,
    /// What the guest pays for this night after occupancy rules.
    pub charge: Decimal,
    pub seasonal_rate: Option<SeasonalRateRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricingQuote {
    pub room_id: Ulid,
    pub nights: Vec<NightQuote>,
    pub total_amount: Decimal,
    pub currency: String,
    pub night_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub available_units: u32,
    pub total_units: u32,
    pub nights: i64,
    pub min_stay_nights: u32,
    pub max_stay_nights: Option<u32>,
    pub meets_min_stay: bool,
    pub meets_max_stay: bool,
}

/// One calendar cell: unit usage for a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryDay {
    pub date: NaiveDate,
    pub committed_units: u32,
    pub available_units: u32,
    pub total_units: u32,
}
