use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type RentalId = Ulid;
pub type BookingId = Ulid;
pub type UserId = Ulid;

/// Money in minor currency units (cents).
pub type Cents = u64;

/// Half-open range of nights `[start, end)`. `end` is the checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "Stay start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Every occupied night, checkout day excluded.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d < self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    /// Live bookings constrain availability; cancelled ones do not.
    pub fn is_live(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_become(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub rental_id: RentalId,
    pub user_id: UserId,
    pub stay: Stay,
    pub guests: u32,
    pub total_price: Cents,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a host's new blocked-date list combines with the existing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    #[default]
    Replace,
    Merge,
}

/// What the listing service hands the engine when a rental goes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalSpec {
    pub id: RentalId,
    pub owner_id: UserId,
    pub guests: u32,
    pub nightly_rate: Cents,
    pub weekend_rate: Option<Cents>,
}

#[derive(Debug, Clone)]
pub struct RentalState {
    pub id: RentalId,
    pub owner_id: UserId,
    /// Max guests per booking.
    pub guests: u32,
    pub nightly_rate: Cents,
    /// Rate for Friday and Saturday nights; falls back to `nightly_rate`.
    pub weekend_rate: Option<Cents>,
    pub blocked_dates: BTreeSet<NaiveDate>,
    /// All bookings ever made (cancelled included), sorted by `stay.start`.
    pub bookings: Vec<Booking>,
}

impl RentalState {
    pub fn new(spec: &RentalSpec) -> Self {
        Self {
            id: spec.id,
            owner_id: spec.owner_id,
            guests: spec.guests,
            nightly_rate: spec.nightly_rate,
            weekend_rate: spec.weekend_rate,
            blocked_dates: BTreeSet::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by stay.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.stay.start <= booking.stay.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings (any status) whose stay overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.stay.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.end > query.start)
    }

    /// Live bookings overlapping `query`.
    pub fn live_overlapping(&self, query: &Stay) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.status.is_live())
    }

    /// Blocked dates falling on a night of `query`.
    pub fn blocked_in(&self, query: &Stay) -> impl Iterator<Item = &NaiveDate> {
        self.blocked_dates.range(query.start..query.end)
    }

    pub fn live_booking_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.is_live()).count()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RentalRegistered {
        id: RentalId,
        owner_id: UserId,
        guests: u32,
        nightly_rate: Cents,
        weekend_rate: Option<Cents>,
    },
    RentalUpdated {
        id: RentalId,
        guests: u32,
        nightly_rate: Cents,
        weekend_rate: Option<Cents>,
    },
    /// Full resulting set, so replay does not depend on the block mode.
    BlockedDatesSet {
        rental_id: RentalId,
        dates: Vec<NaiveDate>,
    },
    BookingReserved {
        booking: Booking,
    },
    BookingStatusChanged {
        id: BookingId,
        rental_id: RentalId,
        status: BookingStatus,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn rental_id(&self) -> RentalId {
        match self {
            Event::RentalRegistered { id, .. } | Event::RentalUpdated { id, .. } => *id,
            Event::BlockedDatesSet { rental_id, .. }
            | Event::BookingStatusChanged { rental_id, .. } => *rental_id,
            Event::BookingReserved { booking } => booking.rental_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::RentalRegistered { .. } => "rental_registered",
            Event::RentalUpdated { .. } => "rental_updated",
            Event::BlockedDatesSet { .. } => "blocked_dates_set",
            Event::BookingReserved { .. } => "booking_reserved",
            Event::BookingStatusChanged { .. } => "booking_status_changed",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RentalInfo {
    pub id: RentalId,
    pub owner_id: UserId,
    pub guests: u32,
    pub nightly_rate: Cents,
    pub weekend_rate: Option<Cents>,
    pub blocked_dates: Vec<NaiveDate>,
}

impl From<&RentalState> for RentalInfo {
    fn from(rs: &RentalState) -> Self {
        Self {
            id: rs.id,
            owner_id: rs.owner_id,
            guests: rs.guests,
            nightly_rate: rs.nightly_rate,
            weekend_rate: rs.weekend_rate,
            blocked_dates: rs.blocked_dates.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInfo {
    pub id: BookingId,
    pub rental_id: RentalId,
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub nights: i64,
    pub guests: u32,
    pub total_price: Cents,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Booking> for BookingInfo {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            rental_id: b.rental_id,
            user_id: b.user_id,
            start_date: b.stay.start,
            end_date: b.stay.end,
            nights: b.stay.nights(),
            guests: b.guests,
            total_price: b.total_price,
            status: b.status,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

/// What a conflicting booking looks like to someone who does not own it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub id: BookingId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: BookingStatus,
}

impl From<&Booking> for BookingSummary {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            start_date: b.stay.start,
            end_date: b.stay.end,
            status: b.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResult {
    pub available: bool,
    pub conflicting_bookings: Vec<BookingSummary>,
    pub blocked_dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NightlyRate {
    pub date: NaiveDate,
    pub rate: Cents,
    pub weekend: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub rental_id: RentalId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub nights: Vec<NightlyRate>,
    pub total: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl From<Stay> for OpenRange {
    fn from(s: Stay) -> Self {
        Self {
            start_date: s.start,
            end_date: s.end,
        }
    }
}
