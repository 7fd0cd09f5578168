/// Longest stay a single booking may cover.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// How far ahead of today a stay may start.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 730;

/// Widest window `open_ranges` will scan.
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 732;

pub const MAX_BLOCKED_DATES: usize = 1_500;

/// Bookings of any status retained per rental.
pub const MAX_BOOKINGS_PER_RENTAL: usize = 50_000;

pub const MAX_RENTALS: usize = 1_000_000;

pub const MAX_GUESTS: u32 = 64;

/// Highest nightly or weekend rate, in cents.
pub const MAX_NIGHTLY_RATE: u64 = 100_000_000;
