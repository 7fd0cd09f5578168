use chrono::{NaiveDate, Utc};

use crate::model::*;

use super::EngineError;

/// Current UTC calendar day.
pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Build a stay from raw dates, rejecting inverted, empty, past and
/// out-of-horizon ranges.
pub(crate) fn validate_stay(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
) -> Result<Stay, EngineError> {
    use crate::limits::*;
    let stay = Stay::try_new(start, end)
        .ok_or(EngineError::InvalidRange("start date must be before end date"))?;
    if stay.start < today {
        return Err(EngineError::InvalidRange("dates must not be in the past"));
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    if (stay.start - today).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::LimitExceeded("start date too far ahead"));
    }
    Ok(stay)
}

pub(crate) fn check_guests(rs: &RentalState, guests: u32) -> Result<(), EngineError> {
    if guests == 0 {
        return Err(EngineError::InvalidGuests(guests));
    }
    if guests > rs.guests {
        return Err(EngineError::CapacityExceeded {
            requested: guests,
            capacity: rs.guests,
        });
    }
    Ok(())
}

/// Everything standing in the way of `stay`: live bookings and blocked nights.
pub(crate) fn find_conflicts(rs: &RentalState, stay: &Stay) -> AvailabilityResult {
    let conflicting_bookings: Vec<BookingSummary> =
        rs.live_overlapping(stay).map(BookingSummary::from).collect();
    let blocked_dates: Vec<NaiveDate> = rs.blocked_in(stay).copied().collect();
    AvailabilityResult {
        available: conflicting_bookings.is_empty() && blocked_dates.is_empty(),
        conflicting_bookings,
        blocked_dates,
    }
}

pub(crate) fn check_no_conflict(rs: &RentalState, stay: &Stay) -> Result<(), EngineError> {
    let found = find_conflicts(rs, stay);
    if found.available {
        return Ok(());
    }
    Err(EngineError::DateConflict {
        bookings: found.conflicting_bookings.iter().map(|b| b.id).collect(),
        blocked: found.blocked_dates,
    })
}
