use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{open_ranges, price_nights, sum_rates};
use super::conflict::{find_conflicts, today, validate_stay};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_rental(&self, rental_id: RentalId) -> Result<RentalInfo, EngineError> {
        let rs = self.rental_or_not_found(&rental_id)?;
        let guard = rs.read().await;
        Ok(RentalInfo::from(&*guard))
    }

    /// Read-only; may race with a concurrent `reserve`, which stays the
    /// authoritative gate.
    pub async fn check_availability(
        &self,
        rental_id: RentalId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AvailabilityResult, EngineError> {
        let stay = validate_stay(start, end, today())?;
        let rs = self.rental_or_not_found(&rental_id)?;
        let guard = rs.read().await;
        Ok(find_conflicts(&guard, &stay))
    }

    pub async fn quote(
        &self,
        rental_id: RentalId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Quote, EngineError> {
        let stay = validate_stay(start, end, today())?;
        let rs = self.rental_or_not_found(&rental_id)?;
        let guard = rs.read().await;
        let nights = price_nights(&guard, &stay);
        let total = sum_rates(&nights).ok_or(EngineError::LimitExceeded("stay price too large"))?;
        Ok(Quote {
            rental_id,
            start_date: stay.start,
            end_date: stay.end,
            nights,
            total,
        })
    }

    /// Bookable runs inside `[from, to)`. Nights before today are never open.
    pub async fn open_ranges(
        &self,
        rental_id: RentalId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OpenRange>, EngineError> {
        let window = Stay::try_new(from, to)
            .ok_or(EngineError::InvalidRange("from must be before to"))?;
        if window.nights() > MAX_CALENDAR_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("calendar window too wide"));
        }
        let rs = self.rental_or_not_found(&rental_id)?;
        let Some(window) = Stay::try_new(window.start.max(today()), window.end) else {
            return Ok(Vec::new());
        };
        let guard = rs.read().await;
        Ok(open_ranges(&guard, &window)
            .into_iter()
            .map(OpenRange::from)
            .collect())
    }

    /// Visible to the guest who made it and to the rental's owner.
    pub async fn get_booking(
        &self,
        booking_id: BookingId,
        actor: UserId,
    ) -> Result<BookingInfo, EngineError> {
        let guard = self.resolve_booking_read(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.user_id != actor && guard.owner_id != actor {
            return Err(EngineError::Forbidden {
                actor,
                target: booking_id,
            });
        }
        Ok(BookingInfo::from(booking))
    }

    /// All bookings on a rental, cancelled included. Owner only.
    pub async fn bookings_for_rental(
        &self,
        rental_id: RentalId,
        actor: UserId,
    ) -> Result<Vec<BookingInfo>, EngineError> {
        let rs = self.rental_or_not_found(&rental_id)?;
        let guard = rs.read().await;
        if guard.owner_id != actor {
            return Err(EngineError::Forbidden {
                actor,
                target: rental_id,
            });
        }
        Ok(guard.bookings.iter().map(BookingInfo::from).collect())
    }

    /// A guest's trips, in reservation order.
    pub async fn bookings_for_guest(&self, user_id: UserId) -> Vec<BookingInfo> {
        let ids: Vec<BookingId> = self
            .index
            .by_guest
            .get(&user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Ok(guard) = self.resolve_booking_read(&id).await else {
                continue;
            };
            if let Some(b) = guard.booking(id) {
                out.push(BookingInfo::from(b));
            }
        }
        out
    }
}
