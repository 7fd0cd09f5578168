use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::total_price;
use super::conflict::{check_guests, check_no_conflict, today, validate_stay};
use super::{Engine, EngineError, WalCommand};

fn check_capacity_setting(guests: u32) -> Result<(), EngineError> {
    if guests == 0 || guests > MAX_GUESTS {
        return Err(EngineError::InvalidGuests(guests));
    }
    Ok(())
}

fn check_rates(nightly_rate: Cents, weekend_rate: Option<Cents>) -> Result<(), EngineError> {
    if nightly_rate > MAX_NIGHTLY_RATE || weekend_rate.is_some_and(|w| w > MAX_NIGHTLY_RATE) {
        return Err(EngineError::LimitExceeded("nightly rate too large"));
    }
    Ok(())
}

fn check_owner(rs: &RentalState, actor: UserId) -> Result<(), EngineError> {
    if rs.owner_id != actor {
        return Err(EngineError::Forbidden {
            actor,
            target: rs.id,
        });
    }
    Ok(())
}

impl Engine {
    pub async fn register_rental(&self, spec: RentalSpec) -> Result<RentalInfo, EngineError> {
        check_capacity_setting(spec.guests)?;
        check_rates(spec.nightly_rate, spec.weekend_rate)?;
        let _registering = self.register_lock.lock().await;
        if self.state.len() >= MAX_RENTALS {
            return Err(EngineError::LimitExceeded("too many rentals"));
        }
        if self.state.contains_key(&spec.id) {
            return Err(EngineError::AlreadyExists(spec.id));
        }

        let event = Event::RentalRegistered {
            id: spec.id,
            owner_id: spec.owner_id,
            guests: spec.guests,
            nightly_rate: spec.nightly_rate,
            weekend_rate: spec.weekend_rate,
        };
        self.wal_append(&event).await?;
        let rs = RentalState::new(&spec);
        let info = RentalInfo::from(&rs);
        self.state.insert(spec.id, Arc::new(RwLock::new(rs)));
        self.notify.send(spec.id, &event);
        metrics::gauge!(crate::observability::RENTALS_LOADED).set(self.state.len() as f64);
        info!("rental {} registered by {}", spec.id, spec.owner_id);
        Ok(info)
    }

    pub async fn update_rental(
        &self,
        rental_id: RentalId,
        actor: UserId,
        guests: u32,
        nightly_rate: Cents,
        weekend_rate: Option<Cents>,
    ) -> Result<RentalInfo, EngineError> {
        check_capacity_setting(guests)?;
        check_rates(nightly_rate, weekend_rate)?;
        let rs = self.rental_or_not_found(&rental_id)?;
        let mut guard = rs.write().await;
        check_owner(&guard, actor)?;

        let event = Event::RentalUpdated {
            id: rental_id,
            guests,
            nightly_rate,
            weekend_rate,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(RentalInfo::from(&*guard))
    }

    /// Host-side blocking. Existing bookings are left untouched even when they
    /// cover a newly blocked date; only later checks and reservations see it.
    pub async fn block_dates(
        &self,
        rental_id: RentalId,
        actor: UserId,
        dates: Vec<NaiveDate>,
        mode: BlockMode,
    ) -> Result<RentalInfo, EngineError> {
        let rs = self.rental_or_not_found(&rental_id)?;
        let mut guard = rs.write().await;
        check_owner(&guard, actor)?;

        let next: BTreeSet<NaiveDate> = match mode {
            BlockMode::Replace => dates.into_iter().collect(),
            BlockMode::Merge => guard.blocked_dates.iter().copied().chain(dates).collect(),
        };
        if next.len() > MAX_BLOCKED_DATES {
            return Err(EngineError::LimitExceeded("too many blocked dates"));
        }

        let covered = guard
            .bookings
            .iter()
            .filter(|b| b.status.is_live())
            .filter(|b| next.range(b.stay.start..b.stay.end).next().is_some())
            .count();
        if covered > 0 {
            info!("rental {rental_id}: {covered} live booking(s) overlap blocked dates, left as-is");
        }

        let event = Event::BlockedDatesSet {
            rental_id,
            dates: next.into_iter().collect(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(RentalInfo::from(&*guard))
    }

    /// Check and insert under the rental's write lock: for overlapping
    /// concurrent calls exactly one commits, the rest get `DateConflict`.
    pub async fn reserve(
        &self,
        rental_id: RentalId,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
        guests: u32,
    ) -> Result<Booking, EngineError> {
        let result = self.try_reserve(rental_id, user_id, start, end, guests).await;
        let outcome = match &result {
            Ok(_) => "committed",
            Err(e) => e.kind(),
        };
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => outcome)
            .increment(1);
        result
    }

    async fn try_reserve(
        &self,
        rental_id: RentalId,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
        guests: u32,
    ) -> Result<Booking, EngineError> {
        let stay = validate_stay(start, end, today())?;
        let rs = self.rental_or_not_found(&rental_id)?;
        let mut guard = rs.write().await;
        check_guests(&guard, guests)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_RENTAL {
            return Err(EngineError::LimitExceeded("too many bookings on rental"));
        }

        if let Err(e) = check_no_conflict(&guard, &stay) {
            debug!("reserve {rental_id} [{}, {}) rejected: {e}", stay.start, stay.end);
            return Err(e);
        }

        let price = total_price(&guard, &stay)
            .ok_or(EngineError::LimitExceeded("stay price too large"))?;
        let now = Utc::now();
        let booking = Booking {
            id: Ulid::new(),
            rental_id,
            user_id,
            stay,
            guests,
            total_price: price,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingReserved {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            "booking {} reserved on {rental_id} [{}, {}) for {user_id}",
            booking.id, stay.start, stay.end
        );
        Ok(booking)
    }

    /// Host confirmation: `pending → confirmed`.
    pub async fn confirm_booking(
        &self,
        booking_id: BookingId,
        actor: UserId,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        check_owner(&guard, actor)?;
        self.transition(&mut guard, booking_id, BookingStatus::Confirmed).await
    }

    /// Guest or host cancellation. Frees the stay immediately.
    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: UserId,
    ) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.user_id != actor && guard.owner_id != actor {
            return Err(EngineError::Forbidden {
                actor,
                target: booking_id,
            });
        }
        self.transition(&mut guard, booking_id, BookingStatus::Cancelled).await
    }

    async fn transition(
        &self,
        rs: &mut RentalState,
        booking_id: BookingId,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let from = rs
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .status;
        if !from.can_become(to) {
            return Err(EngineError::InvalidTransition {
                id: booking_id,
                from,
                to,
            });
        }

        let event = Event::BookingStatusChanged {
            id: booking_id,
            rental_id: rs.id,
            status: to,
            at: Utc::now(),
        };
        self.persist_and_apply(rs, &event).await?;
        info!("booking {booking_id} {from} -> {to}");
        rs.booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state. Holds every rental's read lock until the swap, so no
    /// write can land between the snapshot and the new file.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registering = self.register_lock.lock().await;

        let mut rental_ids: Vec<RentalId> = self.state.iter().map(|e| *e.key()).collect();
        rental_ids.sort();

        let mut guards = Vec::with_capacity(rental_ids.len());
        for id in &rental_ids {
            if let Some(rs) = self.get_rental_state(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RentalRegistered {
                id: guard.id,
                owner_id: guard.owner_id,
                guests: guard.guests,
                nightly_rate: guard.nightly_rate,
                weekend_rate: guard.weekend_rate,
            });
            if !guard.blocked_dates.is_empty() {
                events.push(Event::BlockedDatesSet {
                    rental_id: guard.id,
                    dates: guard.blocked_dates.iter().copied().collect(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingReserved {
                    booking: booking.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::PersistenceUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceUnavailable(e.to_string()))?;
        info!("WAL compacted to {count} event(s)");
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
