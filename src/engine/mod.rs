mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{
    is_weekend_night, merge_overlapping, open_ranges, price_nights, subtract_stays, sum_rates,
    total_price,
};
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRentalState = Arc<RwLock<RentalState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
    /// Fail the next flush after its bytes are written.
    #[cfg(test)]
    FailNextSync,
    /// Stop the writer task.
    #[cfg(test)]
    Halt,
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
///
/// Exits when every sender (i.e. the Engine) is dropped.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            #[cfg(test)]
            WalCommand::Halt => break,
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    tracing::debug!("WAL writer stopped: {}", wal.path().display());
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} event(s): {e}", batch.len());
    }
    respond_batch(batch, &result);
}

/// Append and fsync a batch. On failure the batch is cut back out of the
/// log so no caller that saw an error has an event on disk.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    if wal.is_failed() {
        return Err(io::Error::other("WAL failed earlier and could not be rolled back"));
    }
    let mark = wal.mark()?;
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        if let Err(e) = wal.rollback(mark) {
            tracing::error!(
                "WAL rollback failed, refusing further appends until compaction: {e}"
            );
        }
    }
    result
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
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        #[cfg(test)]
        WalCommand::FailNextSync => wal.fail_next_sync(),
        #[cfg(test)]
        WalCommand::Halt => {}
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

// ── Booking indexes ──────────────────────────────────────

/// Reverse lookups maintained alongside rental state.
#[derive(Default)]
pub(super) struct BookingIndex {
    /// booking id → rental id
    pub(super) rental_of: DashMap<BookingId, RentalId>,
    /// guest → their booking ids, in reservation order
    pub(super) by_guest: DashMap<UserId, Vec<BookingId>>,
}

impl BookingIndex {
    fn record(&self, booking: &Booking) {
        if self.rental_of.insert(booking.id, booking.rental_id).is_none() {
            self.by_guest.entry(booking.user_id).or_default().push(booking.id);
        }
    }
}

pub struct Engine {
    pub state: DashMap<RentalId, SharedRentalState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) index: BookingIndex,
    /// Serialises rental registration and compaction snapshots.
    pub(super) register_lock: Mutex<()>,
}

/// Apply an event directly to a RentalState (caller holds the lock).
fn apply_to_rental(rs: &mut RentalState, event: &Event, index: &BookingIndex) {
    match event {
        Event::RentalUpdated {
            guests,
            nightly_rate,
            weekend_rate,
            ..
        } => {
            rs.guests = *guests;
            rs.nightly_rate = *nightly_rate;
            rs.weekend_rate = *weekend_rate;
        }
        Event::BlockedDatesSet { dates, .. } => {
            rs.blocked_dates = dates.iter().copied().collect();
        }
        Event::BookingReserved { booking } => {
            index.record(booking);
            rs.insert_booking(booking.clone());
        }
        Event::BookingStatusChanged { id, status, at, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.status = *status;
                b.updated_at = *at;
            }
        }
        // RentalRegistered is handled at the DashMap level, not here
        Event::RentalRegistered { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let index = BookingIndex::default();
        let mut rentals: HashMap<RentalId, RentalState> = HashMap::new();
        for event in &events {
            match event {
                Event::RentalRegistered {
                    id,
                    owner_id,
                    guests,
                    nightly_rate,
                    weekend_rate,
                } => {
                    let spec = RentalSpec {
                        id: *id,
                        owner_id: *owner_id,
                        guests: *guests,
                        nightly_rate: *nightly_rate,
                        weekend_rate: *weekend_rate,
                    };
                    rentals.insert(*id, RentalState::new(&spec));
                }
                other => {
                    if let Some(rs) = rentals.get_mut(&other.rental_id()) {
                        apply_to_rental(rs, other, &index);
                    }
                }
            }
        }

        let state = DashMap::with_capacity(rentals.len());
        for (id, rs) in rentals {
            state.insert(id, Arc::new(RwLock::new(rs)));
        }
        tracing::info!(
            "replayed {} event(s) from {}: {} rental(s)",
            events.len(),
            wal_path.display(),
            state.len()
        );
        metrics::gauge!(crate::observability::RENTALS_LOADED).set(state.len() as f64);

        Ok(Self {
            state,
            wal_tx,
            notify,
            index,
            register_lock: Mutex::new(()),
        })
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
            .map_err(|_| EngineError::PersistenceUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::PersistenceUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceUnavailable(e.to_string()))
    }

    pub fn get_rental_state(&self, id: &RentalId) -> Option<SharedRentalState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn rental_for_booking(&self, booking_id: &BookingId) -> Option<RentalId> {
        self.index.rental_of.get(booking_id).map(|e| *e.value())
    }

    pub fn rental_count(&self) -> usize {
        self.state.len()
    }

    /// WAL-append + apply + notify in one call. Memory is only touched once
    /// the event is durable.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RentalState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_rental(rs, event, &self.index);
        self.notify.send(rs.id, event);
        Ok(())
    }

    pub(super) fn rental_or_not_found(&self, id: &RentalId) -> Result<SharedRentalState, EngineError> {
        self.get_rental_state(id).ok_or(EngineError::NotFound(*id))
    }

    /// Lookup booking → rental, acquire the rental's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &BookingId,
    ) -> Result<OwnedRwLockWriteGuard<RentalState>, EngineError> {
        let rental_id = self
            .rental_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self.rental_or_not_found(&rental_id)?;
        Ok(rs.write_owned().await)
    }

    pub(super) async fn resolve_booking_read(
        &self,
        booking_id: &BookingId,
    ) -> Result<OwnedRwLockReadGuard<RentalState>, EngineError> {
        let rental_id = self
            .rental_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self.rental_or_not_found(&rental_id)?;
        Ok(rs.read_owned().await)
    }
}
