use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, RentalId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-rental broadcast of committed events.
pub struct NotifyHub {
    channels: DashMap<RentalId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a rental's events. Creates the channel if needed and
    /// drops channels whose subscribers have all gone.
    pub fn subscribe(&self, rental_id: RentalId) -> broadcast::Receiver<Event> {
        self.channels
            .retain(|id, sender| *id == rental_id || sender.receiver_count() > 0);
        self.channels
            .entry(rental_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening. Drops the channel once its last
    /// subscriber has gone.
    pub fn send(&self, rental_id: RentalId, event: &Event) {
        let orphaned = match self.channels.get(&rental_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => return,
        };
        if orphaned {
            self.channels
                .remove_if(&rental_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
