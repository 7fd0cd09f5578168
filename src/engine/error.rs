use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("invalid date range: {0}")]
    InvalidRange(&'static str),
    #[error("invalid guest count: {0}")]
    InvalidGuests(u32),
    #[error("{requested} guests exceed capacity {capacity}")]
    CapacityExceeded { requested: u32, capacity: u32 },
    #[error("{actor} may not act on {target}")]
    Forbidden { actor: Ulid, target: Ulid },
    #[error(
        "dates unavailable: {} conflicting booking(s), {} blocked date(s)",
        .bookings.len(),
        .blocked.len()
    )]
    DateConflict {
        bookings: Vec<Ulid>,
        blocked: Vec<NaiveDate>,
    },
    #[error("booking {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

impl EngineError {
    /// Stable name of the error kind, used in HTTP bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NotFound",
            EngineError::AlreadyExists(_) => "AlreadyExists",
            EngineError::InvalidRange(_) => "InvalidRange",
            EngineError::InvalidGuests(_) => "InvalidGuests",
            EngineError::CapacityExceeded { .. } => "CapacityExceeded",
            EngineError::Forbidden { .. } => "Forbidden",
            EngineError::DateConflict { .. } => "DateConflict",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::PersistenceUnavailable(_) => "PersistenceUnavailable",
        }
    }
}
