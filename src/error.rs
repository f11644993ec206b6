use crate::domain::booking::BookingStatus;
use crate::domain::ids::EventId;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by (or while talking to) the payment gateway.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

/// The caller's view of a booking or event is stale.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateConflict {
    #[error("booking {0} has expired")]
    BookingExpired(Uuid),
    #[error("a confirmed booking already exists for this user and event")]
    AlreadyBooked,
    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(Uuid),
    #[error("event {0} is already cancelled")]
    EventAlreadyCancelled(EventId),
    #[error("booking {0} cannot be paid while {1}")]
    BookingNotPayable(Uuid, BookingStatus),
    #[error("booking {0} cannot be refunded while {1}")]
    NotRefundable(Uuid, BookingStatus),
    #[error("booking {0} reached the limit of {1} payment attempts")]
    RetryLimitExceeded(Uuid, u32),
    #[error("cannot {action} event {event} while {status}")]
    InvalidTransition {
        action: &'static str,
        event: EventId,
        status: String,
    },
}

/// Coarse error categories exposed to the boundary layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Capacity,
    StateConflict,
    Deadline,
    Gateway,
    Integrity,
    NotFound,
    Forbidden,
    Internal,
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not enough capacity: {available} seats available, {requested} required")]
    CapacityError { available: u32, requested: u32 },
    #[error("State conflict: {0}")]
    StateConflict(#[from] StateConflict),
    #[error("Deadline passed: {0}")]
    DeadlineError(String),
    #[error("Gateway error: {0}")]
    GatewayError(#[from] GatewayError),
    #[error("Integrity error: {0}")]
    IntegrityError(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl BookingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::CapacityError { .. } => ErrorKind::Capacity,
            Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::DeadlineError(_) => ErrorKind::Deadline,
            Self::GatewayError(_) => ErrorKind::Gateway,
            Self::IntegrityError(_) => ErrorKind::Integrity,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            _ => ErrorKind::Internal,
        }
    }

    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BookingError>;
