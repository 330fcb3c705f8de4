use thiserror::Error;
use ulid::Ulid;

use crate::model::Day;

use super::conflict::Classification;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid range: end date {end} must be after start date {start}")]
    InvalidRange { start: Day, end: Day },
    #[error("invalid interval [{start}, {end})")]
    InvalidInterval { start: Day, end: Day },
    #[error("invalid star rating {0}: must be between 1 and 5")]
    InvalidRating(u8),
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error("reservation not found: {0}")]
    ReservationNotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("reviewer {reviewer_id} already rated resource {resource_id}")]
    AlreadyRated { resource_id: Ulid, reviewer_id: Ulid },
    #[error("{} (reservation {reservation_id})", .kind.message())]
    Conflict {
        kind: Classification,
        reservation_id: Ulid,
    },
    #[error("caller {0} may not modify this reservation")]
    Forbidden(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    /// Only storage faults are worth a caller-driven retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Storage(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::InvalidRating(_) => "invalid_rating",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::ReservationNotFound(_) => "reservation_not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::AlreadyRated { .. } => "already_rated",
            EngineError::Conflict { kind, .. } => kind.label(),
            EngineError::Forbidden(_) => "forbidden",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) => "storage",
        }
    }
}
