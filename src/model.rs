use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Calendar date — the only time type. Reservations are whole nights.
pub type Day = NaiveDate;

/// Half-open interval `[start, end)`: `start` is the first night, `end` the checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Day,
    pub end: Day,
}

impl Span {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for caller-supplied dates.
    pub fn try_new(start: Day, end: Day) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn is_well_formed(&self) -> bool {
        self.start < self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A claimed date range on a resource. Never mutated once admitted;
/// a change is a cancel followed by a fresh admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub holder_id: Ulid,
    pub span: Span,
}

/// Star rating in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct StarRating(u8);

impl StarRating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for StarRating {
    type Error = EngineError;

    fn try_from(stars: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&stars) {
            Ok(Self(stars))
        } else {
            Err(EngineError::InvalidRating(stars))
        }
    }
}

impl From<StarRating> for u8 {
    fn from(r: StarRating) -> u8 {
        r.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub reviewer_id: Ulid,
    pub stars: StarRating,
}

/// Listing image as handed in by the image-management layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub preview: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    /// Live reservations, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    pub ratings: Vec<Rating>,
}

impl ResourceState {
    pub fn new(id: Ulid) -> Self {
        Self {
            id,
            reservations: Vec::new(),
            ratings: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ReservationAdmitted {
        id: Ulid,
        resource_id: Ulid,
        holder_id: Ulid,
        span: Span,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: Ulid,
    },
    RatingAdded {
        resource_id: Ulid,
        reviewer_id: Ulid,
        stars: StarRating,
    },
}

// ── Query types ──────────────────────────────────────────────────

/// Per-call listing parameters. Built fresh for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub resource_id: Ulid,
    pub viewer_id: Ulid,
    /// Supplied by the authorization layer; never computed here.
    pub is_owner: bool,
}

/// A reservation as seen by a particular viewer. Identities are only
/// disclosed to the resource owner and to the holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub resource_id: Ulid,
    pub start: Day,
    pub end: Day,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<Ulid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSummary {
    pub resource_id: Ulid,
    pub avg_rating: Option<f64>,
    pub num_reviews: usize,
    pub preview_image: Option<String>,
}
