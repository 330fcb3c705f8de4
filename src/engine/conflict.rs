use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// How a candidate span relates to one existing reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Classification {
    NoOverlap,
    /// Candidate lies entirely inside the existing reservation.
    Contains,
    /// Candidate starts before the existing reservation and runs into it.
    OverlapsTail,
    /// Candidate starts inside the existing reservation and runs past its end.
    OverlapsHead,
    /// Candidate covers the whole existing reservation and more.
    Engulfs,
}

impl Classification {
    pub fn is_conflict(self) -> bool {
        self != Classification::NoOverlap
    }

    /// User-facing message for a rejection of this kind.
    pub fn message(self) -> &'static str {
        match self {
            Classification::NoOverlap => "no conflict",
            Classification::Contains => "this resource is already booked for the specified dates",
            Classification::OverlapsTail => "end date conflicts with an existing reservation",
            Classification::OverlapsHead => "start date conflicts with an existing reservation",
            Classification::Engulfs => "requested dates span an existing reservation",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Classification::NoOverlap => "no_overlap",
            Classification::Contains => "contains",
            Classification::OverlapsTail => "overlaps_tail",
            Classification::OverlapsHead => "overlaps_head",
            Classification::Engulfs => "engulfs",
        }
    }
}

/// Classify `candidate` against `existing` under `[start, end)` semantics.
///
/// Order of tests: no-overlap, contains, engulfs, tail, head. Engulfs has to
/// be tested before tail because an engulfing candidate also satisfies the
/// tail condition.
pub fn classify(candidate: &Span, existing: &Span) -> Result<Classification, EngineError> {
    for span in [candidate, existing] {
        if !span.is_well_formed() {
            return Err(EngineError::InvalidInterval {
                start: span.start,
                end: span.end,
            });
        }
    }

    if candidate.end <= existing.start || candidate.start >= existing.end {
        return Ok(Classification::NoOverlap);
    }
    if candidate.start >= existing.start && candidate.end <= existing.end {
        return Ok(Classification::Contains);
    }
    if candidate.start <= existing.start && candidate.end >= existing.end {
        return Ok(Classification::Engulfs);
    }
    if candidate.start < existing.start && candidate.end > existing.start {
        return Ok(Classification::OverlapsTail);
    }
    // Starts strictly inside and ends past the end. A shared start that runs
    // past the end was already taken by engulfs.
    debug_assert!(
        candidate.start > existing.start
            && candidate.start < existing.end
            && candidate.end > existing.end
    );
    Ok(Classification::OverlapsHead)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_well_formed() {
        return Err(EngineError::InvalidRange {
            start: span.start,
            end: span.end,
        });
    }
    if span.nights() > MAX_SPAN_DAYS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

/// First reservation in `existing` that conflicts with `candidate`.
/// `existing` may be in any order; every element is checked.
pub(crate) fn first_conflict(
    candidate: &Span,
    existing: &[Reservation],
) -> Result<Option<(Ulid, Classification)>, EngineError> {
    for r in existing {
        let kind = classify(candidate, &r.span)?;
        if kind.is_conflict() {
            return Ok(Some((r.id, kind)));
        }
    }
    Ok(None)
}

/// Every conflicting reservation, in input order.
pub(crate) fn find_conflicts(
    candidate: &Span,
    existing: &[Reservation],
) -> Result<Vec<(Ulid, Classification)>, EngineError> {
    let mut out = Vec::new();
    for r in existing {
        let kind = classify(candidate, &r.span)?;
        if kind.is_conflict() {
            out.push((r.id, kind));
        }
    }
    Ok(out)
}
