use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::conflict::{first_conflict, validate_span};
use super::{Engine, EngineError, IntervalStore};

impl<S: IntervalStore> Engine<S> {
    pub async fn create_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _lock = self.acquire(id).await;
        if let Err(e) = self.store.create_resource(id).await {
            if matches!(self.store.contains_resource(id).await, Ok(false)) {
                self.retire_lock(&id);
            }
            return Err(e);
        }
        info!("created resource {id}");
        Ok(())
    }

    /// Delete a resource along with its reservations and ratings.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let _lock = self.lock_resource(id).await?;
        self.store.delete_resource(id).await?;
        self.retire_lock(&id);
        info!("deleted resource {id}");
        Ok(())
    }

    /// Admit `[start, end)` on `resource_id` for `holder_id`, or explain why not.
    ///
    /// Booking is open to anyone, owners included. Two calls racing on the
    /// same resource with overlapping dates never both succeed.
    pub async fn try_reserve(
        &self,
        resource_id: Ulid,
        holder_id: Ulid,
        start: Day,
        end: Day,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.admit(resource_id, holder_id, start, end).await;
        metrics::histogram!(observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(r) => {
                metrics::counter!(observability::RESERVATIONS_ADMITTED_TOTAL).increment(1);
                info!("admitted reservation {} on {resource_id} for {holder_id}: {}", r.id, r.span);
            }
            Err(e) => {
                metrics::counter!(observability::RESERVATIONS_REJECTED_TOTAL, "reason" => e.label())
                    .increment(1);
                if e.is_retryable() {
                    warn!("reservation on {resource_id} failed: {e}");
                } else {
                    debug!("reservation on {resource_id} rejected: {e}");
                }
            }
        }
        result
    }

    async fn admit(
        &self,
        resource_id: Ulid,
        holder_id: Ulid,
        start: Day,
        end: Day,
    ) -> Result<Reservation, EngineError> {
        let span = Span::try_new(start, end)?;
        validate_span(&span)?;

        let _lock = self.lock_resource(resource_id).await?;
        let existing = self.store.list_intervals(resource_id).await?;
        if let Some((reservation_id, kind)) = first_conflict(&span, &existing)? {
            return Err(EngineError::Conflict {
                kind,
                reservation_id,
            });
        }

        let reservation = Reservation {
            id: Ulid::new(),
            resource_id,
            holder_id,
            span,
        };
        self.store.insert_interval(&reservation).await?;
        Ok(reservation)
    }

    /// Cancel a reservation. Allowed for its holder, or for the resource
    /// owner (`is_owner` comes from the authorization layer).
    pub async fn cancel_reservation(
        &self,
        reservation_id: Ulid,
        caller_id: Ulid,
        is_owner: bool,
    ) -> Result<Reservation, EngineError> {
        let found = self.store.find_interval(reservation_id).await?;
        let _lock = self
            .lock_resource(found.resource_id)
            .await
            .map_err(|e| match e {
                EngineError::ResourceNotFound(_) => EngineError::ReservationNotFound(reservation_id),
                other => other,
            })?;
        // Re-read under the lock; it may have been cancelled meanwhile.
        let reservation = self.store.find_interval(reservation_id).await?;
        if !is_owner && reservation.holder_id != caller_id {
            return Err(EngineError::Forbidden(caller_id));
        }
        let removed = self.store.remove_interval(reservation_id).await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        info!(
            "cancelled reservation {reservation_id} on {} by {caller_id}",
            removed.resource_id
        );
        Ok(removed)
    }

    /// Record a reviewer's stars. One rating per reviewer per resource.
    pub async fn add_rating(
        &self,
        resource_id: Ulid,
        reviewer_id: Ulid,
        stars: u8,
    ) -> Result<Rating, EngineError> {
        let stars = StarRating::try_from(stars)?;
        let _lock = self.lock_resource(resource_id).await?;
        let ratings = self.store.list_ratings(resource_id).await?;
        if ratings.iter().any(|r| r.reviewer_id == reviewer_id) {
            return Err(EngineError::AlreadyRated {
                resource_id,
                reviewer_id,
            });
        }
        let rating = Rating { reviewer_id, stars };
        self.store.insert_rating(resource_id, rating).await?;
        debug!("rating {} from {reviewer_id} on {resource_id}", stars.get());
        Ok(rating)
    }
}
