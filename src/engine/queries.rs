use ulid::Ulid;

use crate::aggregate::{average, select_preview};
use crate::model::*;

use super::conflict::find_conflicts;
use super::{Classification, Engine, EngineError, IntervalStore};

impl<S: IntervalStore> Engine<S> {
    /// Reservations on a resource, earliest first, as the viewer may see them.
    /// Owners see every holder; anyone else sees dates only, plus their own
    /// reservations in full.
    pub async fn list_reservations(&self, query: &ListQuery) -> Result<Vec<ReservationView>, EngineError> {
        let mut reservations = self.store.list_intervals(query.resource_id).await?;
        reservations.sort_by_key(|r| (r.span.start, r.span.end));
        Ok(reservations
            .into_iter()
            .map(|r| {
                let visible = query.is_owner || r.holder_id == query.viewer_id;
                ReservationView {
                    resource_id: r.resource_id,
                    start: r.span.start,
                    end: r.span.end,
                    reservation_id: visible.then_some(r.id),
                    holder_id: visible.then_some(r.holder_id),
                }
            })
            .collect())
    }

    /// Every reservation that `[start, end)` would collide with.
    /// Read-only: takes no admission lock, so the answer may be stale.
    pub async fn conflicts(
        &self,
        resource_id: Ulid,
        start: Day,
        end: Day,
    ) -> Result<Vec<(Ulid, Classification)>, EngineError> {
        let span = Span::try_new(start, end)?;
        let existing = self.store.list_intervals(resource_id).await?;
        find_conflicts(&span, &existing)
    }

    /// Mean star rating, or `None` for a resource nobody has rated yet.
    pub async fn average_rating(&self, resource_id: Ulid) -> Result<Option<f64>, EngineError> {
        let ratings = self.store.list_ratings(resource_id).await?;
        let stars: Vec<StarRating> = ratings.iter().map(|r| r.stars).collect();
        Ok(average(&stars))
    }

    /// Listing card data: rating aggregate plus preview image. `images` come
    /// from the image-management layer.
    pub async fn resource_summary(
        &self,
        resource_id: Ulid,
        images: &[Image],
    ) -> Result<ResourceSummary, EngineError> {
        let ratings = self.store.list_ratings(resource_id).await?;
        let stars: Vec<StarRating> = ratings.iter().map(|r| r.stars).collect();
        Ok(ResourceSummary {
            resource_id,
            avg_rating: average(&stars),
            num_reviews: stars.len(),
            preview_image: select_preview(images).map(str::to_owned),
        })
    }
}
