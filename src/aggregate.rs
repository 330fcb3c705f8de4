//! Derived listing values: average rating and preview image.

use crate::model::{Image, StarRating};

/// Arithmetic mean of `ratings`, or `None` when there are none.
pub fn average(ratings: &[StarRating]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }
    let sum: u64 = ratings.iter().map(|r| u64::from(r.get())).sum();
    Some(sum as f64 / ratings.len() as f64)
}

/// URL of the first image flagged as preview.
pub fn select_preview(images: &[Image]) -> Option<&str> {
    images.iter().find(|i| i.preview).map(|i| i.url.as_str())
}
