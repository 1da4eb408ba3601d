//! Persistence collaborator for scraped movies and comments.
//!
//! The acquisition layer only needs three operations, captured by
//! [`MovieStore`]. Stores own cross-run deduplication and the rating bound;
//! the crawler dedupes within a run only.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CommentRecord, MovieRecord};

/// Lowest and highest rating a stored movie may carry.
pub const RATING_BOUNDS: (f64, f64) = (0.0, 10.0);

/// Errors from the store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Movie {0} is not stored")]
    UnknownMovie(String),
}

/// A movie as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMovie {
    /// Internal id assigned by the store.
    pub id: u64,
    pub record: MovieRecord,
}

#[async_trait]
pub trait MovieStore: Send + Sync {
    /// Whether a movie with this external id is stored.
    async fn movie_exists(&self, external_id: &str) -> Result<bool, StoreError>;

    /// Insert a movie, or merge it into the stored one without losing
    /// known fields.
    async fn save_movie(&self, record: MovieRecord) -> Result<StoredMovie, StoreError>;

    /// Store comments for a movie, skipping any whose
    /// (movie, author, timestamp) key is already stored. Returns the number
    /// of comments added.
    async fn save_comments(
        &self,
        comments: &[CommentRecord],
        external_movie_id: &str,
    ) -> Result<usize, StoreError>;
}

/// Clamp a rating into [`RATING_BOUNDS`]. Non-finite ratings are dropped.
pub fn clamp_rating(rating: Option<f64>) -> Option<f64> {
    rating
        .filter(|r| r.is_finite())
        .map(|r| r.clamp(RATING_BOUNDS.0, RATING_BOUNDS.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_rating() {
        assert_eq!(clamp_rating(Some(7.5)), Some(7.5));
        assert_eq!(clamp_rating(Some(12.0)), Some(10.0));
        assert_eq!(clamp_rating(Some(-1.0)), Some(0.0));
        assert_eq!(clamp_rating(Some(f64::NAN)), None);
        assert_eq!(clamp_rating(None), None);
    }
}
