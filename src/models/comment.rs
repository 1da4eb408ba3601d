//! Short comments (reviews) attached to a movie.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One short comment from a movie's comment pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub external_movie_id: String,
    pub author: String,
    /// Comment body, never empty after trimming.
    pub text: String,
    pub timestamp: Option<NaiveDateTime>,
    /// Star rating 1-5 when the commenter left one.
    pub stars: Option<u8>,
}

/// Identity of a comment: same movie, author and timestamp is the same comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommentKey {
    pub external_movie_id: String,
    pub author: String,
    pub timestamp: Option<NaiveDateTime>,
}

impl CommentRecord {
    pub fn key(&self) -> CommentKey {
        CommentKey {
            external_movie_id: self.external_movie_id.clone(),
            author: self.author.clone(),
            timestamp: self.timestamp,
        }
    }
}
