//! In-memory store, optionally persisted to a JSON file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{clamp_rating, MovieStore, StoreError, StoredMovie};
use crate::models::{CommentKey, CommentRecord, MovieRecord};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    next_id: u64,
    movies: BTreeMap<String, StoredMovie>,
    comments: BTreeMap<String, Vec<CommentRecord>>,
}

/// Store holding everything in memory. With a path, every write is flushed
/// to disk as JSON.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Snapshot>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a file-backed store, loading existing contents if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(
            "Opened store {} ({} movies)",
            path.display(),
            snapshot.movies.len()
        );

        Ok(Self {
            inner: Mutex::new(snapshot),
            path: Some(path),
        })
    }

    /// Stored movie by external id.
    pub async fn movie(&self, external_id: &str) -> Option<StoredMovie> {
        self.inner.lock().await.movies.get(external_id).cloned()
    }

    /// Stored comments for a movie, in insertion order.
    pub async fn comments(&self, external_movie_id: &str) -> Vec<CommentRecord> {
        self.inner
            .lock()
            .await
            .comments
            .get(external_movie_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn flush(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl MovieStore for MemoryStore {
    async fn movie_exists(&self, external_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.lock().await.movies.contains_key(external_id))
    }

    async fn save_movie(&self, mut record: MovieRecord) -> Result<StoredMovie, StoreError> {
        record.rating = clamp_rating(record.rating);

        let mut snapshot = self.inner.lock().await;
        let stored = match snapshot.movies.get(&record.external_id).cloned() {
            Some(mut existing) => {
                existing.record.merge(record);
                existing
            }
            None => {
                snapshot.next_id += 1;
                StoredMovie {
                    id: snapshot.next_id,
                    record,
                }
            }
        };
        snapshot
            .movies
            .insert(stored.record.external_id.clone(), stored.clone());

        self.flush(&snapshot).await?;
        Ok(stored)
    }

    async fn save_comments(
        &self,
        comments: &[CommentRecord],
        external_movie_id: &str,
    ) -> Result<usize, StoreError> {
        let mut snapshot = self.inner.lock().await;
        if !snapshot.movies.contains_key(external_movie_id) {
            return Err(StoreError::UnknownMovie(external_movie_id.to_string()));
        }

        let stored = snapshot
            .comments
            .entry(external_movie_id.to_string())
            .or_default();
        let mut seen: HashSet<CommentKey> = stored.iter().map(CommentRecord::key).collect();

        let mut added = 0;
        for comment in comments {
            let mut comment = comment.clone();
            comment.external_movie_id = external_movie_id.to_string();
            if seen.insert(comment.key()) {
                stored.push(comment);
                added += 1;
            }
        }

        self.flush(&snapshot).await?;
        Ok(added)
    }
}
