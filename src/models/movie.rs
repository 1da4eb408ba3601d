//! Movie records produced by search and detail extraction.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A search candidate, possibly enriched from its detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMovie {
    /// Site-assigned subject id (unique key).
    pub external_id: String,
    pub title: String,
    pub year: Option<String>,
    pub subtitle: Option<String>,
    pub poster_url: Option<String>,
    pub director: Option<String>,
    pub rating: Option<f64>,
}

impl CandidateMovie {
    /// Whether a detail fetch would add anything to this candidate.
    pub fn needs_enrichment(&self) -> bool {
        self.rating.is_none() || self.director.is_none()
    }

    /// Fill fields from a fresher detail extraction without erasing known values.
    pub fn enrich_from(&mut self, detail: &MovieRecord) {
        if !detail.title.is_empty() {
            self.title = detail.title.clone();
        }
        keep_newer(&mut self.year, detail.year.clone());
        keep_newer(&mut self.subtitle, detail.subtitle.clone());
        keep_newer(&mut self.poster_url, detail.poster_url.clone());
        keep_newer(&mut self.director, detail.director.clone());
        keep_newer(&mut self.rating, detail.rating);
    }
}

/// Full movie metadata from a detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub external_id: String,
    pub title: String,
    pub year: Option<String>,
    pub subtitle: Option<String>,
    pub director: Option<String>,
    /// Leading performers in credit order. Not deduplicated.
    pub actors: Vec<String>,
    /// Genres in document order, first occurrence wins.
    pub genres: Vec<String>,
    pub rating: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub poster_url: Option<String>,
}

impl MovieRecord {
    /// Actors as the slash-joined display string.
    pub fn actors_display(&self) -> String {
        self.actors.join("/")
    }

    /// Genres as the slash-joined display string.
    pub fn genres_display(&self) -> String {
        self.genres.join("/")
    }

    /// Merge a newer extraction of the same movie into this one.
    ///
    /// Fields the newer record could not resolve keep their current value.
    pub fn merge(&mut self, newer: MovieRecord) {
        debug_assert_eq!(self.external_id, newer.external_id);

        if !newer.title.is_empty() {
            self.title = newer.title;
        }
        keep_newer(&mut self.year, newer.year);
        keep_newer(&mut self.subtitle, newer.subtitle);
        keep_newer(&mut self.director, newer.director);
        keep_newer(&mut self.rating, newer.rating);
        keep_newer(&mut self.release_date, newer.release_date);
        keep_newer(&mut self.poster_url, newer.poster_url);
        if !newer.actors.is_empty() {
            self.actors = newer.actors;
        }
        if !newer.genres.is_empty() {
            self.genres = newer.genres;
        }
    }
}

fn keep_newer<T>(current: &mut Option<T>, newer: Option<T>) {
    if newer.is_some() {
        *current = newer;
    }
}
