use crate::domain::Note;
use crate::search::query::SearchHit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive `updatedAt` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Structured predicates, combined with AND across categories.
///
/// - `tags`: at least one of these tags (OR); an empty list is no constraint
/// - `notebook_id`: exact, case-sensitive match on the note's notebook id
/// - `date_range`: `updated_at` within the window, inclusive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
}

impl FilterCriteria {
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_notebook(mut self, notebook_id: impl Into<String>) -> Self {
        self.notebook_id = Some(notebook_id.into());
        self
    }

    pub fn with_date_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.date_range = Some(DateRange { start, end });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.as_ref().is_none_or(Vec::is_empty)
            && self.notebook_id.is_none()
            && self.date_range.is_none()
    }

    pub fn matches(&self, note: &Note) -> bool {
        if let Some(tags) = self.tags.as_ref().filter(|tags| !tags.is_empty()) {
            if !note.tags.iter().any(|tag| tags.contains(tag)) {
                return false;
            }
        }

        if let Some(notebook_id) = &self.notebook_id {
            if note.notebook_id.as_deref() != Some(notebook_id.as_str()) {
                return false;
            }
        }

        if let Some(range) = &self.date_range {
            if !range.contains(note.updated_at) {
                return false;
            }
        }

        true
    }
}

/// Returns the notes satisfying `criteria`, in their original order.
pub fn filter(notes: &[Note], criteria: &FilterCriteria) -> Vec<Note> {
    notes
        .iter()
        .filter(|note| criteria.matches(note))
        .cloned()
        .collect()
}

/// Keeps only the search hits whose note also satisfies `criteria`.
pub fn intersect_hits(hits: Vec<SearchHit>, criteria: &FilterCriteria) -> Vec<SearchHit> {
    hits.into_iter()
        .filter(|hit| criteria.matches(&hit.note))
        .collect()
}
