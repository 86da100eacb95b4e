use crate::domain::Note;
use crate::search::{FilterCriteria, SearchHit};
use serde::{Deserialize, Serialize};

/// Messages accepted by the search worker.
///
/// On the wire: `{"type": "SEARCH", "payload": {"query": "...", "limit": 10}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    Initialize {
        notes: Vec<Note>,
    },
    Search {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    UpdateNotes {
        notes: Vec<Note>,
    },
    Filter {
        filters: FilterCriteria,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Initialize { .. } => "INITIALIZE",
            Request::Search { .. } => "SEARCH",
            Request::UpdateNotes { .. } => "UPDATE_NOTES",
            Request::Filter { .. } => "FILTER",
        }
    }
}

/// Messages emitted by the search worker, one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Initialized {
        success: bool,
        notes_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SearchResults {
        results: Vec<SearchHit>,
        query: String,
        total_results: usize,
        /// Milliseconds.
        search_time: f64,
    },
    #[serde(rename_all = "camelCase")]
    NotesUpdated {
        success: bool,
        notes_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FilterResults {
        results: Vec<Note>,
        filters: FilterCriteria,
        total_results: usize,
    },
    Error {
        error: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            Response::Error { .. } => true,
            Response::Initialized { success, .. } | Response::NotesUpdated { success, .. } => {
                !success
            }
            Response::SearchResults { .. } | Response::FilterResults { .. } => false,
        }
    }
}
