use crate::error::{MarginError, MarginResult};
use crate::search::{self, MatchOptions, Query, SearchIndex, SearchOptions};
use crate::worker::message::{Request, Response};
use serde_json::Value;

/// Message handler owned by the worker thread.
///
/// Holds at most one index. A rebuild only replaces it once the new index is
/// complete, so a failed update leaves the previous index in service.
pub struct SearchHandler {
    index: Option<SearchIndex>,
    matching: MatchOptions,
    default_limit: usize,
}

impl SearchHandler {
    pub fn new(matching: MatchOptions, default_limit: usize) -> Self {
        Self {
            index: None,
            matching,
            default_limit,
        }
    }

    pub fn notes_count(&self) -> usize {
        self.index.as_ref().map_or(0, SearchIndex::len)
    }

    pub fn handle(&mut self, request: Request) -> Response {
        match request {
            Request::Initialize { notes } => match self.replace_index(SearchIndex::build(&notes)) {
                Ok(notes_count) => Response::Initialized {
                    success: true,
                    notes_count,
                    error: None,
                },
                Err(e) => Response::Initialized {
                    success: false,
                    notes_count: 0,
                    error: Some(e.to_string()),
                },
            },
            Request::UpdateNotes { notes } => match self.replace_index(SearchIndex::build(&notes)) {
                Ok(notes_count) => Response::NotesUpdated {
                    success: true,
                    notes_count,
                    error: None,
                },
                Err(e) => Response::NotesUpdated {
                    success: false,
                    notes_count: 0,
                    error: Some(e.to_string()),
                },
            },
            Request::Search { query, limit } => match self.index() {
                Ok(index) => {
                    let options = SearchOptions {
                        limit: Some(limit.unwrap_or(self.default_limit)),
                        matching: self.matching,
                    };
                    let found = Query::new(index).search_with_options(&query, &options);
                    Response::SearchResults {
                        results: found.results,
                        query: found.query,
                        total_results: found.total_results,
                        search_time: found.search_time_ms,
                    }
                }
                Err(e) => Response::error(e.to_string()),
            },
            Request::Filter { filters } => match self.index() {
                Ok(index) => {
                    let snapshot: Vec<_> = index.notes().cloned().collect();
                    let results = search::filter(&snapshot, &filters);
                    Response::FilterResults {
                        total_results: results.len(),
                        results,
                        filters,
                    }
                }
                Err(e) => Response::error(e.to_string()),
            },
        }
    }

    /// Decodes and handles a raw JSON message.
    ///
    /// Malformed index payloads answer with a failed `INITIALIZED` /
    /// `NOTES_UPDATED`; anything else unreadable answers with `ERROR`.
    pub fn handle_json(&mut self, raw: &str) -> Response {
        let message: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => return Response::error(format!("unreadable message: {e}")),
        };

        let kind = message
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match serde_json::from_value::<Request>(message.clone()) {
            Ok(request) => self.handle(request),
            Err(e) => {
                let reason = match message.pointer("/payload/notes") {
                    Some(notes) => SearchIndex::from_json(notes)
                        .err()
                        .map_or_else(|| e.to_string(), |err| err.to_string()),
                    None => e.to_string(),
                };
                match kind.as_str() {
                    "INITIALIZE" => Response::Initialized {
                        success: false,
                        notes_count: 0,
                        error: Some(reason),
                    },
                    "UPDATE_NOTES" => Response::NotesUpdated {
                        success: false,
                        notes_count: 0,
                        error: Some(reason),
                    },
                    "" => Response::error("message has no type"),
                    other => Response::error(format!("invalid {other} message: {reason}")),
                }
            }
        }
    }

    fn index(&self) -> MarginResult<&SearchIndex> {
        self.index
            .as_ref()
            .ok_or_else(|| MarginError::Worker("search index is not initialized".into()))
    }

    fn replace_index(&mut self, built: MarginResult<SearchIndex>) -> MarginResult<usize> {
        let index = built?;
        let count = index.len();
        self.index = Some(index);
        Ok(count)
    }
}
