use crate::domain::Note;
use crate::search::fuzzy::{MatchOptions, Matcher};
use crate::search::index::{IndexedField, SearchField, SearchIndex};
use serde::{Deserialize, Serialize};
use std::time::Instant;

pub const DEFAULT_LIMIT: usize = 50;

/// A read-only query interface over a [`SearchIndex`].
///
/// Queries never mutate the index, so one index can serve any number of
/// concurrent queries in any order.
pub struct Query<'a> {
    index: &'a SearchIndex,
}

/// Where in a note a query matched, for highlighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMatch {
    pub field: SearchField,
    pub value: String,
    /// Inclusive character spans within `value`.
    pub indices: Vec<(usize, usize)>,
    /// Position of the matched tag within the note's tag list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_index: Option<usize>,
}

/// A single ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub note: Note,
    /// Lower is better; 0 is a perfect match.
    pub score: f64,
    pub matches: Vec<FieldMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub results: Vec<SearchHit>,
    pub query: String,
    /// Number of hits before `limit` was applied.
    pub total_results: usize,
    pub search_time_ms: f64,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of hits to return. Defaults to `Some(50)`.
    pub limit: Option<usize>,
    pub matching: MatchOptions,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: Some(DEFAULT_LIMIT),
            matching: MatchOptions::default(),
        }
    }
}

impl<'a> Query<'a> {
    pub fn new(index: &'a SearchIndex) -> Self {
        Self { index }
    }

    /// Searches title, content and tags with default options.
    pub fn search(&self, query: &str) -> SearchResults {
        self.search_with_options(query, &SearchOptions::default())
    }

    /// Searches with explicit limit and matcher tuning.
    ///
    /// An empty or whitespace-only query returns no hits without touching the
    /// index. Hits are ordered by ascending score; equal scores keep index order.
    pub fn search_with_options(&self, query: &str, options: &SearchOptions) -> SearchResults {
        let started = Instant::now();
        let pattern = query.trim();

        if pattern.is_empty() {
            return SearchResults {
                results: Vec::new(),
                query: query.to_string(),
                total_results: 0,
                search_time_ms: elapsed_ms(started),
            };
        }

        let matcher = Matcher::new(pattern, options.matching);
        let mut hits: Vec<SearchHit> = self
            .index
            .entries()
            .iter()
            .filter_map(|entry| {
                let mut scorer = NoteScorer::default();
                scorer.field(&matcher, SearchField::Title, &entry.title, None);
                scorer.field(&matcher, SearchField::Content, &entry.content, None);
                for (position, tag) in entry.tags.iter().enumerate() {
                    scorer.field(&matcher, SearchField::Tags, tag, Some(position));
                }
                scorer.finish(&entry.note)
            })
            .collect();

        // stable: ties keep insertion order
        hits.sort_by(|a, b| a.score.total_cmp(&b.score));

        let total_results = hits.len();
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }

        let search_time_ms = elapsed_ms(started);
        tracing::debug!(total_results, search_time_ms, "search finished");

        SearchResults {
            results: hits,
            query: query.to_string(),
            total_results,
            search_time_ms,
        }
    }
}

#[derive(Default)]
struct NoteScorer {
    total: f64,
    matches: Vec<FieldMatch>,
}

impl NoteScorer {
    fn field(
        &mut self,
        matcher: &Matcher,
        field: SearchField,
        indexed: &IndexedField,
        ref_index: Option<usize>,
    ) {
        let Some(found) = matcher.find_folded(&indexed.folded) else {
            return;
        };

        if self.matches.is_empty() {
            self.total = 1.0;
        }
        let base = if found.score == 0.0 { f64::EPSILON } else { found.score };
        self.total *= base.powf(field.normalized_weight() * indexed.norm);

        self.matches.push(FieldMatch {
            field,
            value: indexed.text.clone(),
            indices: found.indices,
            ref_index,
        });
    }

    fn finish(self, note: &Note) -> Option<SearchHit> {
        if self.matches.is_empty() {
            return None;
        }
        Some(SearchHit {
            note: note.clone(),
            score: self.total,
            matches: self.matches,
        })
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
