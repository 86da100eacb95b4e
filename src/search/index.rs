use crate::domain::Note;
use crate::error::{MarginError, MarginResult};
use crate::search::fuzzy::fold;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TITLE_WEIGHT: f64 = 0.7;
pub const CONTENT_WEIGHT: f64 = 0.3;
pub const TAGS_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Title,
    Content,
    Tags,
}

impl SearchField {
    pub const ALL: [SearchField; 3] = [SearchField::Title, SearchField::Content, SearchField::Tags];

    pub fn weight(self) -> f64 {
        match self {
            SearchField::Title => TITLE_WEIGHT,
            SearchField::Content => CONTENT_WEIGHT,
            SearchField::Tags => TAGS_WEIGHT,
        }
    }

    /// Weight scaled so that all field weights sum to one.
    pub fn normalized_weight(self) -> f64 {
        let total: f64 = SearchField::ALL.iter().map(|f| f.weight()).sum();
        self.weight() / total
    }
}

#[derive(Debug, Clone)]
pub struct IndexedField {
    pub text: String,
    /// `text` case-folded once at build time, what queries match against.
    pub folded: Vec<char>,
    /// Field-length norm: shorter fields count more per match.
    pub norm: f64,
}

impl IndexedField {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            folded: text.chars().map(fold).collect(),
            norm: field_norm(text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexedNote {
    pub note: Note,
    pub title: IndexedField,
    pub content: IndexedField,
    pub tags: Vec<IndexedField>,
}

/// An immutable, in-memory fuzzy search index over one note snapshot.
///
/// The index owns its own copy of the notes; callers' data is never touched.
/// There is no incremental patching: a changed snapshot means a new index.
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    entries: Vec<IndexedNote>,
}

impl SearchIndex {
    /// Builds an index from a snapshot of notes.
    ///
    /// Every note is validated first; a single invalid note fails the whole
    /// build so a half-built index is never returned.
    pub fn build(notes: &[Note]) -> MarginResult<Self> {
        for (position, note) in notes.iter().enumerate() {
            note.validate()
                .map_err(|e| MarginError::Validation(format!("note at index {position}: {e}")))?;
        }

        let entries = notes
            .iter()
            .map(|note| IndexedNote {
                note: note.clone(),
                title: IndexedField::new(&note.title),
                content: IndexedField::new(&note.content),
                tags: note.tags.iter().map(|tag| IndexedField::new(tag)).collect(),
            })
            .collect();

        tracing::debug!(notes = notes.len(), "search index built");

        Ok(SearchIndex { entries })
    }

    /// Builds an index from an untyped payload such as a raw worker message.
    ///
    /// Returns [`MarginError::Validation`] when the payload is not an array or
    /// an element is missing a required note field.
    pub fn from_json(payload: &Value) -> MarginResult<Self> {
        let items = payload
            .as_array()
            .ok_or_else(|| MarginError::Validation("notes must be an array".into()))?;

        let mut notes = Vec::with_capacity(items.len());
        for (position, item) in items.iter().enumerate() {
            let note: Note = serde_json::from_value(item.clone())
                .map_err(|e| MarginError::Validation(format!("note at index {position}: {e}")))?;
            notes.push(note);
        }

        Self::build(&notes)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexedNote] {
        &self.entries
    }

    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.entries.iter().map(|entry| &entry.note)
    }
}

/// `1 / sqrt(token count)`, rounded to three decimals.
fn field_norm(text: &str) -> f64 {
    let tokens = text.split(' ').filter(|t| !t.is_empty()).count().max(1);
    let norm = 1.0 / (tokens as f64).sqrt();
    (norm * 1000.0).round() / 1000.0
}
