use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoteError {
    #[error("record id must not be empty")]
    InvalidId,
    #[error("notebook name must not be empty")]
    InvalidName,
    #[error("updatedAt precedes createdAt for '{0}'")]
    TimestampOrder(String),
    #[error("invalid tag set: {0}")]
    InvalidTags(String),
    #[error("notebook '{0}' does not exist")]
    UnknownNotebook(String),
    #[error("notebook parent chain of '{0}' contains a cycle")]
    NotebookCycle(String),
    #[error("a sibling notebook is already named '{0}'")]
    DuplicateNotebookName(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoteStatus {
    #[default]
    Draft,
    Active,
    OnHold,
    Completed,
    Dropped,
}

/// A note record as owned by the note store.
///
/// `notebook_id` is the canonical join key to [`Notebook`]. Records written
/// by older clients may carry a `notebook` field holding either a notebook
/// name or an id; it is kept aside in a legacy slot until
/// [`migrate_notebook_refs`] resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notebook_id: Option<String>,
    #[serde(default)]
    pub status: NoteStatus,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_trashed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "notebook", default, skip_serializing_if = "Option::is_none")]
    pub(crate) legacy_notebook: Option<String>,
}

impl Note {
    /// Creates a fresh note with a random id and equal created/updated timestamps.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Note {
        let now = Utc::now();
        Note {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            notebook_id: None,
            status: NoteStatus::default(),
            is_pinned: false,
            is_trashed: false,
            created_at: now,
            updated_at: now,
            legacy_notebook: None,
        }
    }

    /// Returns this note with its tag set replaced (trimmed, deduplicated).
    pub fn with_tags<I, S>(mut self, tags: I) -> Note
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = normalize_tags(tags.into_iter().map(Into::into));
        self
    }

    pub fn in_notebook(mut self, notebook_id: impl Into<String>) -> Note {
        self.notebook_id = Some(notebook_id.into());
        self
    }

    pub fn with_status(mut self, status: NoteStatus) -> Note {
        self.status = status;
        self
    }

    /// The unresolved `notebook` reference carried over from legacy data, if any.
    pub fn legacy_notebook(&self) -> Option<&str> {
        self.legacy_notebook.as_deref()
    }

    /// Checks the record invariants.
    ///
    /// - id is non-empty
    /// - `updated_at >= created_at`
    /// - tags are trimmed, non-empty and unique
    pub fn validate(&self) -> Result<(), NoteError> {
        if self.id.trim().is_empty() {
            return Err(NoteError::InvalidId);
        }

        if self.updated_at < self.created_at {
            return Err(NoteError::TimestampOrder(self.id.clone()));
        }

        let mut seen = HashSet::new();
        for tag in &self.tags {
            if tag.trim().is_empty() || tag.trim() != tag {
                return Err(NoteError::InvalidTags(format!("'{tag}' is not a trimmed tag")));
            }
            if !seen.insert(tag.as_str()) {
                return Err(NoteError::InvalidTags(format!("'{tag}' appears twice")));
            }
        }

        Ok(())
    }
}

/// Trims tags, drops empty ones and keeps the first occurrence of duplicates.
pub fn normalize_tags<I>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_owned())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

/// Partial update for a [`Note`]. Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// `Some(None)` detaches the note from its notebook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NoteStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_trashed: Option<bool>,
    /// Set to `Some(None)` together with `notebook_id` to drop a legacy reference.
    #[serde(rename = "notebook", default, skip_serializing_if = "Option::is_none")]
    pub(crate) legacy_notebook: Option<Option<String>>,
}

impl NotePatch {
    pub fn title(title: impl Into<String>) -> Self {
        NotePatch {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        NotePatch {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Assigns (or with `None`, clears) the notebook. Any legacy
    /// name-based reference is dropped at the same time.
    pub fn notebook(notebook_id: Option<String>) -> Self {
        NotePatch {
            notebook_id: Some(notebook_id),
            legacy_notebook: Some(None),
            ..Default::default()
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        NotePatch {
            tags: Some(normalize_tags(tags.into_iter().map(Into::into))),
            ..Default::default()
        }
    }

    pub fn trashed(is_trashed: bool) -> Self {
        NotePatch {
            is_trashed: Some(is_trashed),
            ..Default::default()
        }
    }

    pub fn pinned(is_pinned: bool) -> Self {
        NotePatch {
            is_pinned: Some(is_pinned),
            ..Default::default()
        }
    }

    pub fn status(status: NoteStatus) -> Self {
        NotePatch {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Combines two patches; fields set in `other` win.
    pub fn and(self, other: NotePatch) -> Self {
        NotePatch {
            title: other.title.or(self.title),
            content: other.content.or(self.content),
            tags: other.tags.or(self.tags),
            notebook_id: other.notebook_id.or(self.notebook_id),
            status: other.status.or(self.status),
            is_pinned: other.is_pinned.or(self.is_pinned),
            is_trashed: other.is_trashed.or(self.is_trashed),
            legacy_notebook: other.legacy_notebook.or(self.legacy_notebook),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == NotePatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notebook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default = "default_color")]
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_color() -> String {
    "blue".to_string()
}

impl Notebook {
    pub fn new(name: impl Into<String>) -> Notebook {
        let now = Utc::now();
        Notebook {
            id: Uuid::new_v4().to_string(),
            name: name.into().trim().to_owned(),
            parent_id: None,
            color: default_color(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Notebook {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Notebook {
        self.color = color.into();
        self
    }

    pub fn validate(&self) -> Result<(), NoteError> {
        if self.id.trim().is_empty() {
            return Err(NoteError::InvalidId);
        }
        if self.name.trim().is_empty() {
            return Err(NoteError::InvalidName);
        }
        if self.updated_at < self.created_at {
            return Err(NoteError::TimestampOrder(self.id.clone()));
        }
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(NoteError::NotebookCycle(self.id.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Returns true if re-parenting `id` under `new_parent` would close a loop.
pub fn would_create_cycle(notebooks: &[Notebook], id: &str, new_parent: Option<&str>) -> bool {
    let parents: HashMap<&str, Option<&str>> = notebooks
        .iter()
        .map(|nb| (nb.id.as_str(), nb.parent_id.as_deref()))
        .collect();

    let mut current = new_parent;
    let mut steps = 0;
    while let Some(parent) = current {
        if parent == id {
            return true;
        }
        // a walk longer than the tree means an existing loop above us
        steps += 1;
        if steps > parents.len() {
            return true;
        }
        current = parents.get(parent).copied().flatten();
    }
    false
}

/// Validates a whole notebook forest.
///
/// Rejects dangling parent references, cycles in any parent chain and
/// duplicate names among siblings (compared after trimming).
pub fn validate_tree(notebooks: &[Notebook]) -> Result<(), NoteError> {
    let ids: HashSet<&str> = notebooks.iter().map(|nb| nb.id.as_str()).collect();
    let mut sibling_names: HashSet<(Option<&str>, &str)> = HashSet::new();

    for notebook in notebooks {
        notebook.validate()?;

        if let Some(parent) = notebook.parent_id.as_deref() {
            if !ids.contains(parent) {
                return Err(NoteError::UnknownNotebook(parent.to_string()));
            }
            if would_create_cycle(notebooks, &notebook.id, Some(parent)) {
                return Err(NoteError::NotebookCycle(notebook.id.clone()));
            }
        }

        let key = (notebook.parent_id.as_deref(), notebook.name.trim());
        if !sibling_names.insert(key) {
            return Err(NoteError::DuplicateNotebookName(notebook.name.clone()));
        }
    }

    Ok(())
}

/// Outcome of a one-time notebook reference migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookMigration {
    /// Ids of notes whose reference was rewritten or moved to `notebook_id`.
    pub migrated: Vec<String>,
    /// Ids of notes whose reference matched no notebook, or several by name.
    pub unresolved: Vec<String>,
}

/// Rewrites name-based notebook references into id-based ones.
///
/// A reference (legacy `notebook` field, or a `notebookId` that is not a
/// known id) is resolved to an id when it equals an existing id, or the name
/// of exactly one notebook. Anything else is left untouched and reported.
pub fn migrate_notebook_refs(notes: &mut [Note], notebooks: &[Notebook]) -> NotebookMigration {
    let ids: HashSet<&str> = notebooks.iter().map(|nb| nb.id.as_str()).collect();
    let mut by_name: HashMap<&str, Vec<&str>> = HashMap::new();
    for notebook in notebooks {
        by_name
            .entry(notebook.name.trim())
            .or_default()
            .push(notebook.id.as_str());
    }

    let resolve = |reference: &str| -> Option<String> {
        if ids.contains(reference) {
            return Some(reference.to_string());
        }
        match by_name.get(reference.trim()).map(Vec::as_slice) {
            Some([only]) => Some((*only).to_string()),
            _ => None,
        }
    };

    let mut report = NotebookMigration::default();
    for note in notes.iter_mut() {
        let reference = match (note.legacy_notebook.clone(), note.notebook_id.clone()) {
            (Some(legacy), None) => legacy,
            (_, Some(current)) if !ids.contains(current.as_str()) => current,
            (Some(_), Some(_)) => {
                // canonical id already in place, legacy value is stale
                note.legacy_notebook = None;
                report.migrated.push(note.id.clone());
                continue;
            }
            (None, _) => continue,
        };

        match resolve(&reference) {
            Some(id) => {
                note.notebook_id = Some(id);
                note.legacy_notebook = None;
                report.migrated.push(note.id.clone());
            }
            None => report.unresolved.push(note.id.clone()),
        }
    }

    report
}
