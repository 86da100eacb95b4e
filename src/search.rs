//! Client-side fuzzy search over a note snapshot.
//!
//! The search subsystem is split into four pieces:
//!
//! - [`index`]: builds an immutable [`SearchIndex`] from a snapshot of notes,
//!   keyed on three weighted fields (title 0.7, content 0.3, tags 0.5)
//! - [`fuzzy`]: the approximate matcher, tolerant of typos and partial words,
//!   biased towards matches near the start of a field
//! - [`query`]: ranks notes against a query string and reports match spans
//!   and timing
//! - [`filter`]: structured predicates (tags, notebook, date range) that are
//!   independent of fuzzy matching
//!
//! Search normally runs inside the [`crate::worker`] thread, but every piece
//! here is a plain synchronous API and can be used directly.
//!
//! # Usage
//!
//! ```rust,no_run
//! use margin_core::domain::Note;
//! use margin_core::search::{Query, SearchIndex};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let notes = vec![
//!     Note::new("Meeting notes", "").with_tags(["work"]),
//!     Note::new("Grocery list", "").with_tags(["home"]),
//! ];
//! let index = SearchIndex::build(&notes)?;
//!
//! let results = Query::new(&index).search("meeting");
//! assert_eq!(results.total_results, 1);
//! # Ok(())
//! # }
//! ```

pub mod filter;
pub mod fuzzy;
pub mod index;
pub mod query;

pub use filter::{DateRange, FilterCriteria, filter, intersect_hits};
pub use fuzzy::{FuzzyMatch, MatchOptions, Matcher};
pub use index::{IndexedNote, SearchField, SearchIndex};
pub use query::{FieldMatch, Query, SearchHit, SearchOptions, SearchResults};
