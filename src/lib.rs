//! # margin_core
//!
//! The core of a note-taking application: fuzzy search over notes, structured
//! filtering, one repository contract over local and remote stores, and
//! corruption detection with automatic recovery for everything persisted.
//!
//! ## Features
//!
//! - **Fuzzy Search**: typo-tolerant, field-weighted search running on a dedicated worker thread
//! - **Filtering**: tag, notebook and date-range predicates that compose with search results
//! - **Repositories**: the same CRUD contract over a local store, a remote HTTP API, or both with fallback
//! - **Merge-on-write Updates**: partial updates never erase fields they do not mention
//! - **Corruption Recovery**: checksummed backup ring, structural repair of truncated data
//! - **Explicit Lifecycle**: one [`service::NoteService`] object with `init` and `dispose`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use margin_core::config::AppConfig;
//! use margin_core::domain::Note;
//! use margin_core::service::NoteService;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(std::path::Path::new("margin.json"))?;
//! margin_core::logging::init(&config.logging)?;
//!
//! let service = NoteService::init(config).await?;
//! service
//!     .create_note(Note::new("Meeting notes", "Agenda").with_tags(["work"]))
//!     .await?;
//!
//! let results = service.search("meeting", None).await?;
//! println!("{} hit(s) in {:.1}ms", results.total_results, results.search_time_ms);
//!
//! service.dispose().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The library is organized into several key modules:
//!
//! - **[`domain`]**: Note and notebook records, patches and validation
//! - **[`search`]**: Index builder, fuzzy matcher, query executor and filter engine
//! - **[`worker`]**: The background search thread and its message protocol
//! - **[`storage`]**: Raw key-value backing stores (JSON files, SQLite)
//! - **[`recovery`]**: Corruption detection, backups and repair of persisted domains
//! - **[`repository`]**: Local, remote and fallback repositories
//! - **[`plugin`]**: Capability-based plugin registry
//! - **[`service`]**: Application bootstrap tying everything together
//! - **[`config`]** and **[`logging`]**: Configuration file and `tracing` setup
//! - **[`error`]**: Unified error handling throughout the library
//!
//! ## Partial Updates
//!
//! `update` always takes a patch and merges it onto the stored record, so two
//! callers changing different fields never overwrite each other:
//!
//! ```rust,no_run
//! use margin_core::domain::NotePatch;
//! use margin_core::repository::Repository;
//! # use margin_core::domain::Note;
//! # async fn run(notes: &dyn Repository<Note>, id: &str) -> margin_core::MarginResult<()> {
//! notes.update(id, &NotePatch::content("new body")).await?;
//! notes.update(id, &NotePatch::notebook(Some("work".into()))).await?;
//! // the note now has both the new body and the new notebook
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`MarginResult<T>`] which wraps the unified [`MarginError`] type.
//! [`MarginError::kind`] classifies every failure for callers, and
//! [`error::OperationResult`] turns any result into a serializable
//! `{ success, data, error }` payload.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod recovery;
pub mod repository;
pub mod search;
pub mod service;
pub mod storage;
pub mod worker;

/// Re-exports the most commonly used types for convenience.
pub use error::{MarginError, MarginResult};
