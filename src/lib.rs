//! # bibrecon
//!
//! Bibliographic record reconciliation: match catalogue records against a
//! publisher's export and emit MARC updates.
//!
//! ## Modules
//!
//! - [`normalize`] - Title normalization for comparison
//! - [`similarity`] - Bigram Jaccard similarity
//! - [`index`] - Candidate index over a secondary source
//! - [`matcher`] - Key and fuzzy-title matching with deterministic tie-break
//! - [`merge`] - Append-only and correcting field merge with validation
//! - [`emitter`] - Schema-ordered, escaped output blocks
//! - [`pipeline`] - Per-record state machine and run summary
//! - [`loader`] / [`marcxml`] - CSV/JSON and MARCXML I/O
//! - [`config`] - TOML run configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bibrecon::{config::RunConfig, index::CandidateIndex, loader, marcxml, pipeline::Reconciler};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::default();
//!     let records = marcxml::read_records_file(Path::new("records.xml"))?;
//!     let candidates = loader::load_candidates(Path::new("export.csv"), &config.source)?;
//!     let index = CandidateIndex::build(candidates);
//!     let (updates, summary) = Reconciler::new(&index, &config).run(&records);
//!     marcxml::write_updates_file(Path::new("updates.xml"), &updates)?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod emitter;
pub mod error;
pub mod index;
pub mod loader;
pub mod marcxml;
pub mod matcher;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod similarity;

pub use error::{ReconError, Result};
