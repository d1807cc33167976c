#![forbid(unsafe_code)]
//! Content-addressed rule evaluation for the snowflake build engine.
//!
//! Callers declare [`Rule`]s — named units of work over named [`Source`]s
//! and ordered dependency rules — and ask the [`Evaluator`] for a rule's
//! output hash. The evaluator recursively resolves dependencies, composes
//! each rule's deterministic build hash, and either answers from the
//! persistent cache or runs the rule's `snowflake-build` script in an
//! isolated scratch directory, promoting the resulting `snowflake-output`
//! into the content-addressed stash.

pub mod cache;
pub mod error;
pub mod evaluator;
pub mod hasher;
pub mod journal;
pub mod rule;
pub mod runner;
pub mod scratch;
pub mod stash;
pub mod tools;

pub use cache::Cache;
pub use error::EngineError;
pub use evaluator::Evaluator;
pub use hasher::Hash;
pub use journal::{BuildRecord, Journal, Outcome};
pub use rule::{Rule, Source};
pub use runner::{Runner, BUILD_SCRIPT, LOG_NAME, OUTPUT_NAME};
pub use scratch::ScratchManager;
pub use stash::Stash;
pub use tools::Tools;
