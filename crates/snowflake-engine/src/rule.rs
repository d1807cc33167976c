//! Rule declarations: the immutable inputs to the evaluator.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::hasher::Hash;

/// One input file (or tree) of a rule, keyed by the relative path it
/// materializes to in the scratch directory.
#[derive(Clone, Debug)]
pub enum Source {
    /// Literal file content.
    Inline(Vec<u8>),

    /// A path on the host filesystem, materialized by recursive copy.
    OnDiskCopy(PathBuf),

    /// A path on the host filesystem, materialized by recursive hard link.
    ///
    /// Faster than copying, but the scratch directory then aliases the
    /// caller's tree: a build script that mutates its inputs corrupts the
    /// original files (and, transitively, the stash).
    OnDiskLink(PathBuf),
}

/// A named, immutable declaration of how to build one artifact.
///
/// Rules form a directed acyclic graph through `deps`; the caller must not
/// introduce cycles. Dependency order is significant: it is part of the
/// rule's build hash and determines the positional arguments handed to the
/// build script.
#[derive(Debug)]
pub struct Rule {
    name: String,
    deps: Vec<Arc<Rule>>,
    sources: BTreeMap<String, Source>,

    // Memo slots, filled at most once per rule object by the evaluator.
    pub(crate) sources_hash: OnceLock<Hash>,
    pub(crate) build_hash: OnceLock<Hash>,
    pub(crate) output_hash: OnceLock<Hash>,
}

impl Rule {
    /// Declare a rule.
    ///
    /// The name is informative only and need not be unique.
    pub fn new(
        name: impl Into<String>,
        deps: Vec<Arc<Rule>>,
        sources: BTreeMap<String, Source>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            deps,
            sources,
            sources_hash: OnceLock::new(),
            build_hash: OnceLock::new(),
            output_hash: OnceLock::new(),
        })
    }

    /// The rule's human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The rule's dependencies, in declaration order.
    pub fn deps(&self) -> &[Arc<Rule>] {
        &self.deps
    }

    /// The rule's sources, keyed by scratch-relative name.
    pub fn sources(&self) -> &BTreeMap<String, Source> {
        &self.sources
    }
}
