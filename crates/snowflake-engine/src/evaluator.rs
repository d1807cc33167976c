//! Dependency-driven recursive rule evaluation.

use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use snowflake_util::error::UtilError;
use snowflake_util::fs::ensure_dir;

use crate::cache::Cache;
use crate::error::EngineError;
use crate::hasher::{self, Hash};
use crate::journal::{BuildRecord, Journal, Outcome};
use crate::rule::Rule;
use crate::runner::{Runner, LOG_NAME, OUTPUT_NAME};
use crate::scratch::ScratchManager;
use crate::stash::Stash;
use crate::tools::Tools;

/// The rule evaluation engine.
///
/// Owns the four on-disk components under one state directory (`scratch/`,
/// `stash/`, `cache/`, `journal/`) and drives them through the evaluation
/// protocol: recursively resolve dependency output hashes, compose the
/// build hash, consult the cache, and on miss populate a scratch
/// directory, run the build script, and promote its output.
///
/// Evaluation is single-threaded and blocking. Within a process, rule
/// memoization guarantees at most one build per build hash; across
/// processes sharing a root, promotion and cache writes converge on
/// identical content, but concurrent evaluation of the *same* build hash
/// needs external coordination (the scratch purge would interfere).
#[derive(Debug)]
pub struct Evaluator {
    stash: Stash,
    cache: Cache,
    scratch: ScratchManager,
    runner: Runner,
    journal: Journal,
}

impl Evaluator {
    /// Create an evaluator rooted at `root`, resolving external tools from
    /// the environment.
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created or resolved.
    pub fn new(root: &Path) -> Result<Self, EngineError> {
        Self::with_tools(root, Tools::from_env())
    }

    /// Create an evaluator with explicitly chosen tools.
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created or resolved.
    pub fn with_tools(root: &Path, tools: Tools) -> Result<Self, EngineError> {
        ensure_dir(root)?;
        // Scratch paths are handed to the shell as `$1` and must be absolute.
        let root = root
            .canonicalize()
            .map_err(|source| UtilError::io(root, source))?;

        Ok(Self {
            stash: Stash::new(&root),
            cache: Cache::new(&root),
            scratch: ScratchManager::new(&root, tools.clone()),
            runner: Runner::new(&tools),
            journal: Journal::new(&root),
        })
    }

    /// The stash path of the artifact identified by `hash`.
    ///
    /// Valid once `output_hash` has returned `hash` for some rule.
    pub fn artifact_path(&self, hash: &Hash) -> PathBuf {
        self.stash.output_path(hash)
    }

    /// The build journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// The identity of the rule's sources mapping. Pure; memoized on the
    /// rule object.
    ///
    /// # Errors
    /// Returns an error if an on-disk source cannot be read.
    pub fn sources_hash(&self, rule: &Rule) -> Result<Hash, EngineError> {
        if let Some(hash) = rule.sources_hash.get() {
            return Ok(hash.clone());
        }
        let hash = hasher::sources_hash(rule.sources())?;
        Ok(rule.sources_hash.get_or_init(|| hash).clone())
    }

    /// The identity of this rule instance: sources hash plus dependency
    /// output hashes in declaration order. Memoized on the rule object.
    ///
    /// Resolving dependency output hashes may build dependencies.
    ///
    /// # Errors
    /// Returns an error if hashing fails or a dependency build fails.
    pub fn build_hash(&self, rule: &Rule) -> Result<Hash, EngineError> {
        if let Some(hash) = rule.build_hash.get() {
            return Ok(hash.clone());
        }

        // Recursing here is what orders the build: every dependency's
        // artifact is stashed before this rule's identity even exists.
        let mut dep_outputs = Vec::with_capacity(rule.deps().len());
        for dep in rule.deps() {
            dep_outputs.push(self.output_hash(dep)?);
        }

        let sources = self.sources_hash(rule)?;
        let hash = hasher::build_hash(&sources, &dep_outputs);
        Ok(rule.build_hash.get_or_init(|| hash).clone())
    }

    /// The identity of the rule's artifact, building it if it is not
    /// already cached. Memoized on the rule object.
    ///
    /// # Errors
    /// Propagates any failure of the rule's own build or of a dependency
    /// build; the failure is journaled before it propagates.
    pub fn output_hash(&self, rule: &Rule) -> Result<Hash, EngineError> {
        if let Some(hash) = rule.output_hash.get() {
            return Ok(hash.clone());
        }

        let build = self.build_hash(rule)?;
        let started_at = epoch_seconds();

        if let Some(output) = self.cache.get(&build)? {
            // Sanity check: a cache entry whose artifact has vanished from
            // the stash must not short-circuit, or dependents would hand
            // the build script a dangling path.
            if self.stash.exists(&output) {
                debug!(rule = rule.name(), build = %build, "cache hit");
                self.journal.append(&BuildRecord {
                    name: rule.name().to_owned(),
                    build_hash: build.as_hex().to_owned(),
                    output_hash: Some(output.as_hex().to_owned()),
                    started_at,
                    duration_ms: None,
                    outcome: Outcome::Cached,
                })?;
                return Ok(rule.output_hash.get_or_init(|| output).clone());
            }
            warn!(rule = rule.name(), build = %build, output = %output,
                  "cache entry has no stash artifact; rebuilding");
        }

        let timer = Instant::now();
        match self.build(rule, &build) {
            Ok(output) => {
                self.journal.append(&BuildRecord {
                    name: rule.name().to_owned(),
                    build_hash: build.as_hex().to_owned(),
                    output_hash: Some(output.as_hex().to_owned()),
                    started_at,
                    duration_ms: Some(elapsed_ms(&timer)),
                    outcome: Outcome::Success,
                })?;
                Ok(rule.output_hash.get_or_init(|| output).clone())
            }
            Err(err) => {
                echo_failure(rule.name(), &err);
                let journaled = self.journal.append(&BuildRecord {
                    name: rule.name().to_owned(),
                    build_hash: build.as_hex().to_owned(),
                    output_hash: None,
                    started_at,
                    duration_ms: Some(elapsed_ms(&timer)),
                    outcome: Outcome::Failed,
                });
                if let Err(journal_err) = journaled {
                    // The build failure is the error the caller needs.
                    warn!(rule = rule.name(), error = %journal_err,
                          "could not journal failed build");
                }
                Err(err)
            }
        }
    }

    /// Run the full miss path: scratch, runner, stash, cache.
    fn build(&self, rule: &Rule, build: &Hash) -> Result<Hash, EngineError> {
        debug!(rule = rule.name(), build = %build, "building");

        // Dependency output hashes are memoized by now (build_hash
        // resolved them), so these lookups cannot re-enter a build.
        let mut dep_paths = Vec::with_capacity(rule.deps().len());
        for dep in rule.deps() {
            dep_paths.push(dep_path(&self.output_hash(dep)?));
        }

        let scratch_dir = self.scratch.prepare(build, rule.sources())?;
        self.runner.run(rule.name(), &scratch_dir, &dep_paths)?;

        let produced = scratch_dir.join(OUTPUT_NAME);
        if std::fs::symlink_metadata(&produced).is_err() {
            return Err(EngineError::OutputMissing {
                rule: rule.name().to_owned(),
                path: produced.display().to_string(),
            });
        }

        let output = hasher::output_hash(&produced)?;
        self.stash.promote(&produced, &output)?;
        self.cache.set(build, &output)?;
        debug!(rule = rule.name(), output = %output, "promoted");
        Ok(output)
    }
}

/// A dependency's stash entry, relative to the scratch directory.
///
/// Scratch directories live at `scratch/<build_hash>`, two components
/// below the root; the climb depth here must match that layout.
fn dep_path(output: &Hash) -> PathBuf {
    Path::new("../..").join(Stash::relative_path(output))
}

fn echo_failure(rule_name: &str, err: &EngineError) {
    if let EngineError::BuildScriptFailed { log, .. } = err {
        eprintln!("error: build of `{rule_name}` failed; {LOG_NAME} follows");
        for line in log.lines() {
            eprintln!("    {line}");
        }
    }
}

fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn elapsed_ms(timer: &Instant) -> u64 {
    u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX)
}
