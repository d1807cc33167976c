//! Error types for snowflake-engine.

/// Errors produced by rule evaluation.
///
/// No error is swallowed inside the engine: each failure journals a
/// `failed` record for the rule being evaluated and then propagates to the
/// caller, which decides whether to abandon the whole graph.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A source file or tree could not be read while hashing.
    #[error("cannot read source {path}: {source}")]
    SourceUnreadable {
        path: String,
        source: std::io::Error,
    },

    /// Populating the scratch directory failed.
    #[error("cannot set up scratch directory {path}: {source}")]
    ScratchSetup {
        path: String,
        source: std::io::Error,
    },

    /// The build script exited with a nonzero status.
    ///
    /// Carries the captured build log so callers can surface it.
    #[error("build of `{rule}` failed with {}:\n{log}", exit_code_text(.code))]
    BuildScriptFailed {
        rule: String,
        code: Option<i32>,
        log: String,
    },

    /// The build script succeeded but produced no output artifact.
    #[error("build of `{rule}` succeeded but wrote no {path}")]
    OutputMissing { rule: String, path: String },

    /// The produced artifact could not be walked for hashing.
    #[error("cannot read build output {path}: {source}")]
    OutputUnreadable {
        path: String,
        source: std::io::Error,
    },

    /// Moving the artifact into the stash failed.
    ///
    /// The benign "destination already present" outcome is not an error.
    #[error("cannot promote build output to {path}: {source}")]
    PromotionFailed {
        path: String,
        source: std::io::Error,
    },

    /// Reading or writing the build-hash cache failed.
    #[error("cannot access cache entry {path}: {source}")]
    CacheIo {
        path: String,
        source: std::io::Error,
    },

    /// A cache entry exists but does not contain a valid output hash.
    #[error("cache entry {path} is corrupt: {content:?}")]
    CacheCorrupt { path: String, content: String },

    /// Appending to or reading the build journal failed.
    #[error("cannot access journal at {path}: {source}")]
    JournalIo {
        path: String,
        source: std::io::Error,
    },

    /// A journal record could not be serialized or parsed.
    #[error("cannot process journal record: {message}")]
    Journal { message: String },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] snowflake_util::error::UtilError),
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_owned(),
    }
}
