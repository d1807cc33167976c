//! Append-only record of per-rule build outcomes.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use snowflake_util::fs::ensure_dir;

use crate::error::EngineError;

const JOURNAL_DIR: &str = "journal";
const JOURNAL_FILE: &str = "journal.toml";

/// How a rule evaluation ended.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The output hash was found in the cache; no build ran.
    Cached,
    /// The build script ran and its output was promoted.
    Success,
    /// The build failed; the scratch directory is preserved for inspection.
    Failed,
}

/// One journal row.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct BuildRecord {
    /// The rule's human-readable name.
    pub name: String,
    /// The rule's build hash, in hex.
    pub build_hash: String,
    /// The resulting output hash, absent for failed builds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    /// When evaluation of this rule started, in seconds since the epoch.
    pub started_at: u64,
    /// How long the build ran, absent for cache hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// How the evaluation ended.
    pub outcome: Outcome,
}

// TOML array-of-tables: each append emits one standalone `[[build]]`
// block, so the file stays parseable after any number of appends.
#[derive(Debug, Default, Deserialize, Serialize)]
struct JournalDoc {
    #[serde(default, rename = "build")]
    builds: Vec<BuildRecord>,
}

/// The build journal at `journal/journal.toml`.
///
/// Diagnostics only: the engine appends and never reads it back.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Create a journal rooted under `root` (the engine's state directory).
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(JOURNAL_DIR).join(JOURNAL_FILE),
        }
    }

    /// Append one record.
    ///
    /// # Errors
    /// Returns an error if the record cannot be serialized or written.
    pub fn append(&self, record: &BuildRecord) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }

        let doc = JournalDoc {
            builds: vec![record.clone()],
        };
        let text = toml::to_string(&doc).map_err(|e| EngineError::Journal {
            message: e.to_string(),
        })?;

        let journal_io = |source: std::io::Error| EngineError::JournalIo {
            path: self.path.display().to_string(),
            source,
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(journal_io)?;
        file.write_all(text.as_bytes()).map_err(journal_io)?;
        Ok(())
    }

    /// Read back every record, for diagnostics and tests.
    ///
    /// # Errors
    /// Returns an error if the journal exists but cannot be read or parsed.
    pub fn read_all(&self) -> Result<Vec<BuildRecord>, EngineError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(EngineError::JournalIo {
                    path: self.path.display().to_string(),
                    source,
                })
            }
        };
        let doc: JournalDoc = toml::from_str(&text).map_err(|e| EngineError::Journal {
            message: e.to_string(),
        })?;
        Ok(doc.builds)
    }
}
