//! Persistent mapping from build hash to output hash.

use std::io::Write;
use std::path::{Path, PathBuf};

use snowflake_util::fs::ensure_dir;

use crate::error::EngineError;
use crate::hasher::Hash;

const CACHE_DIR: &str = "cache";

/// The build cache: one small text file per build hash, holding the
/// output hash in hex.
///
/// Entries are monotonically added and never rewritten with a different
/// value: a second successful build with the same build hash yields the
/// same output hash by construction. Reads are lock-free; writes are
/// atomic (temp file + rename), so concurrent writers race safely to
/// identical content.
#[derive(Debug)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    /// Create a cache rooted under `root` (the engine's state directory).
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(CACHE_DIR),
        }
    }

    /// Look up the output hash recorded for `build`.
    ///
    /// # Errors
    /// Returns an error if the entry exists but cannot be read or does not
    /// parse as a hash. A missing entry is `Ok(None)`.
    pub fn get(&self, build: &Hash) -> Result<Option<Hash>, EngineError> {
        let path = self.dir.join(build);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(EngineError::CacheIo {
                    path: path.display().to_string(),
                    source,
                })
            }
        };

        match Hash::from_hex(content.trim()) {
            Some(output) => Ok(Some(output)),
            None => Err(EngineError::CacheCorrupt {
                path: path.display().to_string(),
                content,
            }),
        }
    }

    /// Record that `build` produced `output`.
    ///
    /// The entry is written to a temporary file in the cache directory and
    /// renamed into place, so a crash never leaves a partial entry and
    /// concurrent writers are last-writer-wins.
    ///
    /// # Errors
    /// Returns an error if the entry cannot be written.
    pub fn set(&self, build: &Hash, output: &Hash) -> Result<(), EngineError> {
        ensure_dir(&self.dir)?;
        let dest = self.dir.join(build);
        let cache_io = |source: std::io::Error| EngineError::CacheIo {
            path: dest.display().to_string(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(cache_io)?;
        writeln!(tmp, "{output}").map_err(cache_io)?;
        tmp.persist(&dest).map_err(|e| cache_io(e.error))?;
        Ok(())
    }
}
