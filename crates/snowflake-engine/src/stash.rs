//! Content-addressed on-disk store of build outputs.

use std::path::{Path, PathBuf};

use snowflake_util::fs::ensure_dir;

use crate::error::EngineError;
use crate::hasher::Hash;

const STASH_DIR: &str = "stash";

/// The stash: immutable artifacts keyed by output hash.
///
/// An output hash `h` resolves to `stash/<h[0:2]>/<h[2:]>`; the two-level
/// fanout keeps directory sizes bounded.
#[derive(Debug)]
pub struct Stash {
    dir: PathBuf,
}

impl Stash {
    /// Create a stash rooted under `root` (the engine's state directory).
    pub fn new(root: &Path) -> Self {
        Self {
            dir: root.join(STASH_DIR),
        }
    }

    /// The stash entry path for `hash`, relative to the engine root.
    ///
    /// Pure path computation; never touches disk. The evaluator uses this
    /// to build scratch-relative dependency paths.
    pub fn relative_path(hash: &Hash) -> PathBuf {
        let hex = hash.as_hex();
        let (fanout, rest) = hex.split_at(2);
        PathBuf::from(STASH_DIR).join(fanout).join(rest)
    }

    /// The absolute path of the stash entry for `hash`.
    ///
    /// Pure path computation; never touches disk.
    pub fn output_path(&self, hash: &Hash) -> PathBuf {
        let hex = hash.as_hex();
        let (fanout, rest) = hex.split_at(2);
        self.dir.join(fanout).join(rest)
    }

    /// Whether an artifact for `hash` is present.
    pub fn exists(&self, hash: &Hash) -> bool {
        // symlink_metadata so a dangling symlink entry still counts as present.
        std::fs::symlink_metadata(self.output_path(hash)).is_ok()
    }

    /// Move a finished artifact into the stash.
    ///
    /// The artifact is renamed from its scratch location to
    /// `output_path(hash)`. If an entry for `hash` already exists (a prior
    /// or concurrent promotion of identical content), the existing entry is
    /// kept and the new artifact is discarded; that outcome is success, not
    /// an error. Once this returns `Ok`, `output_path(hash)` is readable.
    ///
    /// # Errors
    /// Returns an error on any other filesystem failure during the move.
    pub fn promote(&self, scratch_output: &Path, hash: &Hash) -> Result<(), EngineError> {
        let dest = self.output_path(hash);
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }

        if self.exists(hash) {
            return Ok(());
        }

        match std::fs::rename(scratch_output, &dest) {
            Ok(()) => Ok(()),
            // rename refuses to replace an existing entry (a non-empty
            // directory in particular): the artifact is already stashed.
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty
                ) || self.exists(hash) =>
            {
                Ok(())
            }
            Err(source) => Err(EngineError::PromotionFailed {
                path: dest.display().to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    fn some_hash() -> Hash {
        Hash::from_hex(&"ab".repeat(32)).unwrap()
    }

    #[test]
    fn output_path_uses_two_level_fanout() {
        let tmp = tempfile::tempdir().unwrap();
        let stash = Stash::new(tmp.path());
        let hash = some_hash();

        let path = stash.output_path(&hash);
        let rel = path.strip_prefix(tmp.path()).unwrap();
        assert_eq!(
            rel,
            Path::new("stash").join("ab").join("ab".repeat(31))
        );
        assert_eq!(Stash::relative_path(&hash), rel);
    }

    #[test]
    fn promote_file_then_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let stash = Stash::new(tmp.path());
        let hash = some_hash();

        let artifact = tmp.path().join("snowflake-output");
        fs::write(&artifact, b"bytes").unwrap();

        assert!(!stash.exists(&hash));
        stash.promote(&artifact, &hash).unwrap();
        assert!(stash.exists(&hash));
        assert_eq!(fs::read(stash.output_path(&hash)).unwrap(), b"bytes");
        assert!(!artifact.exists());
    }

    #[test]
    fn promote_directory_then_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let stash = Stash::new(tmp.path());
        let hash = some_hash();

        let artifact = tmp.path().join("outdir");
        fs::create_dir_all(artifact.join("sub")).unwrap();
        fs::write(artifact.join("sub").join("f"), b"1").unwrap();

        stash.promote(&artifact, &hash).unwrap();
        assert!(stash.exists(&hash));
        assert_eq!(
            fs::read(stash.output_path(&hash).join("sub").join("f")).unwrap(),
            b"1"
        );
    }

    #[test]
    fn promote_existing_file_keeps_first() {
        let tmp = tempfile::tempdir().unwrap();
        let stash = Stash::new(tmp.path());
        let hash = some_hash();

        let first = tmp.path().join("first");
        fs::write(&first, b"first").unwrap();
        stash.promote(&first, &hash).unwrap();

        let second = tmp.path().join("second");
        fs::write(&second, b"second").unwrap();
        stash.promote(&second, &hash).unwrap();

        assert_eq!(fs::read(stash.output_path(&hash)).unwrap(), b"first");
    }

    #[test]
    fn promote_existing_directory_keeps_first() {
        let tmp = tempfile::tempdir().unwrap();
        let stash = Stash::new(tmp.path());
        let hash = some_hash();

        let first = tmp.path().join("first");
        fs::create_dir_all(&first).unwrap();
        fs::write(first.join("f"), b"first").unwrap();
        stash.promote(&first, &hash).unwrap();

        let second = tmp.path().join("second");
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("f"), b"second").unwrap();
        stash.promote(&second, &hash).unwrap();

        assert_eq!(
            fs::read(stash.output_path(&hash).join("f")).unwrap(),
            b"first"
        );
    }

    #[test]
    fn promote_missing_source_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let stash = Stash::new(tmp.path());
        let hash = some_hash();

        let result = stash.promote(&tmp.path().join("absent"), &hash);
        assert!(matches!(result, Err(EngineError::PromotionFailed { .. })));
    }
}
