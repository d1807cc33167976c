//! Allocation and population of per-build scratch directories.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use snowflake_util::fs::{ensure_dir, remove_dir_all_if_exists, set_executable};
use snowflake_util::process::run_command;

use crate::error::EngineError;
use crate::hasher::Hash;
use crate::rule::Source;
use crate::runner::BUILD_SCRIPT;
use crate::tools::Tools;

const SCRATCH_DIR: &str = "scratch";

/// Allocates isolated working directories under `scratch/<build_hash>`.
#[derive(Debug)]
pub struct ScratchManager {
    dir: PathBuf,
    tools: Tools,
}

impl ScratchManager {
    /// Create a scratch manager rooted under `root` (the engine's state
    /// directory), using `tools` for on-disk source materialization.
    pub fn new(root: &Path, tools: Tools) -> Self {
        Self {
            dir: root.join(SCRATCH_DIR),
            tools,
        }
    }

    /// The scratch directory path for `build`.
    ///
    /// Pure path computation; never touches disk.
    pub fn scratch_path(&self, build: &Hash) -> PathBuf {
        self.dir.join(build)
    }

    /// Allocate and populate the scratch directory for `build`.
    ///
    /// Any leftover directory from a previous attempt is deleted first
    /// (symlinks inside it are removed, never followed), then each source
    /// is materialized under its name, with intermediate directories
    /// created as needed. A source named exactly `snowflake-build` is
    /// marked executable. Returns the scratch directory path.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be recreated or a source
    /// cannot be materialized.
    pub fn prepare(
        &self,
        build: &Hash,
        sources: &BTreeMap<String, Source>,
    ) -> Result<PathBuf, EngineError> {
        let scratch = self.scratch_path(build);
        remove_dir_all_if_exists(&scratch).map_err(scratch_error)?;
        ensure_dir(&scratch).map_err(scratch_error)?;

        for (name, source) in sources {
            let dest = materialize_target(&scratch, name)?;
            if let Some(parent) = dest.parent() {
                ensure_dir(parent).map_err(scratch_error)?;
            }

            match source {
                Source::Inline(bytes) => {
                    std::fs::write(&dest, bytes).map_err(|source| EngineError::ScratchSetup {
                        path: dest.display().to_string(),
                        source,
                    })?;
                }
                Source::OnDiskCopy(from) => self.copy_tree(from, &dest, false)?,
                Source::OnDiskLink(from) => self.copy_tree(from, &dest, true)?,
            }

            if name == BUILD_SCRIPT {
                set_executable(&dest).map_err(scratch_error)?;
            }
        }

        Ok(scratch)
    }

    /// Materialize `from` at `dest` with the external copy tool.
    fn copy_tree(&self, from: &Path, dest: &Path, link: bool) -> Result<(), EngineError> {
        let mut cmd = Command::new(&self.tools.copy);
        cmd.arg("--recursive").arg("--no-target-directory");
        if link {
            cmd.arg("--link");
        }
        cmd.arg("--").arg(from).arg(dest);

        let output = run_command(&mut cmd)?;
        if output.success {
            return Ok(());
        }
        Err(EngineError::ScratchSetup {
            path: dest.display().to_string(),
            source: std::io::Error::other(output.stderr.trim().to_owned()),
        })
    }
}

/// Resolve a source name inside the scratch directory.
///
/// Names are scratch-relative by contract; absolute names and names that
/// climb out via `..` would escape the isolation directory.
fn materialize_target(scratch: &Path, name: &str) -> Result<PathBuf, EngineError> {
    let relative = Path::new(name);
    let escapes = relative.components().any(|component| {
        !matches!(component, Component::Normal(_) | Component::CurDir)
    });
    if name.is_empty() || escapes {
        return Err(EngineError::ScratchSetup {
            path: name.to_owned(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "source name must be a relative path inside the scratch directory",
            ),
        });
    }
    Ok(scratch.join(relative))
}

fn scratch_error(err: snowflake_util::error::UtilError) -> EngineError {
    match err {
        snowflake_util::error::UtilError::Io { path, source } => {
            EngineError::ScratchSetup { path, source }
        }
        other => EngineError::Util(other),
    }
}
