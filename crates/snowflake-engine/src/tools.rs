//! Resolution of the external tools the engine shells out to.

use std::path::PathBuf;

/// Environment variable naming the recursive copy utility.
pub const CP_ENV: &str = "SNOWFLAKE_CP";

/// Environment variable naming the shell interpreter.
pub const SH_ENV: &str = "SNOWFLAKE_SH";

/// Paths to the external tools used during builds.
///
/// The copy utility must support `--recursive`, `--no-target-directory`,
/// and `--link` (GNU `cp` semantics); the shell must support `-c` and `--`
/// (any POSIX `sh`).
#[derive(Clone, Debug)]
pub struct Tools {
    /// Recursive file copy utility.
    pub copy: PathBuf,

    /// Shell interpreter for build scripts.
    pub shell: PathBuf,
}

impl Tools {
    /// Resolve tools from the environment, with `cp` and `/bin/sh` as
    /// defaults when the variables are unset.
    pub fn from_env() -> Self {
        Self {
            copy: std::env::var_os(CP_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cp")),
            shell: std::env::var_os(SH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/bin/sh")),
        }
    }
}
