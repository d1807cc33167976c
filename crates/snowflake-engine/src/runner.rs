//! Invocation of rule build scripts.

use std::path::{Path, PathBuf};
use std::process::Command;

use snowflake_util::process::run_command;

use crate::error::EngineError;
use crate::tools::Tools;

/// Name of the executable a rule must provide in its scratch directory.
pub const BUILD_SCRIPT: &str = "snowflake-build";

/// Name of the artifact a build script must produce.
pub const OUTPUT_NAME: &str = "snowflake-output";

/// Name of the file capturing the build script's stdout and stderr.
pub const LOG_NAME: &str = "snowflake-log";

// The wrapper handed to the shell. `$1` is the scratch directory; the
// remaining arguments are dependency paths, which are forwarded to the
// build script verbatim. stdin is closed and both output streams land in
// the log file, so a build cannot interleave with engine diagnostics.
const SCRIPT: &str = "set -eu\n\
                      cd \"$1\"\n\
                      shift\n\
                      exec ./snowflake-build \"$@\" <&- >snowflake-log 2>&1\n";

/// Runs build scripts in their scratch directories.
#[derive(Debug)]
pub struct Runner {
    shell: PathBuf,
}

impl Runner {
    /// Create a runner using the configured shell interpreter.
    pub fn new(tools: &Tools) -> Self {
        Self {
            shell: tools.shell.clone(),
        }
    }

    /// Execute `snowflake-build` inside `scratch_dir`.
    ///
    /// `scratch_dir` must be absolute; `dep_paths` are handed to the script
    /// as positional arguments in declaration order, relative to the
    /// scratch directory.
    ///
    /// # Errors
    /// Returns [`EngineError::BuildScriptFailed`] (carrying the captured
    /// log) on a nonzero exit, or a spawn error if the shell itself cannot
    /// be started.
    pub fn run(
        &self,
        rule_name: &str,
        scratch_dir: &Path,
        dep_paths: &[PathBuf],
    ) -> Result<(), EngineError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(SCRIPT).arg("--").arg(scratch_dir);
        for path in dep_paths {
            cmd.arg(path);
        }

        let output = run_command(&mut cmd)?;
        if output.success {
            return Ok(());
        }

        // Builds write their streams to the log file; read it back so the
        // failure carries everything the script said.
        let log = std::fs::read_to_string(scratch_dir.join(LOG_NAME)).unwrap_or_default();
        Err(EngineError::BuildScriptFailed {
            rule: rule_name.to_owned(),
            code: output.exit_code,
            log,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;

    use super::*;

    fn scratch_with_script(script: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("work");
        fs::create_dir_all(&scratch).unwrap();
        let path = scratch.join(BUILD_SCRIPT);
        fs::write(&path, script).unwrap();
        snowflake_util::fs::set_executable(&path).unwrap();
        (tmp, scratch)
    }

    fn runner() -> Runner {
        Runner::new(&Tools::from_env())
    }

    #[test]
    fn successful_script_writes_output_and_log() {
        let (_tmp, scratch) = scratch_with_script(
            "#!/bin/sh\necho building\nprintf hello > snowflake-output\n",
        );

        runner().run("r", &scratch, &[]).unwrap();
        assert_eq!(fs::read(scratch.join(OUTPUT_NAME)).unwrap(), b"hello");
        let log = fs::read_to_string(scratch.join(LOG_NAME)).unwrap();
        assert!(log.contains("building"));
    }

    #[test]
    fn script_receives_dependency_paths() {
        let (_tmp, scratch) = scratch_with_script(
            "#!/bin/sh\nprintf '%s,%s' \"$1\" \"$2\" > snowflake-output\n",
        );

        runner()
            .run(
                "r",
                &scratch,
                &[PathBuf::from("../../dep-one"), PathBuf::from("../../dep-two")],
            )
            .unwrap();
        assert_eq!(
            fs::read(scratch.join(OUTPUT_NAME)).unwrap(),
            b"../../dep-one,../../dep-two"
        );
    }

    #[test]
    fn script_runs_in_scratch_directory() {
        let (_tmp, scratch) = scratch_with_script("#!/bin/sh\npwd > snowflake-output\n");

        runner().run("r", &scratch, &[]).unwrap();
        let recorded = fs::read_to_string(scratch.join(OUTPUT_NAME)).unwrap();
        assert_eq!(
            fs::canonicalize(recorded.trim()).unwrap(),
            fs::canonicalize(&scratch).unwrap()
        );
    }

    #[test]
    fn script_stdin_is_closed() {
        // `cat` with no arguments reads stdin; with stdin closed it
        // terminates immediately instead of hanging.
        let (_tmp, scratch) =
            scratch_with_script("#!/bin/sh\ncat || true\nprintf done > snowflake-output\n");

        runner().run("r", &scratch, &[]).unwrap();
        assert_eq!(fs::read(scratch.join(OUTPUT_NAME)).unwrap(), b"done");
    }

    #[test]
    fn failing_script_surfaces_log() {
        let (_tmp, scratch) =
            scratch_with_script("#!/bin/sh\necho boom >&2\nexit 1\n");

        let err = runner().run("r", &scratch, &[]).unwrap_err();
        match &err {
            EngineError::BuildScriptFailed { rule, code, log } => {
                assert_eq!(rule, "r");
                assert_eq!(*code, Some(1));
                assert!(log.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn missing_script_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let scratch = tmp.path().join("work");
        fs::create_dir_all(&scratch).unwrap();

        let result = runner().run("r", &scratch, &[]);
        assert!(matches!(
            result,
            Err(EngineError::BuildScriptFailed { .. })
        ));
    }
}
