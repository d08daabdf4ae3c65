//! Subprocess execution for IaC binaries and `run` steps.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::errors::IacError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Fail unless the exit code is one of `allowed`.
    pub fn require(self, program: &str, command: &str, allowed: &[i32]) -> Result<Self, IacError> {
        if allowed.contains(&self.exit_code) {
            Ok(self)
        } else {
            Err(IacError::NonZeroExit {
                program: program.to_string(),
                command: command.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Run `program args...` in `dir` with `env` added to the inherited environment.
/// Never fails on a non-zero exit; callers decide which codes are errors.
pub async fn run(
    program: &str,
    args: &[String],
    dir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<ProcessOutput, IacError> {
    debug!(program, ?args, dir = %dir.display(), "Running command");
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| IacError::Spawn {
            program: program.to_string(),
            source,
        })?;

    Ok(ProcessOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a shell snippet through `shell -c`.
pub async fn run_shell(
    shell: &str,
    script: &str,
    dir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<ProcessOutput, IacError> {
    run(shell, &["-c".to_string(), script.to_string()], dir, env).await
}
