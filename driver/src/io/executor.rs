//! Executor abstraction for running generated programs.
//!
//! The [`Executor`] trait decouples the repair loop from the language runtime.
//! Tests use scripted executors that return predetermined outputs without
//! spawning processes.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::RunOutput;
use crate::io::process::{CommandOutput, run_command};

/// Abstraction over program runtimes.
pub trait Executor {
    /// Run the program at `artifact_path` and return its captured streams.
    ///
    /// Never fails: problems starting the program are reported as stderr text.
    fn run(&self, artifact_path: &Path) -> RunOutput;
}

/// Working directory used for the child process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkdirPolicy {
    /// Run inside the artifact's directory, passing just the file name.
    #[default]
    Artifact,
    /// Run in the driver's own working directory, passing the path as given.
    Caller,
}

/// Executor that runs the artifact with a native interpreter, e.g. `python3 main.py`.
#[derive(Debug, Clone)]
pub struct RuntimeExecutor {
    program: String,
    /// Absolute interpreter path found by [`RuntimeExecutor::preflight`].
    resolved: Option<PathBuf>,
    args: Vec<String>,
    workdir: WorkdirPolicy,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

impl RuntimeExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            resolved: None,
            args: Vec::new(),
            workdir: WorkdirPolicy::default(),
            timeout: None,
            output_limit_bytes: 1_000_000,
        }
    }

    /// Arguments placed between the interpreter and the artifact path.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_workdir(mut self, workdir: WorkdirPolicy) -> Self {
        self.workdir = workdir;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// The interpreter that will be spawned: the resolved path after preflight,
    /// otherwise the configured name.
    pub fn program(&self) -> &Path {
        self.resolved
            .as_deref()
            .unwrap_or_else(|| Path::new(&self.program))
    }

    /// Resolve the interpreter before any attempt is made.
    ///
    /// Bare names are looked up on `PATH`; relative paths are taken against the
    /// driver's working directory. Runs then spawn the absolute result, so the
    /// artifact working directory cannot change which interpreter starts.
    pub fn preflight(mut self) -> Result<Self> {
        let found = which::which(&self.program).with_context(|| {
            format!(
                "runtime `{}` not found (install it or set runtime.program in the config)",
                self.program
            )
        })?;
        let resolved = std::path::absolute(&found)
            .with_context(|| format!("resolve runtime path {}", found.display()))?;
        debug!(program = %self.program, resolved = %resolved.display(), "runtime resolved");
        self.resolved = Some(resolved);
        Ok(self)
    }

    fn command_for(&self, artifact_path: &Path) -> Command {
        let mut cmd = Command::new(self.program());
        cmd.args(&self.args);
        match self.workdir {
            WorkdirPolicy::Artifact => {
                let parent = artifact_path.parent().filter(|p| !p.as_os_str().is_empty());
                match (parent, artifact_path.file_name()) {
                    (Some(dir), Some(name)) => {
                        cmd.current_dir(dir).arg(name);
                    }
                    _ => {
                        cmd.arg(artifact_path);
                    }
                }
            }
            WorkdirPolicy::Caller => {
                cmd.arg(artifact_path);
            }
        }
        cmd
    }
}

impl Executor for RuntimeExecutor {
    #[instrument(skip_all, fields(program = %self.program, artifact = %artifact_path.display()))]
    fn run(&self, artifact_path: &Path) -> RunOutput {
        info!("running artifact");
        let cmd = self.command_for(artifact_path);
        match run_command(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => {
                debug!(exit_code = ?output.status.code(), "artifact finished");
                to_run_output(&output, self.timeout)
            }
            Err(err) => {
                warn!(err = %err, "could not start runtime");
                RunOutput::new(
                    "",
                    format!("failed to run {} with `{}`: {err:#}", artifact_path.display(), self.program),
                )
            }
        }
    }
}

fn to_run_output(output: &CommandOutput, timeout: Option<Duration>) -> RunOutput {
    let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    stdout.push_str(&output.stdout_truncated_notice());

    let mut stderr = String::from_utf8_lossy(&output.stderr)
        .trim_end()
        .to_string();
    if !stderr.is_empty() {
        stderr.push_str(&output.stderr_truncated_notice());
    }
    if output.timed_out {
        let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
        if !stderr.is_empty() {
            stderr.push('\n');
        }
        stderr.push_str(&format!("[timed out after {secs}s]"));
    }

    RunOutput::new(stdout.trim_end(), stderr.trim_end())
}
