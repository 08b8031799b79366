//! Shared deterministic types for the generate–execute–repair loop.
//!
//! These are plain values created per request. They carry no handles to the
//! filesystem, network, or child processes, so the loop's bookkeeping can be
//! tested without any I/O.

use std::path::PathBuf;

use anyhow::{Result, bail};
use serde::Serialize;

/// A single code-generation request as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub task_description: String,
    pub project_path: PathBuf,
    pub max_attempts: u32,
}

impl TaskRequest {
    pub fn new(
        task_description: impl Into<String>,
        project_path: impl Into<PathBuf>,
        max_attempts: u32,
    ) -> Result<Self> {
        let task_description = task_description.into();
        if task_description.trim().is_empty() {
            bail!("task description must not be empty");
        }
        if max_attempts == 0 {
            bail!("max_attempts must be >= 1");
        }
        Ok(Self {
            task_description,
            project_path: project_path.into(),
            max_attempts,
        })
    }
}

/// What the model returned for one prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ModelOutcome {
    /// Verbatim response text.
    Produced(String),
    /// Short diagnostic for a failed call (transport, auth, rate limit, ...).
    TransientFailure(String),
}

/// Captured streams of one program run, trimmed of trailing whitespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WriteOutcome {
    Written(PathBuf),
    NotWritten,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RunOutcome {
    Ran(RunOutput),
    NotRun,
}

/// Verdict for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Classification {
    Success,
    /// The program ran and wrote to stderr; carries that stderr.
    CodeFailure(String),
    ModelUnavailable,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::CodeFailure(_) => "code_failure",
            Classification::ModelUnavailable => "model_unavailable",
        }
    }
}

/// One full prompt → generate → write → run → classify cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    /// 1-based, strictly increasing within a request.
    pub index: u32,
    pub prompt: String,
    pub model_outcome: ModelOutcome,
    pub write_outcome: WriteOutcome,
    pub run_outcome: RunOutcome,
    pub classification: Classification,
}

impl Attempt {
    pub fn written_path(&self) -> Option<&PathBuf> {
        match &self.write_outcome {
            WriteOutcome::Written(path) => Some(path),
            WriteOutcome::NotWritten => None,
        }
    }
}

/// Terminal outcome of a request. Assigned exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalVerdict {
    /// An in-loop attempt ran cleanly.
    Succeeded { stdout: String },
    /// Every in-loop attempt failed but re-running the on-disk artifact was clean.
    SucceededOnReconciliation { stdout: String },
    /// Budget spent; carries the stderr of the most recent code failure.
    ExhaustedRetries { last_error: Option<String> },
    /// Every attempt hit a model failure; carries the last diagnostic.
    ModelUnavailableAtExhaustion { reason: Option<String> },
}

impl FinalVerdict {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FinalVerdict::Succeeded { .. } | FinalVerdict::SucceededOnReconciliation { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinalVerdict::Succeeded { .. } => "succeeded",
            FinalVerdict::SucceededOnReconciliation { .. } => "succeeded_on_reconciliation",
            FinalVerdict::ExhaustedRetries { .. } => "exhausted_retries",
            FinalVerdict::ModelUnavailableAtExhaustion { .. } => "model_unavailable_at_exhaustion",
        }
    }
}
