//! Generate–execute–repair loop for a single request.
//!
//! The loop is a small state machine:
//!
//! ```text
//! Attempting(1) -> Attempting(2) -> ... -> Attempting(N)
//!       |                 |                     |
//!       +--- success -----+--------> Terminal(Succeeded)
//!                                               |
//!                     budget spent, artifact on disk -> Reconciling -> Terminal(..)
//!                     budget spent, nothing written  -> Terminal(ModelUnavailableAtExhaustion)
//! ```
//!
//! Every verdict is assigned in exactly one place: the transition into
//! `Terminal`. Transient model failures and failing programs are ordinary
//! attempt outcomes; only prompt rendering and artifact write failures abort the
//! request with an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::{classify_run, is_clean_run};
use crate::core::invariants::validate_run_log;
use crate::core::run_log::RunLog;
use crate::core::types::{
    Attempt, Classification, FinalVerdict, ModelOutcome, RunOutcome, RunOutput, TaskRequest,
    WriteOutcome,
};
use crate::io::artifact::ArtifactStore;
use crate::io::executor::Executor;
use crate::io::model::ModelClient;
use crate::io::prompt::PromptBuilder;

/// Progress notifications emitted while a request runs, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent<'a> {
    AttemptStarted {
        index: u32,
        max_attempts: u32,
    },
    AttemptClassified {
        attempt: &'a Attempt,
        max_attempts: u32,
    },
    /// Every attempt failed; the on-disk artifact is about to be re-run.
    Reconciling {
        artifact_path: &'a Path,
    },
    Reconciled {
        output: &'a RunOutput,
    },
}

/// Everything known about a finished request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub max_attempts: u32,
    pub attempts: Vec<Attempt>,
    /// Stderr of the most recent code failure, if the request did not succeed in-loop.
    pub last_error: Option<String>,
    /// Output of the reconciliation run, when one happened.
    pub reconciliation: Option<RunOutput>,
    /// The artifact left on disk, if any attempt wrote one.
    pub artifact_path: Option<PathBuf>,
    pub verdict: FinalVerdict,
}

/// The collaborators one request is driven through.
pub struct Collaborators<'a, M, E> {
    pub model: &'a M,
    pub executor: &'a E,
    pub store: &'a ArtifactStore,
    pub prompts: &'a PromptBuilder,
}

#[derive(Debug)]
enum LoopState {
    Attempting(u32),
    Reconciling(PathBuf),
    Terminal(FinalVerdict),
}

/// Drive `request` to a final verdict.
///
/// Returns `Err` only for abnormal termination (prompt rendering or artifact
/// write failures); no further attempts and no reconciliation happen then.
#[instrument(skip_all, fields(max_attempts = request.max_attempts, project = %request.project_path.display()))]
pub fn run_request<M, E, F>(
    request: &TaskRequest,
    parts: &Collaborators<'_, M, E>,
    mut on_event: F,
) -> Result<RunReport>
where
    M: ModelClient,
    E: Executor,
    F: FnMut(&LoopEvent<'_>),
{
    let max_attempts = request.max_attempts;
    let mut log = RunLog::new();
    let mut reconciliation: Option<RunOutput> = None;
    let mut state = LoopState::Attempting(1);

    let verdict = loop {
        state = match state {
            LoopState::Attempting(index) => {
                on_event(&LoopEvent::AttemptStarted {
                    index,
                    max_attempts,
                });
                let attempt = run_attempt(index, request, parts, log.last_error())?;
                log.record(attempt)
                    .map_err(|err| anyhow!("record attempt: {err}"))?;
                let Some(attempt) = log.last() else {
                    bail!("attempt {index} missing from run log");
                };
                on_event(&LoopEvent::AttemptClassified {
                    attempt,
                    max_attempts,
                });
                next_after_attempt(attempt, &log, max_attempts)
            }
            LoopState::Reconciling(path) => {
                info!(artifact = %path.display(), "reconciling last artifact");
                on_event(&LoopEvent::Reconciling {
                    artifact_path: &path,
                });
                let output = parts.executor.run(&path);
                on_event(&LoopEvent::Reconciled { output: &output });
                let next = verdict_after_reconciliation(&output, &log);
                reconciliation = Some(output);
                LoopState::Terminal(next)
            }
            LoopState::Terminal(verdict) => break verdict,
        };
    };

    let errors = validate_run_log(&log, max_attempts);
    if !errors.is_empty() {
        bail!("run log invariant violations:\n- {}", errors.join("\n- "));
    }

    info!(verdict = verdict.as_str(), attempts = log.len(), "request finished");
    Ok(RunReport {
        max_attempts,
        last_error: log.last_error().map(str::to_string),
        artifact_path: log.last_written_path().cloned(),
        attempts: log.into_attempts(),
        reconciliation,
        verdict,
    })
}

/// One prompt → generate → write → run → classify cycle.
fn run_attempt<M: ModelClient, E: Executor>(
    index: u32,
    request: &TaskRequest,
    parts: &Collaborators<'_, M, E>,
    last_error: Option<&str>,
) -> Result<Attempt> {
    let prompt = parts
        .prompts
        .build(&request.task_description, last_error)
        .with_context(|| format!("attempt {index}: build prompt"))?;
    debug!(index, prompt_bytes = prompt.len(), has_error = last_error.is_some(), "prompt built");

    let model_outcome = parts.model.generate(&prompt);
    let code = match &model_outcome {
        ModelOutcome::Produced(code) => code,
        ModelOutcome::TransientFailure(reason) => {
            warn!(index, %reason, "model unavailable");
            return Ok(Attempt {
                index,
                prompt,
                model_outcome,
                write_outcome: WriteOutcome::NotWritten,
                run_outcome: RunOutcome::NotRun,
                classification: Classification::ModelUnavailable,
            });
        }
    };

    let path = parts
        .store
        .write(&request.project_path, code)
        .with_context(|| format!("attempt {index}: write artifact"))?;
    let output = parts.executor.run(&path);
    let classification = classify_run(&output);
    info!(index, classification = classification.as_str(), "attempt classified");

    Ok(Attempt {
        index,
        prompt,
        model_outcome,
        write_outcome: WriteOutcome::Written(path),
        run_outcome: RunOutcome::Ran(output),
        classification,
    })
}

fn next_after_attempt(attempt: &Attempt, log: &RunLog, max_attempts: u32) -> LoopState {
    if let (Classification::Success, RunOutcome::Ran(output)) =
        (&attempt.classification, &attempt.run_outcome)
    {
        return LoopState::Terminal(FinalVerdict::Succeeded {
            stdout: output.stdout.clone(),
        });
    }
    if attempt.index < max_attempts {
        return LoopState::Attempting(attempt.index + 1);
    }
    match log.last_written_path() {
        Some(path) => LoopState::Reconciling(path.clone()),
        None => LoopState::Terminal(FinalVerdict::ModelUnavailableAtExhaustion {
            reason: log.last_model_failure().map(str::to_string),
        }),
    }
}

/// Only reached when some attempt wrote an artifact, so the log holds a code failure.
fn verdict_after_reconciliation(output: &RunOutput, log: &RunLog) -> FinalVerdict {
    debug_assert!(log.last_written_path().is_some(), "reconciled without an artifact");
    if is_clean_run(output) {
        FinalVerdict::SucceededOnReconciliation {
            stdout: output.stdout.clone(),
        }
    } else {
        FinalVerdict::ExhaustedRetries {
            last_error: log.last_error().map(str::to_string),
        }
    }
}
