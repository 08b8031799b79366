//! Human-readable rendering of loop events and verdicts.

use std::path::Path;

use crate::core::classifier::is_clean_run;
use crate::core::types::{Classification, FinalVerdict, ModelOutcome, RunOutcome};
use crate::exit_codes;
use crate::repair::{LoopEvent, RunReport};

pub const RECONCILIATION_QUALIFIER: &str =
    "code was generated and runs, but the loop had recorded a failure";

/// Render one loop event, or `None` when the event has no product output.
pub fn render_event(event: &LoopEvent<'_>) -> Option<String> {
    match event {
        LoopEvent::AttemptStarted { .. } => None,
        LoopEvent::AttemptClassified {
            attempt,
            max_attempts,
        } => {
            let head = format!("attempt {}/{max_attempts}", attempt.index);
            let line = match (&attempt.classification, &attempt.run_outcome) {
                (Classification::Success, RunOutcome::Ran(output)) => {
                    with_body(format!("{head}: ran successfully"), &output.stdout)
                }
                (Classification::CodeFailure(stderr), _) => {
                    with_body(format!("{head}: error while running code"), stderr)
                }
                _ => match &attempt.model_outcome {
                    ModelOutcome::TransientFailure(reason) => {
                        format!("{head}: model unavailable ({reason})")
                    }
                    ModelOutcome::Produced(_) => format!("{head}: model unavailable"),
                },
            };
            Some(line)
        }
        LoopEvent::Reconciling { artifact_path } => Some(format!(
            "all attempts failed; re-running {}",
            artifact_path.display()
        )),
        LoopEvent::Reconciled { output } => Some(if is_clean_run(output) {
            with_body("reconciliation run: ran successfully".to_string(), &output.stdout)
        } else {
            with_body(
                "reconciliation run: error while running code".to_string(),
                &output.stderr,
            )
        }),
    }
}

/// Render the final verdict of a finished request.
pub fn render_verdict(report: &RunReport) -> String {
    let attempts = report.max_attempts;
    match &report.verdict {
        FinalVerdict::Succeeded { .. } => {
            format!("project created at {}", display_path(report.artifact_path.as_deref()))
        }
        FinalVerdict::SucceededOnReconciliation { .. } => format!(
            "project created at {} ({RECONCILIATION_QUALIFIER})",
            display_path(report.artifact_path.as_deref())
        ),
        FinalVerdict::ExhaustedRetries { last_error } => {
            let head = format!("could not generate a working project after {attempts} attempts");
            match last_error {
                Some(err) => format!("{head}; last error:\n{err}"),
                None => head,
            }
        }
        FinalVerdict::ModelUnavailableAtExhaustion { reason } => {
            let head = format!("model unavailable after {attempts} attempts");
            match reason {
                Some(reason) => format!("{head}: {reason}"),
                None => head,
            }
        }
    }
}

pub fn exit_code(verdict: &FinalVerdict) -> i32 {
    match verdict {
        FinalVerdict::Succeeded { .. } | FinalVerdict::SucceededOnReconciliation { .. } => {
            exit_codes::OK
        }
        FinalVerdict::ExhaustedRetries { .. } => exit_codes::EXHAUSTED,
        FinalVerdict::ModelUnavailableAtExhaustion { .. } => exit_codes::MODEL_UNAVAILABLE,
    }
}

fn with_body(head: String, body: &str) -> String {
    if body.is_empty() {
        head
    } else {
        format!("{head}\n{body}")
    }
}

fn display_path(path: Option<&Path>) -> String {
    path.map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string())
}
