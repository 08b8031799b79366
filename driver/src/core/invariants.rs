//! Semantic checks over a finished run log.

use crate::core::classifier::is_clean_run;
use crate::core::run_log::RunLog;
use crate::core::types::{Classification, ModelOutcome, RunOutcome, WriteOutcome};

/// Validate run-log invariants and return a list of violations (empty when valid).
pub fn validate_run_log(log: &RunLog, max_attempts: u32) -> Vec<String> {
    let mut errors = Vec::new();

    if log.len() > max_attempts as usize {
        errors.push(format!(
            "{} attempts recorded but max_attempts is {max_attempts}",
            log.len()
        ));
    }

    let mut saw_code_failure = false;
    for (pos, attempt) in log.attempts().iter().enumerate() {
        let expected = pos as u32 + 1;
        if attempt.index != expected {
            errors.push(format!(
                "attempt at position {pos} has index {} (expected {expected})",
                attempt.index
            ));
        }

        match (&attempt.model_outcome, &attempt.classification) {
            (ModelOutcome::TransientFailure(_), Classification::ModelUnavailable) => {}
            (ModelOutcome::TransientFailure(_), other) => errors.push(format!(
                "attempt {}: model failure classified as {}",
                attempt.index,
                other.as_str()
            )),
            (ModelOutcome::Produced(_), Classification::ModelUnavailable) => errors.push(format!(
                "attempt {}: produced code classified as model_unavailable",
                attempt.index
            )),
            (ModelOutcome::Produced(_), _) => {}
        }

        if attempt.classification == Classification::ModelUnavailable
            && attempt.write_outcome != WriteOutcome::NotWritten
        {
            errors.push(format!(
                "attempt {}: model_unavailable attempt wrote an artifact",
                attempt.index
            ));
        }

        if attempt.write_outcome == WriteOutcome::NotWritten
            && attempt.run_outcome != RunOutcome::NotRun
        {
            errors.push(format!(
                "attempt {}: ran without writing an artifact",
                attempt.index
            ));
        }

        match (&attempt.classification, &attempt.run_outcome) {
            (Classification::Success, RunOutcome::Ran(output)) if !is_clean_run(output) => {
                errors.push(format!(
                    "attempt {}: success recorded with non-empty stderr",
                    attempt.index
                ));
            }
            (Classification::Success, RunOutcome::NotRun) => errors.push(format!(
                "attempt {}: success recorded without a run",
                attempt.index
            )),
            (Classification::CodeFailure(_), _) => saw_code_failure = true,
            _ => {}
        }

        if attempt.classification == Classification::Success && pos + 1 != log.len() {
            errors.push(format!(
                "attempt {}: attempts continued after a success",
                attempt.index
            ));
        }
    }

    if log.last_error().is_some() && !saw_code_failure {
        errors.push("last error set without any code failure".to_string());
    }

    errors
}
