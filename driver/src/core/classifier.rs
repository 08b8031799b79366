//! Deterministic classification of program runs.
//!
//! A run counts as clean when nothing was written to stderr. The exit code is
//! deliberately ignored: a program that exits non-zero without printing a
//! diagnostic is treated as a success.

use crate::core::types::{Classification, RunOutput};

/// The single success predicate shared by the loop and its invariant checks.
pub fn is_clean_run(output: &RunOutput) -> bool {
    output.stderr.trim().is_empty()
}

/// Classify a finished run as `Success` or `CodeFailure(stderr)`.
pub fn classify_run(output: &RunOutput) -> Classification {
    if is_clean_run(output) {
        Classification::Success
    } else {
        Classification::CodeFailure(output.stderr.clone())
    }
}
