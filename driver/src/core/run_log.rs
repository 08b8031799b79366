//! Ordered record of attempts for one request, plus the carried-forward error.

use std::path::PathBuf;

use crate::core::types::{Attempt, Classification, ModelOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    attempts: Vec<Attempt>,
    last_error: Option<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next recorded attempt must carry.
    pub fn next_index(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    /// Append an attempt and update the carried error.
    ///
    /// `CodeFailure` replaces the last error, `Success` clears it and
    /// `ModelUnavailable` leaves it untouched.
    pub fn record(&mut self, attempt: Attempt) -> Result<(), String> {
        let expected = self.next_index();
        if attempt.index != expected {
            return Err(format!(
                "attempt index {} out of order (expected {expected})",
                attempt.index
            ));
        }
        match &attempt.classification {
            Classification::CodeFailure(err) => self.last_error = Some(err.clone()),
            Classification::Success => self.last_error = None,
            Classification::ModelUnavailable => {}
        }
        self.attempts.push(attempt);
        Ok(())
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn into_attempts(self) -> Vec<Attempt> {
        self.attempts
    }

    pub fn last(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Path of the most recently written artifact, i.e. the one on disk now.
    pub fn last_written_path(&self) -> Option<&PathBuf> {
        self.attempts.iter().rev().find_map(Attempt::written_path)
    }

    /// Diagnostic of the most recent transient model failure, if any.
    pub fn last_model_failure(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|a| match &a.model_outcome {
            ModelOutcome::TransientFailure(reason) => Some(reason.as_str()),
            ModelOutcome::Produced(_) => None,
        })
    }
}
