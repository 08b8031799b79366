//! Optional on-disk transcript of a request (`--log-dir`).
//!
//! Layout:
//!
//! ```text
//! <dir>/attempts/<index>/meta.json
//! <dir>/attempts/<index>/prompt.md
//! <dir>/attempts/<index>/response.txt   (model produced code)
//! <dir>/attempts/<index>/stdout.log     (program ran)
//! <dir>/attempts/<index>/stderr.log     (program ran)
//! <dir>/reconciliation.log              (reconciliation ran)
//! <dir>/verdict.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{Attempt, ModelOutcome, RunOutcome, RunOutput};
use crate::repair::RunReport;

#[derive(Debug, Clone, Serialize)]
pub struct AttemptMeta<'a> {
    pub index: u32,
    pub classification: &'static str,
    pub model_failure: Option<&'a str>,
    pub artifact_path: Option<&'a Path>,
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(root: &Path, index: u32) -> Self {
        let dir = root.join("attempts").join(index.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.txt"),
            stdout_path: dir.join("stdout.log"),
            stderr_path: dir.join("stderr.log"),
        }
    }
}

/// Write every attempt, the reconciliation run, and the verdict under `root`.
pub fn write_transcript(root: &Path, report: &RunReport) -> Result<PathBuf> {
    fs::create_dir_all(root)
        .with_context(|| format!("create transcript dir {}", root.display()))?;

    // Write in deterministic order to keep transcripts stable.
    for attempt in &report.attempts {
        write_attempt(root, attempt)?;
    }
    if let Some(output) = &report.reconciliation {
        write_text(&root.join("reconciliation.log"), &render_run(output))?;
    }
    let verdict_path = root.join("verdict.json");
    write_json(&verdict_path, report)?;
    Ok(verdict_path)
}

fn write_attempt(root: &Path, attempt: &Attempt) -> Result<AttemptPaths> {
    let paths = AttemptPaths::new(root, attempt.index);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

    let model_failure = match &attempt.model_outcome {
        ModelOutcome::TransientFailure(reason) => Some(reason.as_str()),
        ModelOutcome::Produced(_) => None,
    };
    let meta = AttemptMeta {
        index: attempt.index,
        classification: attempt.classification.as_str(),
        model_failure,
        artifact_path: attempt.written_path().map(PathBuf::as_path),
    };
    write_json(&paths.meta_path, &meta)?;
    write_text(&paths.prompt_path, &attempt.prompt)?;
    if let ModelOutcome::Produced(code) = &attempt.model_outcome {
        write_text(&paths.response_path, code)?;
    }
    if let RunOutcome::Ran(output) = &attempt.run_outcome {
        write_text(&paths.stdout_path, &output.stdout)?;
        write_text(&paths.stderr_path, &output.stderr)?;
    }
    Ok(paths)
}

fn render_run(output: &RunOutput) -> String {
    format!(
        "=== stdout ===\n{}\n=== stderr ===\n{}\n",
        output.stdout, output.stderr
    )
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FinalVerdict;
    use crate::test_support::{code_failure_attempt, model_unavailable_attempt};

    #[test]
    fn attempt_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = AttemptPaths::new(temp.path(), 3);

        assert!(paths.dir.ends_with(Path::new("attempts/3")));
        assert!(paths.meta_path.ends_with("meta.json"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.response_path.ends_with("response.txt"));
        assert!(paths.stdout_path.ends_with("stdout.log"));
        assert!(paths.stderr_path.ends_with("stderr.log"));
    }

    #[test]
    fn writes_only_files_for_outcomes_that_exist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("log");
        let report = RunReport {
            max_attempts: 2,
            attempts: vec![
                model_unavailable_attempt(1, "prompt one"),
                code_failure_attempt(2, "prompt two", "/p/main.py", "E"),
            ],
            last_error: Some("E".to_string()),
            reconciliation: Some(RunOutput::new("", "E")),
            artifact_path: Some(PathBuf::from("/p/main.py")),
            verdict: FinalVerdict::ExhaustedRetries {
                last_error: Some("E".to_string()),
            },
        };

        let verdict_path = write_transcript(&root, &report).expect("write transcript");

        let first = AttemptPaths::new(&root, 1);
        assert!(first.meta_path.is_file());
        assert!(first.prompt_path.is_file());
        assert!(!first.response_path.exists());
        assert!(!first.stdout_path.exists());

        let second = AttemptPaths::new(&root, 2);
        assert!(second.response_path.is_file());
        assert_eq!(fs::read_to_string(&second.stderr_path).expect("read"), "E");
        assert!(root.join("reconciliation.log").is_file());

        let verdict: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(verdict_path).expect("read")).expect("json");
        assert_eq!(verdict["verdict"]["kind"], "exhausted_retries");

        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&first.meta_path).expect("read"))
                .expect("json");
        assert_eq!(meta["classification"], "model_unavailable");
        assert_eq!(meta["model_failure"], "model offline");
    }
}
