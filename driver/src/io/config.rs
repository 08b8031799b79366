//! Driver configuration: TOML file, environment, and CLI overrides.
//!
//! Precedence, highest first: CLI flags, environment variables, config file,
//! built-in defaults. The API key is only ever taken from a flag or the
//! environment, never from the config file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::io::executor::{RuntimeExecutor, WorkdirPolicy};
use crate::io::model::ModelConfig;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const MODEL_ENV: &str = "OPENAI_MODEL";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Driver configuration (TOML).
///
/// Missing fields default to values suitable for generating Python programs
/// against the OpenAI API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// Attempts per request, including attempts where the model was unavailable.
    pub max_attempts: u32,
    pub model: ModelSection,
    pub runtime: RuntimeConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelSection {
    /// Model identifier sent with every request.
    pub model: String,
    pub base_url: String,
    /// HTTP timeout for one generation request.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Language name used in the prompt (e.g. "Python").
    pub language: String,
    /// Interpreter executable, resolved on `PATH`.
    pub program: String,
    /// Extra interpreter arguments placed before the artifact path.
    pub args: Vec<String>,
    /// Entry-point file name written into the project directory.
    pub entry_file: String,
    /// Kill the program after this many seconds; `0` waits indefinitely.
    pub timeout_secs: u64,
    /// Per-stream capture limit.
    pub output_limit_bytes: usize,
    pub workdir: WorkdirPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Prompt size above which the prior-error section is elided.
    pub budget_bytes: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            model: ModelSection::default(),
            runtime: RuntimeConfig::default(),
            prompt: PromptConfig::default(),
        }
    }
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            language: "Python".to_string(),
            program: "python3".to_string(),
            args: Vec::new(),
            entry_file: "main.py".to_string(),
            timeout_secs: 0,
            output_limit_bytes: 1_000_000,
            workdir: WorkdirPolicy::Artifact,
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 40_000,
        }
    }
}

impl DriverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must not be empty"));
        }
        if self.model.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if self.runtime.program.trim().is_empty() {
            return Err(anyhow!("runtime.program must not be empty"));
        }
        let entry = self.runtime.entry_file.trim();
        if entry.is_empty() || entry.contains(['/', '\\']) {
            return Err(anyhow!("runtime.entry_file must be a bare file name"));
        }
        if self.runtime.output_limit_bytes == 0 {
            return Err(anyhow!("runtime.output_limit_bytes must be > 0"));
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        Ok(())
    }
}

impl RuntimeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn executor(&self) -> RuntimeExecutor {
        RuntimeExecutor::new(self.program.clone())
            .with_args(self.args.clone())
            .with_workdir(self.workdir)
            .with_timeout(self.timeout())
            .with_output_limit(self.output_limit_bytes)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DriverConfig::default()`.
pub fn load_config(path: &Path) -> Result<DriverConfig> {
    if !path.exists() {
        let cfg = DriverConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DriverConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
#[cfg(any(test, feature = "test-support"))]
pub fn write_config(path: &Path, cfg: &DriverConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(any(test, feature = "test-support"))]
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_attempts: Option<u32>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Fully resolved settings for one process.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_attempts: u32,
    pub model: ModelConfig,
    pub runtime: RuntimeConfig,
    pub prompt: PromptConfig,
}

/// Merge config, environment (looked up through `env`), and CLI overrides.
///
/// A missing or blank API key is an error here so the user learns about it
/// before any attempt is made.
pub fn resolve_settings<F>(cfg: DriverConfig, overrides: &Overrides, env: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let non_blank = |value: String| (!value.trim().is_empty()).then_some(value);

    let api_key = overrides
        .api_key
        .clone()
        .or_else(|| env(API_KEY_ENV))
        .unwrap_or_default();
    if api_key.trim().is_empty() {
        bail!("missing API key: set {API_KEY_ENV} or pass --api-key");
    }

    let model = overrides
        .model
        .clone()
        .and_then(non_blank)
        .or_else(|| env(MODEL_ENV).and_then(non_blank))
        .unwrap_or(cfg.model.model);
    let base_url = overrides
        .base_url
        .clone()
        .and_then(non_blank)
        .or_else(|| env(BASE_URL_ENV).and_then(non_blank))
        .unwrap_or(cfg.model.base_url);

    let max_attempts = overrides.max_attempts.unwrap_or(cfg.max_attempts);
    if max_attempts == 0 {
        bail!("--max-attempts must be at least 1");
    }

    Ok(Settings {
        max_attempts,
        model: ModelConfig {
            api_key,
            model,
            base_url,
            timeout: Duration::from_secs(cfg.model.timeout_secs),
        },
        runtime: cfg.runtime,
        prompt: cfg.prompt,
    })
}
