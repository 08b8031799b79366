//! `codegen-driver`: generate a working single-file program for a task.
//!
//! Asks a chat model for code, writes it into the project directory, runs it,
//! and repairs it from its own stderr until it runs cleanly or the attempt
//! budget is spent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use codegen_driver::core::types::TaskRequest;
use codegen_driver::exit_codes;
use codegen_driver::io::artifact::ArtifactStore;
use codegen_driver::io::config::{DriverConfig, Overrides, load_config, resolve_settings};
use codegen_driver::io::model::ChatModelClient;
use codegen_driver::io::prompt::PromptBuilder;
use codegen_driver::io::transcript::write_transcript;
use codegen_driver::logging;
use codegen_driver::repair::{Collaborators, run_request};
use codegen_driver::report::{exit_code, render_event, render_verdict};

#[derive(Debug, Parser)]
#[command(
    name = "codegen-driver",
    version,
    about = "Generate, run, and repair a single-file program until it works"
)]
struct Cli {
    /// What the program should do.
    task: String,
    /// Directory the entry-point file is written into (created if missing).
    project_path: PathBuf,
    /// Attempts before giving up, including attempts where the model was unavailable.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_attempts: Option<u32>,
    /// Model identifier (overrides OPENAI_MODEL and the config file).
    #[arg(long)]
    model: Option<String>,
    /// API key (overrides OPENAI_API_KEY).
    #[arg(long)]
    api_key: Option<String>,
    /// Chat-completions base URL (overrides OPENAI_BASE_URL and the config file).
    #[arg(long)]
    base_url: Option<String>,
    /// TOML config file; a missing file means defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write a per-attempt transcript into this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() {
    logging::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            std::process::exit(exit_codes::INVALID);
        }
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let cfg = match &cli.config {
        Some(path) => load_config(path)?,
        None => DriverConfig::default(),
    };
    let overrides = Overrides {
        max_attempts: cli.max_attempts,
        model: cli.model,
        api_key: cli.api_key,
        base_url: cli.base_url,
    };
    let settings = resolve_settings(cfg, &overrides, |key| std::env::var(key).ok())?;
    let request = TaskRequest::new(cli.task, cli.project_path, settings.max_attempts)?;

    let model = ChatModelClient::new(settings.model.clone()).context("configure model client")?;
    let executor = settings.runtime.executor().preflight()?;
    info!(model = model.model(), runtime = %executor.program().display(), "starting request");

    let store = ArtifactStore::new(settings.runtime.entry_file.clone())?;
    let prompts = PromptBuilder::new(
        settings.runtime.language.clone(),
        store.entry_file(),
        settings.prompt.budget_bytes,
    )?;
    let parts = Collaborators {
        model: &model,
        executor: &executor,
        store: &store,
        prompts: &prompts,
    };

    let report = run_request(&request, &parts, |event| {
        if let Some(line) = render_event(event) {
            println!("{line}");
        }
    })?;
    println!("{}", render_verdict(&report));

    if let Some(dir) = &cli.log_dir {
        match write_transcript(dir, &report) {
            Ok(path) => info!(path = %path.display(), "transcript written"),
            Err(err) => {
                warn!(error = %err, "transcript failed");
                eprintln!("warning: could not write transcript: {err:#}");
            }
        }
    }

    Ok(exit_code(&report.verdict))
}
