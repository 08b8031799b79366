//! Test-only doubles and fixtures for the repair loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::runtime::{Builder, Runtime};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use crate::core::types::{
    Attempt, Classification, ModelOutcome, RunOutcome, RunOutput, WriteOutcome,
};
use crate::io::artifact::ArtifactStore;
use crate::io::executor::Executor;
use crate::io::model::ModelClient;
use crate::io::prompt::PromptBuilder;

/// Reason carried by [`model_unavailable_attempt`].
pub const MODEL_OFFLINE: &str = "model offline";

/// Path [`MockChatApi`] serves completions on, below its base URL.
pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Model double that replays a fixed sequence of outcomes and records prompts.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    outcomes: RefCell<VecDeque<ModelOutcome>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(outcomes: Vec<ModelOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Shorthand for a script of produced responses.
    pub fn producing(responses: &[&str]) -> Self {
        Self::new(
            responses
                .iter()
                .map(|code| ModelOutcome::Produced((*code).to_string()))
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl ModelClient for ScriptedModel {
    fn generate(&self, prompt: &str) -> ModelOutcome {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| ModelOutcome::TransientFailure("script exhausted".to_string()))
    }
}

/// One program run observed by [`ScriptedExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedRun {
    pub path: PathBuf,
    /// Artifact contents at the moment it was run.
    pub contents: String,
}

/// Executor double that replays fixed run outputs and records what it ran.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outputs: RefCell<VecDeque<RunOutput>>,
    runs: RefCell<Vec<ExecutedRun>>,
}

impl ScriptedExecutor {
    pub fn new(outputs: Vec<RunOutput>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into()),
            runs: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.runs.borrow().len()
    }

    pub fn runs(&self) -> Vec<ExecutedRun> {
        self.runs.borrow().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn run(&self, artifact_path: &Path) -> RunOutput {
        self.runs.borrow_mut().push(ExecutedRun {
            path: artifact_path.to_path_buf(),
            contents: fs::read_to_string(artifact_path).unwrap_or_default(),
        });
        self.outputs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| RunOutput::new("", "executor script exhausted"))
    }
}

/// Temporary project directory with the default artifact store and prompt builder.
pub struct TestProject {
    temp: TempDir,
    pub store: ArtifactStore,
    pub prompts: PromptBuilder,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        Ok(Self {
            temp,
            store: ArtifactStore::new("main.py")?,
            prompts: PromptBuilder::new("Python", "main.py", 40_000)?,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Project directory handed to the loop; not created up front.
    pub fn project_path(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.store.artifact_path(&self.project_path())
    }
}

pub fn code_failure_attempt(index: u32, prompt: &str, path: &str, stderr: &str) -> Attempt {
    Attempt {
        index,
        prompt: prompt.to_string(),
        model_outcome: ModelOutcome::Produced(format!("code {index}")),
        write_outcome: WriteOutcome::Written(PathBuf::from(path)),
        run_outcome: RunOutcome::Ran(RunOutput::new("", stderr)),
        classification: Classification::CodeFailure(stderr.to_string()),
    }
}

pub fn model_unavailable_attempt(index: u32, prompt: &str) -> Attempt {
    Attempt {
        index,
        prompt: prompt.to_string(),
        model_outcome: ModelOutcome::TransientFailure(MODEL_OFFLINE.to_string()),
        write_outcome: WriteOutcome::NotWritten,
        run_outcome: RunOutcome::NotRun,
        classification: Classification::ModelUnavailable,
    }
}

pub fn success_attempt(index: u32, prompt: &str, path: &str, stdout: &str) -> Attempt {
    Attempt {
        index,
        prompt: prompt.to_string(),
        model_outcome: ModelOutcome::Produced(format!("code {index}")),
        write_outcome: WriteOutcome::Written(PathBuf::from(path)),
        run_outcome: RunOutcome::Ran(RunOutput::new(stdout, "")),
        classification: Classification::Success,
    }
}

/// A chat-completions response body whose first choice carries `content`.
pub fn chat_completion_body(content: &str) -> String {
    serde_json::json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

/// Chat-completions API double backed by a wiremock server.
///
/// Owns a current-thread runtime so blocking tests can mount mocks and read
/// back requests; the server itself answers from its own thread.
pub struct MockChatApi {
    server: MockServer,
    runtime: Runtime,
}

impl MockChatApi {
    pub fn start() -> Self {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("build mock server runtime");
        let server = runtime.block_on(MockServer::start());
        Self { server, runtime }
    }

    /// Answer successive `POST /v1/chat/completions` calls with `responses` (status, body), once each.
    pub fn with_responses(responses: Vec<(u16, String)>) -> Self {
        let api = Self::start();
        for (status, body) in responses {
            api.mount(
                Mock::given(method("POST"))
                    .and(path(CHAT_COMPLETIONS_PATH))
                    .respond_with(
                        ResponseTemplate::new(status).set_body_raw(body, "application/json"),
                    )
                    .up_to_n_times(1),
            );
        }
        api
    }

    pub fn mount(&self, mock: Mock) {
        self.runtime.block_on(mock.mount(&self.server));
    }

    pub fn base_url(&self) -> String {
        format!("{}/v1", self.server.uri())
    }

    pub fn received(&self) -> Vec<Request> {
        self.runtime
            .block_on(self.server.received_requests())
            .unwrap_or_default()
    }

    /// Bodies of every received request, in arrival order.
    pub fn request_bodies(&self) -> Vec<String> {
        self.received()
            .iter()
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
            .collect()
    }

    /// Panic unless every mounted mock saw the number of calls it expects.
    pub fn verify(&self) {
        self.runtime.block_on(self.server.verify());
    }
}
