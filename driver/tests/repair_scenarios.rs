//! Loop-level scenarios for the generate–execute–repair driver.
//!
//! Each test drives `run_request` with a scripted model and a scripted
//! executor against a real temporary project directory, then checks the
//! verdict, the attempt log, the prompts the model saw, and what the executor
//! was asked to run.

use std::fs;

use codegen_driver::core::types::{
    Classification, FinalVerdict, ModelOutcome, RunOutcome, RunOutput, TaskRequest, WriteOutcome,
};
use codegen_driver::repair::{Collaborators, LoopEvent, RunReport, run_request};
use codegen_driver::test_support::{ScriptedExecutor, ScriptedModel, TestProject};

const FAILURE_HEADING: &str = "Previous Attempt Failed";

fn drive(
    project: &TestProject,
    max_attempts: u32,
    model: &ScriptedModel,
    executor: &ScriptedExecutor,
) -> (RunReport, Vec<String>) {
    let request = TaskRequest::new("print ok", project.project_path(), max_attempts)
        .expect("request");
    let parts = Collaborators {
        model,
        executor,
        store: &project.store,
        prompts: &project.prompts,
    };
    let mut events = Vec::new();
    let report = run_request(&request, &parts, |event| events.push(describe(event)))
        .expect("run request");
    (report, events)
}

fn describe(event: &LoopEvent<'_>) -> String {
    match event {
        LoopEvent::AttemptStarted {
            index,
            max_attempts,
        } => format!("start {index}/{max_attempts}"),
        LoopEvent::AttemptClassified { attempt, .. } => {
            format!("classified {} {}", attempt.index, attempt.classification.as_str())
        }
        LoopEvent::Reconciling { .. } => "reconciling".to_string(),
        LoopEvent::Reconciled { output } => format!("reconciled stderr={:?}", output.stderr),
    }
}

fn clean(stdout: &str) -> RunOutput {
    RunOutput::new(stdout, "")
}

fn failing(stderr: &str) -> RunOutput {
    RunOutput::new("", stderr)
}

fn offline(reason: &str) -> ModelOutcome {
    ModelOutcome::TransientFailure(reason.to_string())
}

fn produced(code: &str) -> ModelOutcome {
    ModelOutcome::Produced(code.to_string())
}

#[test]
fn happy_path_succeeds_on_first_attempt() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::producing(&["print('ok')\n"]);
    let executor = ScriptedExecutor::new(vec![clean("ok")]);

    let (report, events) = drive(&project, 3, &model, &executor);

    assert_eq!(
        report.verdict,
        FinalVerdict::Succeeded {
            stdout: "ok".to_string()
        }
    );
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(model.calls(), 1);
    assert_eq!(executor.calls(), 1);
    assert_eq!(report.artifact_path.as_deref(), Some(project.artifact_path().as_path()));
    assert_eq!(
        fs::read_to_string(project.artifact_path()).expect("read artifact"),
        "print('ok')\n"
    );
    assert_eq!(events, vec!["start 1/3", "classified 1 success"]);
    assert!(report.reconciliation.is_none());
}

#[test]
fn failure_feeds_stderr_into_next_prompt() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::producing(&["print(x)\n", "print('hi')\n"]);
    let executor = ScriptedExecutor::new(vec![failing("NameError: x"), clean("hi")]);

    let (report, _) = drive(&project, 3, &model, &executor);

    assert_eq!(
        report.verdict,
        FinalVerdict::Succeeded {
            stdout: "hi".to_string()
        }
    );
    assert_eq!(report.attempts.len(), 2);
    let prompts = model.prompts();
    assert!(!prompts[0].contains(FAILURE_HEADING));
    assert!(prompts[1].contains("NameError: x"));
    assert_eq!(
        fs::read_to_string(project.artifact_path()).expect("read artifact"),
        "print('hi')\n"
    );
    assert_eq!(report.last_error, None);
}

#[test]
fn reconciliation_rescues_false_negative() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::producing(&["P1", "P2"]);
    let executor = ScriptedExecutor::new(vec![failing("E1"), failing("E2"), clean("done")]);

    let (report, events) = drive(&project, 2, &model, &executor);

    assert_eq!(
        report.verdict,
        FinalVerdict::SucceededOnReconciliation {
            stdout: "done".to_string()
        }
    );
    let runs = executor.runs();
    assert_eq!(runs.len(), 3);
    assert_eq!(runs[2].path, project.artifact_path());
    assert_eq!(runs[2].contents, "P2");
    assert_eq!(report.reconciliation, Some(clean("done")));
    assert_eq!(
        events,
        vec![
            "start 1/2",
            "classified 1 code_failure",
            "start 2/2",
            "classified 2 code_failure",
            "reconciling",
            "reconciled stderr=\"\"",
        ]
    );
}

#[test]
fn single_attempt_budget_still_reconciles() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::producing(&["P1", "P2"]);
    let executor = ScriptedExecutor::new(vec![failing("E1"), failing("E1 again")]);

    let (report, events) = drive(&project, 1, &model, &executor);

    assert_eq!(model.calls(), 1);
    assert_eq!(executor.calls(), 2);
    let runs = executor.runs();
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[1].contents, "P1");
    assert_eq!(
        report.verdict,
        FinalVerdict::ExhaustedRetries {
            last_error: Some("E1".to_string())
        }
    );
    assert_eq!(report.reconciliation, Some(failing("E1 again")));
    assert_eq!(
        events,
        vec![
            "start 1/1",
            "classified 1 code_failure",
            "reconciling",
            "reconciled stderr=\"E1 again\"",
        ]
    );
}

#[test]
fn single_attempt_budget_can_succeed_on_reconciliation() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::producing(&["P1"]);
    let executor = ScriptedExecutor::new(vec![failing("flaky"), clean("done")]);

    let (report, _) = drive(&project, 1, &model, &executor);

    assert_eq!(model.calls(), 1);
    assert_eq!(executor.calls(), 2);
    assert_eq!(
        report.verdict,
        FinalVerdict::SucceededOnReconciliation {
            stdout: "done".to_string()
        }
    );
    assert_eq!(report.last_error.as_deref(), Some("flaky"));
}

#[test]
fn persistent_model_outage_never_writes_or_runs() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::new(vec![
        offline("rate limited (status 429)"),
        offline("request failed: timed out"),
        offline("rate limited (status 429)"),
        offline("authentication failed (status 401)"),
    ]);
    let executor = ScriptedExecutor::new(Vec::new());

    let (report, events) = drive(&project, 4, &model, &executor);

    assert_eq!(
        report.verdict,
        FinalVerdict::ModelUnavailableAtExhaustion {
            reason: Some("authentication failed (status 401)".to_string())
        }
    );
    assert_eq!(report.attempts.len(), 4);
    assert_eq!(model.calls(), 4);
    assert_eq!(executor.calls(), 0);
    assert!(report.reconciliation.is_none());
    assert!(report.artifact_path.is_none());
    assert!(!project.project_path().exists());
    assert!(report.attempts.iter().all(|a| {
        a.write_outcome == WriteOutcome::NotWritten && a.run_outcome == RunOutcome::NotRun
    }));
    assert!(!events.contains(&"reconciling".to_string()));
}

#[test]
fn mixed_failures_report_last_code_error() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::new(vec![
        offline("request failed: connection reset"),
        produced("P"),
        offline("rate limited (status 429)"),
    ]);
    let executor = ScriptedExecutor::new(vec![
        failing("ValueError: bad input"),
        failing("ValueError: still bad"),
    ]);

    let (report, _) = drive(&project, 3, &model, &executor);

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(!prompts[1].contains(FAILURE_HEADING));
    assert!(prompts[2].contains("ValueError: bad input"));

    assert_eq!(
        report.attempts[1].classification,
        Classification::CodeFailure("ValueError: bad input".to_string())
    );
    assert_eq!(report.attempts[2].classification, Classification::ModelUnavailable);

    let runs = executor.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[1].contents, "P");
    assert_eq!(
        report.verdict,
        FinalVerdict::ExhaustedRetries {
            last_error: Some("ValueError: bad input".to_string())
        }
    );
}

#[cfg(unix)]
#[test]
fn unwritable_project_aborts_on_first_attempt() {
    let project = TestProject::new().expect("project");
    let blocker = project.root().join("blocker");
    fs::write(&blocker, "not a directory").expect("write blocker");

    let model = ScriptedModel::producing(&["P1", "P2", "P3"]);
    let executor = ScriptedExecutor::new(vec![clean("ok")]);
    let request = TaskRequest::new("print ok", blocker.join("project"), 3).expect("request");
    let parts = Collaborators {
        model: &model,
        executor: &executor,
        store: &project.store,
        prompts: &project.prompts,
    };

    let mut events = Vec::new();
    let err = run_request(&request, &parts, |event| events.push(describe(event)))
        .expect_err("write failure must abort");

    let message = format!("{err:#}");
    assert!(message.contains("attempt 1: write artifact"), "{message}");
    assert!(message.contains("create project directory"), "{message}");
    assert_eq!(model.calls(), 1);
    assert_eq!(executor.calls(), 0);
    assert_eq!(events, vec!["start 1/3"]);
}

#[test]
fn always_failing_program_spends_budget_then_reconciles_once() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::producing(&["A", "B", "C", "D"]);
    let executor = ScriptedExecutor::new(vec![
        failing("E1"),
        failing("E2"),
        failing("E3"),
        failing("E4"),
        failing("E4 again"),
    ]);

    let (report, _) = drive(&project, 4, &model, &executor);

    assert_eq!(model.calls(), 4);
    assert_eq!(executor.calls(), 5);
    assert_eq!(
        report.verdict,
        FinalVerdict::ExhaustedRetries {
            last_error: Some("E4".to_string())
        }
    );
    assert_eq!(report.reconciliation, Some(failing("E4 again")));
}

#[test]
fn last_error_only_moves_on_code_failures() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::new(vec![
        produced("A"),
        offline("request failed: timed out"),
        produced("B"),
        offline("rate limited (status 429)"),
        produced("C"),
    ]);
    let executor = ScriptedExecutor::new(vec![
        failing("first"),
        failing("second"),
        clean("fixed"),
    ]);

    let (report, _) = drive(&project, 5, &model, &executor);

    let prompts = model.prompts();
    assert!(!prompts[0].contains(FAILURE_HEADING));
    assert!(prompts[1].contains("first"));
    assert!(prompts[2].contains("first"));
    assert!(prompts[3].contains("second"));
    assert!(prompts[4].contains("second"));
    assert!(!prompts[4].contains("first"));
    assert_eq!(
        report.verdict,
        FinalVerdict::Succeeded {
            stdout: "fixed".to_string()
        }
    );
}

#[test]
fn success_attempts_follow_clean_runs() {
    let project = TestProject::new().expect("project");
    let model = ScriptedModel::producing(&["A", "B"]);
    let executor = ScriptedExecutor::new(vec![RunOutput::new("partial", "warning"), clean("ok")]);

    let (report, _) = drive(&project, 2, &model, &executor);

    for attempt in &report.attempts {
        if attempt.classification == Classification::Success {
            match &attempt.run_outcome {
                RunOutcome::Ran(output) => assert!(output.stderr.is_empty()),
                RunOutcome::NotRun => panic!("success without a run"),
            }
        }
    }
    assert_eq!(report.attempts.len(), 2);
}

#[test]
fn identical_scripts_give_identical_reports() {
    let run = || {
        let project = TestProject::new().expect("project");
        let model = ScriptedModel::new(vec![
            offline("rate limited (status 429)"),
            produced("A"),
            produced("B"),
        ]);
        let executor =
            ScriptedExecutor::new(vec![failing("E1"), failing("E2"), failing("E3")]);
        let (report, events) = drive(&project, 3, &model, &executor);
        (report.verdict, events, model.prompts())
    };

    assert_eq!(run(), run());
}
