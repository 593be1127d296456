//! End-to-end tests for the quality-gates pipeline
//!
//! This test suite covers:
//! - Task files parsed from disk and run against a real git working tree
//! - Functional HTTP checks against a local stub server
//! - Success criteria evaluated over the collected evidence
//! - Runs that must fail: untracked-only changes, failing tests
//! - Serialized results preserving every status and evidence field

use proofgate::config::Config;
use proofgate::models::evidence::EvidenceKind;
use proofgate::models::gate::{GateKind, GateStatus, QualityGateResult};
use proofgate::models::failure::FailureClass;
use proofgate::models::pipeline::PipelineState;
use proofgate::task::parse_task;
use proofgate::verify::criteria::CriterionStatus;
use proofgate::verify::QualityGatesCoordinator;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::thread;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {args:?} failed");
}

/// Creates a git repository with `src/app.py` committed
fn create_repo() -> TempDir {
    let temp = TempDir::new().unwrap();
    git(temp.path(), &["init", "-q"]);
    git(temp.path(), &["config", "user.email", "test@test.com"]);
    git(temp.path(), &["config", "user.name", "Test User"]);
    std::fs::create_dir_all(temp.path().join("src")).unwrap();
    std::fs::write(
        temp.path().join("src/app.py"),
        "def greet(name):\n    return None\n",
    )
    .unwrap();
    git(temp.path(), &["add", "."]);
    git(temp.path(), &["commit", "-q", "-m", "initial"]);
    temp
}

fn implement_greeting(repo: &Path) {
    std::fs::write(
        repo.join("src/app.py"),
        "def greet(name):\n    return f\"Hello, {name}!\"\n",
    )
    .unwrap();
}

/// Serves a fixed response to every connection until the test ends
fn serve(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap_or(0) > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{addr}")
}

fn write_task(repo: &Path, yaml: &str) -> std::path::PathBuf {
    let path = repo.join("task.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn test_verified_task_passes_every_gate() {
    let repo = create_repo();
    implement_greeting(repo.path());
    let base_url = serve("{\"status\":\"healthy\"}");

    let task_file = write_task(
        repo.path(),
        &format!(
            r#"
task_id: greet-feature
test_command: "echo 'test result: ok. 3 passed; 0 failed;'"
claims:
  - tests pass
  - implemented greeting
  - health check passes
functional_checks:
  - kind: http
    name: health
    url: "{base_url}/health?task=${{TASK_ID}}"
    expect_body_contains: healthy
success_criteria:
  - description: all tests pass
    method: test
    expected:
      min_passed: 3
  - description: service reports healthy
    method: http
    expected:
      check: health
      status: 200
      contains: healthy
  - description: greeting implemented in app module
    method: diff
    expected:
      path: "src/*.py"
      contains: Hello
"#
        ),
    );

    let task = parse_task(&task_file).unwrap();
    let result = QualityGatesCoordinator::new(Config::default()).run(&task);

    assert!(result.passed, "{:#?}", result.gate_results);
    assert_eq!(result.state, PipelineState::Passed);
    assert!(result
        .criteria
        .iter()
        .all(|c| c.status == CriterionStatus::Satisfied));

    let functional = result.evidence_for(GateKind::Functional);
    assert_eq!(functional.len(), 1);
    assert_eq!(functional[0].kind(), EvidenceKind::HttpResponse);

    let truth = result.truth.as_ref().unwrap();
    assert!(truth.passed);
    assert_eq!(truth.claims.len(), 3);
    assert!(!truth.supporting_evidence.is_empty());
}

#[test]
fn test_untracked_change_does_not_count_as_work() {
    let repo = create_repo();
    std::fs::write(repo.path().join("src/new_module.py"), "VALUE = 1\n").unwrap();

    let task_file = write_task(
        repo.path(),
        "task_id: greet-feature\ntest_command: \"echo '1 passed'\"\n",
    );
    let task = parse_task(&task_file).unwrap();
    let result = QualityGatesCoordinator::new(Config::default()).run(&task);

    assert!(!result.passed);
    assert_eq!(result.state, PipelineState::Failed);
    let diff = result.final_result(GateKind::Diff).unwrap();
    assert_eq!(diff.status, GateStatus::Fail);
    assert_eq!(diff.classification, Some(FailureClass::IntegrityViolation));
}

#[test]
fn test_lying_test_runner_fails() {
    let repo = create_repo();
    implement_greeting(repo.path());

    // Exit code 0 but the summary reports a failure
    let task_file = write_task(
        repo.path(),
        r#"
task_id: greet-feature
test_command: "echo 'Tests: 1 failed, 4 passed, 5 total'"
retry_policy:
  max_retries: 0
"#,
    );
    let task = parse_task(&task_file).unwrap();
    let result = QualityGatesCoordinator::new(Config::default()).run(&task);

    assert!(!result.passed);
    let tests = result.final_result(GateKind::TestExecution).unwrap();
    assert_eq!(tests.status, GateStatus::Fail);
    assert_eq!(tests.classification, Some(FailureClass::AssertionFailure));
    assert!(result.escalated());
}

#[test]
fn test_result_survives_serialization() {
    let repo = create_repo();
    implement_greeting(repo.path());
    let task_file = write_task(
        repo.path(),
        "task_id: greet-feature\ntest_command: \"echo '2 passed'\"\n",
    );
    let task = parse_task(&task_file).unwrap();
    let result = QualityGatesCoordinator::new(Config::default()).run(&task);
    assert!(result.passed, "{:#?}", result.gate_results);

    let json = serde_json::to_string(&result).unwrap();
    let restored: QualityGateResult = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.passed, result.passed);
    assert_eq!(restored.state, result.state);
    assert_eq!(restored.gate_results, result.gate_results);
    assert_eq!(restored.evidence, result.evidence);
    assert_eq!(restored.transitions, result.transitions);
    assert!(restored.evidence.iter().all(|e| e.verify_integrity()));
}
