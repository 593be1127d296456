use super::*;
use crate::config::TimeoutConfig;
use crate::models::evidence::EvidenceKind;
use crate::models::failure::FailureAction;
use crate::models::gate::GateStatus;
use crate::models::task::{
    Backoff, DiffReference, EnvironmentRequirements, ExpectedOutcome, FunctionalCheck, HttpCheck,
    MethodTag, SuccessCriterion,
};
use crate::verify::diff::DiffPolicy;
use std::net::TcpListener;
use tempfile::TempDir;

const FEATURE_DIFF: &str = "\
diff --git a/src/login.py b/src/login.py
--- a/src/login.py
+++ b/src/login.py
@@ -1,2 +1,3 @@
 def login(user):
-    return None
+    token = issue_token(user)
+    return token
";

const WHITESPACE_DIFF: &str = "\
diff --git a/src/login.py b/src/login.py
--- a/src/login.py
+++ b/src/login.py
@@ -1,2 +1,2 @@
 def login(user):
-    return None
+    return  None
";

fn task(temp: &TempDir, test_command: &str, diff: &str) -> TaskDescriptor {
    TaskDescriptor::new("task-1", test_command)
        .with_working_dir(temp.path())
        .with_diff(DiffReference::Inline {
            text: diff.to_string(),
        })
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_delay_ms: 20,
        ..RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_backoff(Backoff::Linear, 5)
    }
}

fn coordinator() -> QualityGatesCoordinator {
    QualityGatesCoordinator::new(Config::default())
}

fn statuses(result: &QualityGateResult) -> Vec<(GateKind, GateStatus)> {
    result
        .gate_results
        .iter()
        .map(|r| (r.gate, r.status))
        .collect()
}

#[test]
fn test_passing_run_walks_every_state() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '5 passed, 0 failed'", FEATURE_DIFF)
        .with_claim("tests pass")
        .with_claim("implemented login tokens");

    let result = coordinator().run(&task);

    assert!(result.passed, "{:#?}", result.gate_results);
    assert_eq!(result.state, PipelineState::Passed);
    assert_eq!(
        result.transitions,
        vec![
            PipelineState::Init,
            PipelineState::Preflight,
            PipelineState::Verification,
            PipelineState::SuccessCriteria,
            PipelineState::TruthEnforcement,
            PipelineState::Passed,
        ]
    );
    assert_eq!(
        statuses(&result),
        vec![
            (GateKind::Preflight, GateStatus::Pass),
            (GateKind::TestExecution, GateStatus::Pass),
            (GateKind::Functional, GateStatus::Skipped),
            (GateKind::Diff, GateStatus::Pass),
            (GateKind::SuccessCriteria, GateStatus::Skipped),
            (GateKind::TruthEnforcement, GateStatus::Pass),
        ]
    );

    let tests = result.evidence_for(GateKind::TestExecution);
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].kind(), EvidenceKind::CommandOutput);
    assert!(result.failures.is_empty());

    for gate_result in result.gate_results.iter().filter(|r| r.is_pass()) {
        assert!(!gate_result.evidence_ids.is_empty());
        for id in &gate_result.evidence_ids {
            assert!(result.find_evidence(id).is_some(), "dangling evidence id {id}");
        }
    }
}

#[test]
fn test_preflight_failure_aborts_before_tests() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '5 passed'", FEATURE_DIFF).with_environment(
        EnvironmentRequirements {
            files: vec!["requirements.txt".into()],
            ..Default::default()
        },
    );

    let result = coordinator().run(&task);

    assert!(!result.passed);
    assert_eq!(result.state, PipelineState::Aborted);
    assert!(result.evidence_for(GateKind::TestExecution).is_empty());
    assert_eq!(
        result.final_result(GateKind::TestExecution).unwrap().status,
        GateStatus::Skipped
    );

    let preflight = result.final_result(GateKind::Preflight).unwrap();
    assert_eq!(preflight.classification, Some(FailureClass::EnvironmentError));
    assert_eq!(preflight.evidence_ids.len(), 1);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].action, FailureAction::Abort);
}

#[test]
fn test_whitespace_diff_fails_even_when_tests_pass() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '5 passed, 0 failed'", WHITESPACE_DIFF)
        .with_claim("implemented feature X");

    let result = coordinator().run(&task);

    assert!(!result.passed);
    assert_eq!(result.state, PipelineState::Failed);
    assert!(result.final_result(GateKind::TestExecution).unwrap().is_pass());

    let diff = result.final_result(GateKind::Diff).unwrap();
    assert_eq!(diff.status, GateStatus::Fail);
    assert_eq!(diff.classification, Some(FailureClass::IntegrityViolation));
    assert_eq!(result.attempts(GateKind::Diff), 1);

    let report = result
        .failures
        .iter()
        .find(|f| f.gate == GateKind::Diff)
        .unwrap();
    assert_eq!(report.action, FailureAction::Abort);
    assert_eq!(
        result.final_result(GateKind::TruthEnforcement).unwrap().status,
        GateStatus::Skipped
    );
}

#[test]
fn test_compound_claim_with_empty_diff_fails() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '5 passed, 0 failed'", "")
        .with_claim("Implemented login and all tests pass");
    let config = Config {
        diff: DiffPolicy {
            require_changes: false,
            ..DiffPolicy::default()
        },
        ..Config::default()
    };

    let result = QualityGatesCoordinator::new(config).run(&task);

    assert!(!result.passed);
    assert_eq!(result.state, PipelineState::Failed);
    assert!(result.final_result(GateKind::TestExecution).unwrap().is_pass());
    let diff = result.final_result(GateKind::Diff).unwrap();
    assert_eq!(diff.status, GateStatus::Fail);
    assert_eq!(diff.classification, Some(FailureClass::IntegrityViolation));
}

#[test]
fn test_flaky_test_command_passes_on_retry() {
    let temp = TempDir::new().unwrap();
    let command = "test -f marker && echo '3 passed' || { touch marker; echo '2 passed, 1 failed'; exit 1; }";
    let task = task(&temp, command, FEATURE_DIFF).with_retry_policy(fast_retries(2));

    let result = coordinator().run(&task);

    assert!(result.passed, "{:#?}", result.gate_results);
    assert_eq!(result.attempts(GateKind::TestExecution), 2);
    let attempts = result.results_for(GateKind::TestExecution);
    assert_eq!(attempts[0].status, GateStatus::Fail);
    assert_eq!(attempts[1].status, GateStatus::Pass);
    assert_eq!(attempts[1].attempt, 2);

    // Both attempts keep their evidence
    assert_eq!(result.evidence_for(GateKind::TestExecution).len(), 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].action, FailureAction::Retry);
}

#[test]
fn test_exhausted_retries_escalate() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '0 passed, 2 failed'; exit 1", FEATURE_DIFF)
        .with_retry_policy(fast_retries(2));

    let result = coordinator().run(&task);

    assert!(!result.passed);
    assert_eq!(result.state, PipelineState::Failed);
    assert_eq!(result.attempts(GateKind::TestExecution), 3);
    assert!(result.escalated());

    let last = result.failures.last().unwrap();
    assert_eq!(last.gate, GateKind::TestExecution);
    assert_eq!(last.action, FailureAction::Escalate);
    assert!(last.escalation);
    assert!(last.retries_exhausted);
    assert_eq!(last.retry_count, 2);
}

#[test]
fn test_unreachable_http_check_is_retried() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '1 passed'", FEATURE_DIFF)
        .with_check(FunctionalCheck::Http(HttpCheck::get(
            "health",
            format!("http://127.0.0.1:{port}/health"),
        )))
        .with_retry_policy(fast_retries(1));

    let config = Config {
        timeouts: TimeoutConfig {
            http_secs: 1,
            ..TimeoutConfig::default()
        },
        ..Config::default()
    };
    let result = QualityGatesCoordinator::new(config).run(&task);

    assert!(!result.passed);
    let attempts = result.results_for(GateKind::Functional);
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, GateStatus::Error);
    assert_eq!(attempts[0].classification, Some(FailureClass::ExecutionError));

    let functional: Vec<_> = result
        .failures
        .iter()
        .filter(|f| f.gate == GateKind::Functional)
        .collect();
    assert_eq!(functional[0].action, FailureAction::Retry);
    assert!(functional[0].backoff_ms.is_some());
    assert_eq!(functional[1].action, FailureAction::Escalate);

    // Every attempt left http-response evidence behind
    let evidence = result.evidence_for(GateKind::Functional);
    assert_eq!(evidence.len(), 2);
    assert!(evidence
        .iter()
        .all(|e| e.kind() == EvidenceKind::HttpResponse));
}

#[test]
fn test_unsatisfied_criterion_fails_run() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '2 passed'", FEATURE_DIFF).with_criterion(
        SuccessCriterion::new("at least ten tests", MethodTag::TestBased).expecting(
            ExpectedOutcome {
                min_passed: Some(10),
                ..Default::default()
            },
        ),
    );

    let result = coordinator().run(&task);

    assert!(!result.passed);
    assert_eq!(result.state, PipelineState::Failed);
    assert_eq!(result.criteria.len(), 1);
    let criteria = result.final_result(GateKind::SuccessCriteria).unwrap();
    assert_eq!(criteria.status, GateStatus::Fail);
    assert!(result.truth.is_none());
}

#[test]
fn test_unregistered_method_is_configuration_error() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '2 passed'", FEATURE_DIFF).with_criterion(
        SuccessCriterion::new("looks right", MethodTag::from("eyeball")),
    );

    let result = coordinator().run(&task);

    let criteria = result.final_result(GateKind::SuccessCriteria).unwrap();
    assert_eq!(criteria.status, GateStatus::Error);
    assert_eq!(
        criteria.classification,
        Some(FailureClass::ConfigurationError)
    );
    assert!(!result.passed);
}

#[test]
fn test_unsupported_claim_fails_truth_enforcement() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "echo '2 passed'", FEATURE_DIFF).with_claim("deployment succeeded");

    let result = coordinator().run(&task);

    assert!(!result.passed);
    let truth = result.final_result(GateKind::TruthEnforcement).unwrap();
    assert_eq!(truth.classification, Some(FailureClass::IntegrityViolation));
    let report = result.truth.as_ref().unwrap();
    assert!(report.reasons[0].contains("deployment succeeded"));
}

#[test]
fn test_cancelled_run_does_not_retry() {
    let temp = TempDir::new().unwrap();
    let task = task(&temp, "sleep 5", FEATURE_DIFF).with_retry_policy(fast_retries(3));
    let token = CancellationToken::new();
    token.cancel();

    let result = coordinator().run_with_cancel(&task, &token);

    assert!(!result.passed);
    assert!(result.state.is_terminal());
    assert_eq!(result.attempts(GateKind::TestExecution), 1);
    let report = result
        .failures
        .iter()
        .find(|f| f.gate == GateKind::TestExecution)
        .unwrap();
    assert_eq!(report.action, FailureAction::Abort);
}

#[test]
fn test_evidence_is_persisted_to_store() {
    let temp = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = EvidenceStore::new(store_dir.path());
    let task = task(&temp, "echo '1 passed'", FEATURE_DIFF);

    let result = coordinator().with_store(store.clone()).run(&task);

    let stored = store.load("task-1").unwrap();
    assert_eq!(stored.len(), result.evidence.len());
    for evidence in &result.evidence {
        assert!(stored.iter().any(|s| s.id() == evidence.id()));
    }
}
