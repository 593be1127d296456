//! Audit trail tests: durable evidence and stored results
//!
//! Runs the coordinator against a temporary store and replays what it
//! wrote, the way `proofgate evidence` and `proofgate report` do.

use proofgate::commands::evidence::replay;
use proofgate::config::Config;
use proofgate::fs::{load_result, store_result, EvidenceStore};
use proofgate::models::task::{DiffReference, TaskDescriptor};
use proofgate::verify::QualityGatesCoordinator;
use tempfile::TempDir;

const DIFF: &str = "\
diff --git a/lib.py b/lib.py
--- a/lib.py
+++ b/lib.py
@@ -1 +1 @@
-ANSWER = None
+ANSWER = 42
";

fn task(work: &TempDir) -> TaskDescriptor {
    TaskDescriptor::new("audit-task", "echo '4 passed, 0 failed'")
        .with_working_dir(work.path())
        .with_diff(DiffReference::Inline {
            text: DIFF.to_string(),
        })
}

#[test]
fn test_replayed_evidence_matches_run() {
    let work = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = EvidenceStore::new(store_dir.path());

    let result = QualityGatesCoordinator::new(Config::default())
        .with_store(store.clone())
        .run(&task(&work));
    assert!(result.passed, "{:#?}", result.gate_results);

    let replayed = replay(&store, "audit-task").unwrap();
    let replayed_ids: Vec<&str> = replayed.iter().map(|e| e.id()).collect();
    let run_ids: Vec<&str> = result.evidence.iter().map(|e| e.id()).collect();
    assert_eq!(replayed_ids, run_ids);
}

#[test]
fn test_repeated_runs_append_to_the_same_log() {
    let work = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let store = EvidenceStore::new(store_dir.path());
    let coordinator = QualityGatesCoordinator::new(Config::default()).with_store(store.clone());

    let first = coordinator.run(&task(&work));
    let second = coordinator.run(&task(&work));

    let stored = store.load("audit-task").unwrap();
    assert_eq!(stored.len(), first.evidence.len() + second.evidence.len());

    // The second run continues the sequence instead of reusing keys
    let first_max = first.evidence.iter().map(|e| e.sequence()).max().unwrap();
    assert!(second.evidence.iter().all(|e| e.sequence() > first_max));

    // Replay lists each run on its own, in run order
    let replayed: Vec<String> = replay(&store, "audit-task")
        .unwrap()
        .iter()
        .map(|e| e.id().to_string())
        .collect();
    let expected: Vec<String> = first
        .evidence
        .iter()
        .chain(second.evidence.iter())
        .map(|e| e.id().to_string())
        .collect();
    assert_eq!(replayed, expected);
}

#[test]
fn test_stored_result_round_trip() {
    let work = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();

    let result = QualityGatesCoordinator::new(Config::default()).run(&task(&work));
    store_result(&result, store_dir.path()).unwrap();

    let loaded = load_result("audit-task", store_dir.path()).unwrap().unwrap();
    assert_eq!(loaded.run_id, result.run_id);
    assert_eq!(loaded.gate_results, result.gate_results);
    assert_eq!(loaded.failures, result.failures);
    assert_eq!(loaded.truth, result.truth);

    assert!(load_result("other-task", store_dir.path()).unwrap().is_none());
}
