//! `proofgate evidence`: replay the stored audit trail of a task
//!
//! Every record is re-verified against its content address while loading;
//! a tampered store fails the command instead of printing altered proof.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use super::resolve_store_dir;
use crate::config::Config;
use crate::fs::evidence_store::EvidenceStore;
use crate::models::evidence::Evidence;
use crate::models::gate::GateKind;
use crate::verify::evidence::EvidenceCollector;

/// Load and verify the stored evidence of a task.
///
/// Records are grouped by run, each run opening with its preflight record,
/// and each run is listed in gate-execution order. Runs keep the order they
/// were appended in.
pub fn replay(store: &EvidenceStore, task_id: &str) -> Result<Vec<Evidence>> {
    let mut runs: Vec<Vec<Evidence>> = Vec::new();
    for record in store.load(task_id)? {
        match runs.last_mut() {
            Some(run) if record.gate() != GateKind::Preflight => run.push(record),
            _ => runs.push(vec![record]),
        }
    }

    let mut replayed = Vec::new();
    for run in runs {
        let collector = EvidenceCollector::new(task_id);
        for record in run {
            let id = record.id().to_string();
            collector
                .import(record)
                .with_context(|| format!("Rejected evidence {id}"))?;
        }
        replayed.extend(collector.get(task_id));
    }
    Ok(replayed)
}

pub fn execute(
    task_id: &str,
    json: bool,
    store_dir: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let store = EvidenceStore::new(resolve_store_dir(config, store_dir));
    let evidence = replay(&store, task_id)?;

    if json {
        let output =
            serde_json::to_string_pretty(&evidence).context("Failed to serialize evidence")?;
        println!("{output}");
        return Ok(());
    }

    if evidence.is_empty() {
        println!("No evidence stored for task '{task_id}'");
        return Ok(());
    }

    println!(
        "{} {} evidence items for '{task_id}', integrity verified\n",
        "✓".green().bold(),
        evidence.len()
    );
    for item in &evidence {
        let outcome = if item.payload().indicates_success() {
            "ok".green()
        } else {
            "not ok".red()
        };
        println!(
            "  {:<18} #{:<2} {:<16} {:<6} {} {}",
            item.gate().to_string(),
            item.attempt(),
            item.kind().to_string(),
            outcome,
            &item.id()[..12],
            item.payload().subject().dimmed()
        );
    }
    Ok(())
}
