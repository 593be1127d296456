//! `proofgate run`: verify a task and store the outcome

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

use super::report::print_result;
use super::resolve_store_dir;
use crate::config::Config;
use crate::fs::evidence_store::EvidenceStore;
use crate::fs::results::store_result;
use crate::process::CancellationToken;
use crate::task::parse_task;
use crate::verify::coordinator::QualityGatesCoordinator;

/// Execute the run command. Returns whether the task passed.
pub fn execute(
    task_file: &Path,
    json: bool,
    store_dir: Option<PathBuf>,
    config: Config,
    cancel: &CancellationToken,
) -> Result<bool> {
    let task = parse_task(task_file)?;
    let store_dir = resolve_store_dir(&config, store_dir);

    if !json {
        println!(
            "{} Verifying task '{}'...\n",
            "→".cyan().bold(),
            task.task_id
        );
    }

    let coordinator =
        QualityGatesCoordinator::new(config).with_store(EvidenceStore::new(&store_dir));
    let result = coordinator.run_with_cancel(&task, cancel);

    let path = store_result(&result, &store_dir)
        .with_context(|| format!("Failed to store result for task '{}'", task.task_id))?;

    if json {
        let output = serde_json::to_string_pretty(&result)
            .context("Failed to serialize quality gate result")?;
        println!("{output}");
    } else {
        print_result(&result);
        println!("\n{} {}", "Result stored at".dimmed(), path.display());
    }

    Ok(result.passed)
}
