//! `proofgate report`: show a stored run result

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use super::resolve_store_dir;
use crate::config::Config;
use crate::fs::results::load_result;
use crate::models::failure::FailureAction;
use crate::models::gate::{GateStatus, QualityGateResult};
use crate::models::pipeline::PipelineState;

/// Execute the report command. Returns whether the stored run passed.
pub fn execute(
    task_id: &str,
    json: bool,
    store_dir: Option<PathBuf>,
    config: &Config,
) -> Result<bool> {
    let store_dir = resolve_store_dir(config, store_dir);

    let result = load_result(task_id, &store_dir)?
        .with_context(|| format!("No stored result for task '{task_id}'"))?;

    if json {
        let output = serde_json::to_string_pretty(&result)
            .context("Failed to serialize quality gate result")?;
        println!("{output}");
    } else {
        print_result(&result);
    }
    Ok(result.passed)
}

/// Print a human readable summary of a run
pub fn print_result(result: &QualityGateResult) {
    println!("{}", "Gates:".bold());
    for gate in &result.gate_results {
        let icon = match gate.status {
            GateStatus::Pass => "✓".green().bold(),
            GateStatus::Fail => "✗".red().bold(),
            GateStatus::Error => "!".red().bold(),
            GateStatus::Skipped => "−".dimmed(),
        };
        let attempt = if gate.attempt > 1 {
            format!(" (attempt {})", gate.attempt)
        } else {
            String::new()
        };
        let line = format!("{}{attempt}: {}", gate.gate, gate.message);
        if gate.is_skipped() {
            println!("  {icon} {}", line.dimmed());
        } else {
            println!("  {icon} {line}");
        }
    }

    if !result.criteria.is_empty() {
        println!("\n{}", "Success criteria:".bold());
        for evaluation in &result.criteria {
            println!(
                "  {} {} - {}",
                evaluation.status,
                evaluation.criterion.description,
                evaluation.explanation.dimmed()
            );
        }
    }

    if let Some(truth) = &result.truth {
        if !truth.reasons.is_empty() {
            println!("\n{}", "Unsupported claims:".bold());
            for reason in &truth.reasons {
                println!("  {} {reason}", "✗".red());
            }
        }
    }

    let escalations: Vec<_> = result
        .failures
        .iter()
        .filter(|f| f.action != FailureAction::Retry)
        .collect();
    if !escalations.is_empty() {
        println!("\n{}", "Failures:".bold());
        for failure in escalations {
            let summary = if failure.escalation {
                failure.summary().yellow()
            } else {
                failure.summary().normal()
            };
            println!("  {summary}");
            println!("    {}", failure.message.dimmed());
        }
    }

    println!(
        "\n{} evidence items, {}ms",
        result.evidence.len(),
        result.duration().num_milliseconds()
    );
    match result.state {
        PipelineState::Passed => println!("{} Task verified", "✓".green().bold()),
        PipelineState::Aborted => {
            println!("{} Aborted: preflight did not pass", "✗".red().bold())
        }
        state => println!("{} Verification failed ({state})", "✗".red().bold()),
    }
}
