//! `proofgate validate`: check a task descriptor without running it

use anyhow::Result;
use colored::Colorize;
use std::path::Path;

use crate::task::{parse_task, warnings};

pub fn execute(task_file: &Path) -> Result<()> {
    let task = parse_task(task_file)?;

    println!(
        "{} {} is valid",
        "✓".green().bold(),
        task_file.display()
    );
    println!("  task:     {}", task.task_id);
    println!("  tests:    {}", task.test_command);
    println!("  checks:   {}", task.functional_checks.len());
    println!("  criteria: {}", task.success_criteria.len());
    println!("  diff:     {}", task.diff_reference);

    for warning in warnings(&task) {
        println!("  {} {warning}", "warning:".yellow());
    }
    Ok(())
}
