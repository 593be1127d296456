//! Task descriptor parser

use anyhow::{bail, Context, Result};
use std::path::Path;

use super::validation::validate;
use crate::models::task::TaskDescriptor;

/// Parse and validate a task descriptor file.
///
/// A relative `working_dir` is resolved against the directory holding the
/// descriptor, so a task file can be run from anywhere.
pub fn parse_task(path: &Path) -> Result<TaskDescriptor> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read task file: {}", path.display()))?;

    let mut task = parse_task_content(&content)
        .with_context(|| format!("Invalid task file: {}", path.display()))?;

    if task.working_dir.is_relative() {
        if let Some(parent) = path.parent() {
            task.working_dir = parent.join(&task.working_dir);
        }
    }

    Ok(task)
}

/// Parse descriptor content (YAML or JSON)
pub fn parse_task_content(content: &str) -> Result<TaskDescriptor> {
    let task: TaskDescriptor =
        serde_yaml::from_str(content).context("Failed to parse task descriptor")?;

    if let Err(errors) = validate(&task) {
        let error_messages: Vec<_> = errors.iter().map(|e| e.to_string()).collect();
        bail!("Validation errors:\n  - {}", error_messages.join("\n  - "));
    }

    Ok(task)
}
