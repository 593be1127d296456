//! Quality gate result persistence
//!
//! Stores the latest `QualityGateResult` of each task as pretty JSON.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::locking::{locked_read, locked_write};
use crate::models::gate::QualityGateResult;
use crate::validation::validate_id;

fn result_path(task_id: &str, store_dir: &Path) -> Result<PathBuf> {
    validate_id(task_id)?;
    Ok(store_dir.join("results").join(format!("{task_id}.json")))
}

/// Store a run result, replacing the previous result of the same task
pub fn store_result(result: &QualityGateResult, store_dir: &Path) -> Result<PathBuf> {
    let path = result_path(&result.task_id, store_dir)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create results directory")?;
    }

    let json =
        serde_json::to_string_pretty(result).context("Failed to serialize quality gate result")?;
    locked_write(&path, &json)
        .with_context(|| format!("Failed to write result: {}", path.display()))?;

    Ok(path)
}

/// Load the stored result of a task
pub fn load_result(task_id: &str, store_dir: &Path) -> Result<Option<QualityGateResult>> {
    let path = result_path(task_id, store_dir)?;
    if !path.exists() {
        return Ok(None);
    }

    let json = locked_read(&path)?;
    let result = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse result: {}", path.display()))?;
    Ok(Some(result))
}
