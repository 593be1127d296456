//! Durable, append-only evidence store
//!
//! Evidence for a task lives in `<root>/evidence/<task_id>.jsonl`, one JSON
//! record per line. Every record carries its `(task_id, gate, attempt,
//! sequence)` key and content address; records are only ever appended.
//! Loading re-verifies each record so a replayed audit trail can be trusted.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::locking::{locked_append, locked_read};
use crate::models::evidence::Evidence;
use crate::validation::validate_id;

const EVIDENCE_DIR: &str = "evidence";

#[derive(Debug, Clone)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the evidence log for a task
    pub fn evidence_path(&self, task_id: &str) -> Result<PathBuf> {
        validate_id(task_id)?;
        Ok(self
            .root
            .join(EVIDENCE_DIR)
            .join(format!("{task_id}.jsonl")))
    }

    /// Append one evidence record
    pub fn append(&self, evidence: &Evidence) -> Result<()> {
        let path = self.evidence_path(evidence.task_id())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create evidence directory: {}", parent.display())
            })?;
        }

        let line = serde_json::to_string(evidence).context("Failed to serialize evidence")?;
        locked_append(&path, &line)?;

        tracing::debug!(
            task_id = evidence.task_id(),
            gate = %evidence.gate(),
            attempt = evidence.attempt(),
            sequence = evidence.sequence(),
            id = evidence.id(),
            "evidence persisted"
        );
        Ok(())
    }

    /// Load every record stored for a task, in append order.
    ///
    /// Fails if any record does not match its content address, belongs to
    /// another task, or repeats a key already seen.
    pub fn load(&self, task_id: &str) -> Result<Vec<Evidence>> {
        let path = self.evidence_path(task_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = locked_read(&path)?;
        let mut records = Vec::new();
        let mut seen_keys = HashSet::new();

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let line_no = index + 1;
            let evidence: Evidence = serde_json::from_str(line).with_context(|| {
                format!("Failed to parse evidence record at {}:{line_no}", path.display())
            })?;

            if evidence.task_id() != task_id {
                bail!(
                    "Evidence record at {}:{line_no} belongs to task '{}'",
                    path.display(),
                    evidence.task_id()
                );
            }
            if !evidence.verify_integrity() {
                bail!(
                    "Evidence record at {}:{line_no} does not match its content address {}",
                    path.display(),
                    evidence.id()
                );
            }
            let (_, gate, attempt, sequence) = evidence.key();
            if !seen_keys.insert((gate, attempt, sequence)) {
                bail!(
                    "Duplicate evidence key ({task_id}, {gate}, {attempt}, {sequence}) at {}:{line_no}",
                    path.display()
                );
            }
            records.push(evidence);
        }

        Ok(records)
    }

    /// Sequence number the next run of a task must start from.
    ///
    /// Sequences keep growing across runs so repeated runs of one task never
    /// reuse a `(task_id, gate, attempt, sequence)` key. Unparseable lines
    /// are skipped here; `load` reports them.
    pub fn next_sequence(&self, task_id: &str) -> Result<u64> {
        let path = self.evidence_path(task_id)?;
        if !path.exists() {
            return Ok(0);
        }

        let content = locked_read(&path)?;
        let next = content
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|record| record.get("sequence").and_then(serde_json::Value::as_u64))
            .map(|sequence| sequence + 1)
            .max()
            .unwrap_or(0);
        Ok(next)
    }

    /// Task ids that have stored evidence, sorted
    pub fn task_ids(&self) -> Result<Vec<String>> {
        let dir = self.root.join(EVIDENCE_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("Failed to read evidence directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
