//! Per-run evidence log
//!
//! One `EvidenceCollector` is created per coordinator run and borrowed by
//! every gate. Appends happen under a mutex, which also hands out the
//! sequence numbers, so concurrent gates can never produce two entries with
//! the same key.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::error::GateError;
use crate::fs::evidence_store::EvidenceStore;
use crate::models::evidence::{Evidence, EvidencePayload};
use crate::models::gate::GateKind;

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<Evidence>,
    ids: HashSet<String>,
    next_sequence: u64,
}

#[derive(Debug)]
pub struct EvidenceCollector {
    task_id: String,
    inner: Mutex<Inner>,
    store: Option<EvidenceStore>,
}

impl EvidenceCollector {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            inner: Mutex::new(Inner::default()),
            store: None,
        }
    }

    /// Persist every collected item to a durable store as well
    pub fn with_store(mut self, store: EvidenceStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Hand out sequence numbers starting at `sequence`
    pub fn starting_at(self, sequence: u64) -> Self {
        self.lock().next_sequence = sequence;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries are only pushed after sealing succeeds, so a poisoned log
        // is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seal a payload into evidence and append it to the log.
    ///
    /// With a store configured the record is persisted before it becomes
    /// visible in the log; a store failure means nothing was collected.
    pub fn collect(
        &self,
        gate: GateKind,
        attempt: u32,
        payload: EvidencePayload,
    ) -> Result<Evidence, GateError> {
        let mut inner = self.lock();
        let sequence = inner.next_sequence;
        let evidence = Evidence::seal(&self.task_id, gate, attempt, sequence, Utc::now(), payload)?;

        if inner.ids.contains(evidence.id()) {
            return Err(GateError::Integrity(format!(
                "evidence id collision: {}",
                evidence.id()
            )));
        }

        if let Some(store) = &self.store {
            store
                .append(&evidence)
                .map_err(|e| GateError::Store(format!("{e:#}")))?;
        }

        inner.next_sequence += 1;
        inner.ids.insert(evidence.id().to_string());
        inner.entries.push(evidence.clone());

        tracing::debug!(
            task_id = %self.task_id,
            gate = %gate,
            attempt,
            sequence,
            kind = %evidence.kind(),
            "evidence collected"
        );
        Ok(evidence)
    }

    /// Add previously sealed evidence, e.g. replayed from a store.
    ///
    /// Records that fail their integrity check, belong to another task, or
    /// repeat an id already in the log are rejected.
    pub fn import(&self, evidence: Evidence) -> Result<(), GateError> {
        if evidence.task_id() != self.task_id {
            return Err(GateError::Integrity(format!(
                "evidence {} belongs to task '{}'",
                evidence.id(),
                evidence.task_id()
            )));
        }
        if !evidence.verify_integrity() {
            return Err(GateError::Integrity(format!(
                "evidence {} does not match its content address",
                evidence.id()
            )));
        }

        let mut inner = self.lock();
        if inner.ids.contains(evidence.id()) {
            return Err(GateError::Integrity(format!(
                "duplicate evidence {}",
                evidence.id()
            )));
        }
        inner.next_sequence = inner.next_sequence.max(evidence.sequence() + 1);
        inner.ids.insert(evidence.id().to_string());
        inner.entries.push(evidence);
        Ok(())
    }

    /// Evidence of a task in gate-execution order
    pub fn get(&self, task_id: &str) -> Vec<Evidence> {
        let mut entries: Vec<Evidence> = self
            .lock()
            .entries
            .iter()
            .filter(|e| e.task_id() == task_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.execution_order());
        entries
    }

    /// Everything collected so far, in gate-execution order
    pub fn snapshot(&self) -> Vec<Evidence> {
        self.get(&self.task_id)
    }

    pub fn for_gate(&self, gate: GateKind) -> Vec<Evidence> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.gate() == gate)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
