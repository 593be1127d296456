//! Evidence: immutable proof artifacts produced by gates
//!
//! Evidence fields are private and there is no mutation API. The id is a
//! content address (SHA-256 over the payload, exit code, timestamp and the
//! `(task, gate, attempt, sequence)` key), so a copied or edited payload no
//! longer matches its id and is rejected by `verify_integrity`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::gate::GateKind;
use crate::error::GateError;

/// Kind of proof artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvidenceKind {
    CommandOutput,
    HttpResponse,
    Screenshot,
    DbQueryResult,
    DiffSnippet,
}

impl std::fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvidenceKind::CommandOutput => write!(f, "command-output"),
            EvidenceKind::HttpResponse => write!(f, "http-response"),
            EvidenceKind::Screenshot => write!(f, "screenshot"),
            EvidenceKind::DbQueryResult => write!(f, "db-query-result"),
            EvidenceKind::DiffSnippet => write!(f, "diff-snippet"),
        }
    }
}

/// Captured output of a shell command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u32>,
    pub duration_ms: u64,
}

/// Response observed by an HTTP check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub check: String,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

/// Screenshot captured by a browser check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub check: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub page_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

/// Result of a database query check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbQueryResult {
    pub check: String,
    pub query: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
}

/// Summary of the code change under review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSnippet {
    pub files: Vec<String>,
    pub added: usize,
    pub removed: usize,
    /// Changed lines that differ by more than whitespace
    pub substantive_lines: usize,
    pub snippet: String,
}

/// Typed evidence payload. The evidence kind is derived from the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EvidencePayload {
    CommandOutput(CommandOutput),
    HttpResponse(HttpResponse),
    Screenshot(Screenshot),
    DbQueryResult(DbQueryResult),
    DiffSnippet(DiffSnippet),
}

impl EvidencePayload {
    pub fn kind(&self) -> EvidenceKind {
        match self {
            EvidencePayload::CommandOutput(_) => EvidenceKind::CommandOutput,
            EvidencePayload::HttpResponse(_) => EvidenceKind::HttpResponse,
            EvidencePayload::Screenshot(_) => EvidenceKind::Screenshot,
            EvidencePayload::DbQueryResult(_) => EvidenceKind::DbQueryResult,
            EvidencePayload::DiffSnippet(_) => EvidenceKind::DiffSnippet,
        }
    }

    /// What the evidence is about: the command, the check name, or "diff"
    pub fn subject(&self) -> &str {
        match self {
            EvidencePayload::CommandOutput(c) => &c.command,
            EvidencePayload::HttpResponse(r) => &r.check,
            EvidencePayload::Screenshot(s) => &s.check,
            EvidencePayload::DbQueryResult(q) => &q.check,
            EvidencePayload::DiffSnippet(_) => "diff",
        }
    }

    /// Whether the artifact shows a successful outcome
    pub fn indicates_success(&self) -> bool {
        match self {
            EvidencePayload::CommandOutput(c) => {
                !c.timed_out && c.exit_code == Some(0) && c.failed.unwrap_or(0) == 0
            }
            EvidencePayload::HttpResponse(r) => r.success,
            EvidencePayload::Screenshot(s) => s.success,
            EvidencePayload::DbQueryResult(q) => q.success,
            EvidencePayload::DiffSnippet(d) => d.substantive_lines > 0,
        }
    }

    fn exit_code_label(&self) -> String {
        match self {
            EvidencePayload::CommandOutput(c) => c
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "none".to_string()),
            _ => "n/a".to_string(),
        }
    }
}

/// An immutable, content-addressed proof artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    id: String,
    task_id: String,
    kind: EvidenceKind,
    gate: GateKind,
    attempt: u32,
    sequence: u64,
    timestamp: DateTime<Utc>,
    payload: EvidencePayload,
}

impl Evidence {
    /// Seal a payload into evidence, computing its content address.
    pub(crate) fn seal(
        task_id: &str,
        gate: GateKind,
        attempt: u32,
        sequence: u64,
        timestamp: DateTime<Utc>,
        payload: EvidencePayload,
    ) -> Result<Self, GateError> {
        let id = content_address(task_id, gate, attempt, sequence, &timestamp, &payload)?;
        Ok(Self {
            id,
            task_id: task_id.to_string(),
            kind: payload.kind(),
            gate,
            attempt,
            sequence,
            timestamp,
            payload,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn kind(&self) -> EvidenceKind {
        self.kind
    }

    pub fn gate(&self) -> GateKind {
        self.gate
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EvidencePayload {
        &self.payload
    }

    /// Store key `(task_id, gate, attempt, sequence)`
    pub fn key(&self) -> (&str, GateKind, u32, u64) {
        (&self.task_id, self.gate, self.attempt, self.sequence)
    }

    /// Recompute the content address and compare it with the stored id.
    pub fn verify_integrity(&self) -> bool {
        if self.kind != self.payload.kind() {
            return false;
        }
        content_address(
            &self.task_id,
            self.gate,
            self.attempt,
            self.sequence,
            &self.timestamp,
            &self.payload,
        )
        .map(|id| id == self.id)
        .unwrap_or(false)
    }

    /// Sort key for gate-execution order
    pub(crate) fn execution_order(&self) -> (u8, u32, u64) {
        (self.gate.order(), self.attempt, self.sequence)
    }
}

fn content_address(
    task_id: &str,
    gate: GateKind,
    attempt: u32,
    sequence: u64,
    timestamp: &DateTime<Utc>,
    payload: &EvidencePayload,
) -> Result<String, GateError> {
    let payload_json = serde_json::to_string(payload)
        .map_err(|e| GateError::Integrity(format!("Failed to serialize evidence payload: {e}")))?;

    let mut hasher = Sha256::new();
    hasher.update(task_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(gate.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(attempt.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(
        timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    hasher.update(b"\n");
    hasher.update(payload.exit_code_label().as_bytes());
    hasher.update(b"\n");
    hasher.update(payload_json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
