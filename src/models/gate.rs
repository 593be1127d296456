use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::evidence::Evidence;
use super::failure::{FailureClass, FailureReport};
use super::pipeline::PipelineState;
use crate::verify::criteria::CriterionEvaluation;
use crate::verify::truth::TruthReport;

/// One verification step of the pipeline.
///
/// Variants are declared in pipeline order; `order()` is used to sort
/// evidence and results into gate-execution order.
///
/// Deserialization goes through `FromStr`, so descriptors accept the same
/// aliases (`test`, `truth`, `success_criteria`, ...) as the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateKind {
    Preflight,
    TestExecution,
    Functional,
    Diff,
    SuccessCriteria,
    TruthEnforcement,
}

impl GateKind {
    pub const ALL: [GateKind; 6] = [
        GateKind::Preflight,
        GateKind::TestExecution,
        GateKind::Functional,
        GateKind::Diff,
        GateKind::SuccessCriteria,
        GateKind::TruthEnforcement,
    ];

    /// Position of the gate in the pipeline
    pub fn order(&self) -> u8 {
        match self {
            GateKind::Preflight => 0,
            GateKind::TestExecution => 1,
            GateKind::Functional => 2,
            GateKind::Diff => 3,
            GateKind::SuccessCriteria => 4,
            GateKind::TruthEnforcement => 5,
        }
    }

    /// Gate kinds whose failures may be transient.
    ///
    /// Diff and truth-enforcement failures are structural and never flaky.
    pub fn is_flaky(&self) -> bool {
        matches!(self, GateKind::TestExecution | GateKind::Functional)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateKind::Preflight => "preflight",
            GateKind::TestExecution => "test-execution",
            GateKind::Functional => "functional",
            GateKind::Diff => "diff",
            GateKind::SuccessCriteria => "success-criteria",
            GateKind::TruthEnforcement => "truth-enforcement",
        }
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GateKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "preflight" => Ok(GateKind::Preflight),
            "test-execution" | "test" | "tests" => Ok(GateKind::TestExecution),
            "functional" => Ok(GateKind::Functional),
            "diff" => Ok(GateKind::Diff),
            "success-criteria" | "criteria" => Ok(GateKind::SuccessCriteria),
            "truth-enforcement" | "truth" => Ok(GateKind::TruthEnforcement),
            _ => anyhow::bail!(
                "Invalid gate kind: {s}. Valid values: preflight, test-execution, functional, diff, success-criteria, truth-enforcement"
            ),
        }
    }
}

impl<'de> Deserialize<'de> for GateKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of a single gate attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    /// Ran and proved its outcome
    Pass,
    /// Ran, and the outcome was negative
    Fail,
    /// Could not determine the outcome (timeout, crash, bad definition)
    Error,
    /// Nothing to verify, or not reached
    Skipped,
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateStatus::Pass => write!(f, "pass"),
            GateStatus::Fail => write!(f, "fail"),
            GateStatus::Error => write!(f, "error"),
            GateStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of one attempt of one gate.
///
/// Results are never overwritten: a retry produces a new `GateResult` with a
/// higher `attempt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateKind,
    pub status: GateStatus,
    pub evidence_ids: Vec<String>,
    pub message: String,
    /// 1-based attempt number (0 for gates that never ran)
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<FailureClass>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl GateResult {
    /// A passing result.
    ///
    /// A pass must be proven: without evidence the result is downgraded to a
    /// failure classified as an integrity violation.
    pub fn passed(
        gate: GateKind,
        attempt: u32,
        evidence_ids: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        if evidence_ids.is_empty() {
            return Self::failed(
                gate,
                attempt,
                FailureClass::IntegrityViolation,
                evidence_ids,
                format!("Unproven pass rejected: {}", message.into()),
            );
        }
        Self {
            gate,
            status: GateStatus::Pass,
            evidence_ids,
            message: message.into(),
            attempt,
            classification: None,
            duration_ms: 0,
        }
    }

    pub fn failed(
        gate: GateKind,
        attempt: u32,
        classification: FailureClass,
        evidence_ids: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            status: GateStatus::Fail,
            evidence_ids,
            message: message.into(),
            attempt,
            classification: Some(classification),
            duration_ms: 0,
        }
    }

    pub fn errored(
        gate: GateKind,
        attempt: u32,
        classification: FailureClass,
        evidence_ids: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            status: GateStatus::Error,
            evidence_ids,
            message: message.into(),
            attempt,
            classification: Some(classification),
            duration_ms: 0,
        }
    }

    pub fn skipped(gate: GateKind, message: impl Into<String>) -> Self {
        Self {
            gate,
            status: GateStatus::Skipped,
            evidence_ids: Vec::new(),
            message: message.into(),
            attempt: 0,
            classification: None,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status == GateStatus::Pass
    }

    pub fn is_skipped(&self) -> bool {
        self.status == GateStatus::Skipped
    }

    /// Failure class of a non-passing result.
    ///
    /// Results built without an explicit class fall back to `ExecutionError`
    /// for errors and `AssertionFailure` for failures.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self.status {
            GateStatus::Pass | GateStatus::Skipped => None,
            GateStatus::Error => Some(
                self.classification
                    .unwrap_or(FailureClass::ExecutionError),
            ),
            GateStatus::Fail => Some(
                self.classification
                    .unwrap_or(FailureClass::AssertionFailure),
            ),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} #{} {} - {} ({} evidence, {}ms)",
            self.gate,
            self.attempt,
            self.status,
            self.message,
            self.evidence_ids.len(),
            self.duration_ms
        )
    }
}

/// Aggregate result of one coordinator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub run_id: Uuid,
    pub task_id: String,
    /// Terminal pipeline state (passed, failed or aborted)
    pub state: PipelineState,
    pub passed: bool,
    /// Every attempt of every gate, in gate-execution order
    pub gate_results: Vec<GateResult>,
    /// Full evidence set, in gate-execution order
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub failures: Vec<FailureReport>,
    #[serde(default)]
    pub criteria: Vec<CriterionEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truth: Option<TruthReport>,
    /// Every state the pipeline passed through, starting with `Init`
    pub transitions: Vec<PipelineState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl QualityGateResult {
    /// All attempts of a gate, oldest first
    pub fn results_for(&self, gate: GateKind) -> Vec<&GateResult> {
        self.gate_results.iter().filter(|r| r.gate == gate).collect()
    }

    /// Latest attempt of a gate
    pub fn final_result(&self, gate: GateKind) -> Option<&GateResult> {
        self.gate_results.iter().rev().find(|r| r.gate == gate)
    }

    /// Number of attempts that actually ran for a gate
    pub fn attempts(&self, gate: GateKind) -> usize {
        self.results_for(gate)
            .iter()
            .filter(|r| r.attempt > 0)
            .count()
    }

    pub fn evidence_for(&self, gate: GateKind) -> Vec<&Evidence> {
        self.evidence.iter().filter(|e| e.gate() == gate).collect()
    }

    pub fn find_evidence(&self, id: &str) -> Option<&Evidence> {
        self.evidence.iter().find(|e| e.id() == id)
    }

    /// Whether escalation to the caller is required
    pub fn escalated(&self) -> bool {
        self.failures.iter().any(|f| f.escalation)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.signed_duration_since(self.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_without_evidence_is_rejected() {
        let result = GateResult::passed(GateKind::TestExecution, 1, vec![], "tests passed");
        assert_eq!(result.status, GateStatus::Fail);
        assert_eq!(
            result.classification,
            Some(FailureClass::IntegrityViolation)
        );
        assert!(result.message.contains("Unproven pass"));
    }

    #[test]
    fn test_pass_with_evidence() {
        let result = GateResult::passed(
            GateKind::Diff,
            1,
            vec!["abc".to_string()],
            "diff ok",
        );
        assert!(result.is_pass());
        assert!(result.failure_class().is_none());
    }

    #[test]
    fn test_failure_class_fallbacks() {
        let mut result = GateResult::failed(
            GateKind::TestExecution,
            1,
            FailureClass::AssertionFailure,
            vec![],
            "failed",
        );
        result.classification = None;
        assert_eq!(result.failure_class(), Some(FailureClass::AssertionFailure));

        result.status = GateStatus::Error;
        assert_eq!(result.failure_class(), Some(FailureClass::ExecutionError));
    }

    #[test]
    fn test_gate_kind_order_matches_declaration() {
        let mut sorted = GateKind::ALL.to_vec();
        sorted.sort_by_key(|g| g.order());
        assert_eq!(sorted, GateKind::ALL.to_vec());
    }

    #[test]
    fn test_gate_kind_parsing() {
        assert_eq!(
            "test_execution".parse::<GateKind>().unwrap(),
            GateKind::TestExecution
        );
        assert_eq!("truth".parse::<GateKind>().unwrap(), GateKind::TruthEnforcement);
        assert!("deploy".parse::<GateKind>().is_err());
    }

    #[test]
    fn test_only_test_and_functional_are_flaky() {
        let flaky: Vec<_> = GateKind::ALL.iter().filter(|g| g.is_flaky()).collect();
        assert_eq!(flaky, vec![&GateKind::TestExecution, &GateKind::Functional]);
    }
}
