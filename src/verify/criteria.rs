//! Success criteria evaluation
//!
//! Criteria are evaluated against the evidence already collected by the
//! earlier gates; nothing is executed here. Each criterion's method tag is
//! resolved through an explicit `StrategyRegistry`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::evidence::{Evidence, EvidenceKind, EvidencePayload};
use crate::models::failure::FailureClass;
use crate::models::gate::{GateKind, GateResult};
use crate::models::task::{ExpectedOutcome, MethodTag, SuccessCriterion};

/// Verification strategies known to proofgate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    TestBased,
    Functional,
    DiffBased,
}

/// Maps method tags to strategies
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<MethodTag, Strategy>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(MethodTag::TestBased, Strategy::TestBased);
        registry.register(MethodTag::Functional, Strategy::Functional);
        registry.register(MethodTag::DiffBased, Strategy::DiffBased);
        registry
    }
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, tag: MethodTag, strategy: Strategy) {
        self.strategies.insert(tag, strategy);
    }

    pub fn resolve(&self, tag: &MethodTag) -> Option<Strategy> {
        self.strategies.get(tag).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CriterionStatus {
    Satisfied,
    Unsatisfied,
    /// The criterion could not be evaluated (no strategy for its method)
    Error,
}

impl std::fmt::Display for CriterionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CriterionStatus::Satisfied => write!(f, "satisfied"),
            CriterionStatus::Unsatisfied => write!(f, "unsatisfied"),
            CriterionStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionEvaluation {
    pub criterion: SuccessCriterion,
    pub status: CriterionStatus,
    pub explanation: String,
    pub evidence_ids: Vec<String>,
}

impl CriterionEvaluation {
    fn new(
        criterion: &SuccessCriterion,
        status: CriterionStatus,
        explanation: impl Into<String>,
        evidence: &[&Evidence],
    ) -> Self {
        Self {
            criterion: criterion.clone(),
            status,
            explanation: explanation.into(),
            evidence_ids: evidence.iter().map(|e| e.id().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuccessCriteriaVerifier {
    registry: StrategyRegistry,
}

impl SuccessCriteriaVerifier {
    pub fn new(registry: StrategyRegistry) -> Self {
        Self { registry }
    }

    /// Evaluate every criterion against `evidence`, which must be in
    /// gate-execution order.
    pub fn evaluate(
        &self,
        criteria: &[SuccessCriterion],
        evidence: &[Evidence],
    ) -> Vec<CriterionEvaluation> {
        criteria
            .iter()
            .map(|criterion| match self.registry.resolve(&criterion.method) {
                Some(Strategy::TestBased) => evaluate_test_based(criterion, evidence),
                Some(Strategy::Functional) => evaluate_functional(criterion, evidence),
                Some(Strategy::DiffBased) => evaluate_diff_based(criterion, evidence),
                None => CriterionEvaluation::new(
                    criterion,
                    CriterionStatus::Error,
                    format!("no strategy registered for method '{}'", criterion.method),
                    &[],
                ),
            })
            .collect()
    }

    /// Gate result for a set of evaluations
    pub fn gate_result(evaluations: &[CriterionEvaluation], attempt: u32) -> GateResult {
        let gate = GateKind::SuccessCriteria;
        let mut evidence_ids: Vec<String> = Vec::new();
        for id in evaluations.iter().flat_map(|e| e.evidence_ids.iter()) {
            if !evidence_ids.contains(id) {
                evidence_ids.push(id.clone());
            }
        }

        let describe = |status: CriterionStatus| -> Vec<String> {
            evaluations
                .iter()
                .filter(|e| e.status == status)
                .map(|e| format!("{}: {}", e.criterion.description, e.explanation))
                .collect()
        };

        let errors = describe(CriterionStatus::Error);
        if !errors.is_empty() {
            return GateResult::errored(
                gate,
                attempt,
                FailureClass::ConfigurationError,
                evidence_ids,
                errors.join("; "),
            );
        }
        let unsatisfied = describe(CriterionStatus::Unsatisfied);
        if !unsatisfied.is_empty() {
            return GateResult::failed(
                gate,
                attempt,
                FailureClass::AssertionFailure,
                evidence_ids,
                unsatisfied.join("; "),
            );
        }
        GateResult::passed(
            gate,
            attempt,
            evidence_ids,
            format!("{} criteria satisfied", evaluations.len()),
        )
    }
}

/// Evidence of a gate's most recent attempt
fn latest_attempt(evidence: &[Evidence], gate: GateKind) -> Vec<&Evidence> {
    let Some(attempt) = evidence
        .iter()
        .filter(|e| e.gate() == gate)
        .map(Evidence::attempt)
        .max()
    else {
        return Vec::new();
    };
    evidence
        .iter()
        .filter(|e| e.gate() == gate && e.attempt() == attempt)
        .collect()
}

fn evaluate_test_based(criterion: &SuccessCriterion, evidence: &[Evidence]) -> CriterionEvaluation {
    let items = latest_attempt(evidence, GateKind::TestExecution);
    let Some(item) = items
        .iter()
        .rev()
        .find(|e| e.kind() == EvidenceKind::CommandOutput)
    else {
        return CriterionEvaluation::new(
            criterion,
            CriterionStatus::Unsatisfied,
            "no test execution evidence",
            &[],
        );
    };
    let EvidencePayload::CommandOutput(output) = item.payload() else {
        return CriterionEvaluation::new(
            criterion,
            CriterionStatus::Unsatisfied,
            "no test execution evidence",
            &[],
        );
    };

    let expected = &criterion.expected;
    let failed = output.failed.unwrap_or(0);
    let passed = output.passed.unwrap_or(0);
    let mut problems = Vec::new();

    if output.timed_out || output.exit_code != Some(0) {
        problems.push(format!(
            "test command did not succeed (exit {:?}, timed out: {})",
            output.exit_code, output.timed_out
        ));
    }
    let max_failed = expected.max_failed.unwrap_or(0);
    if failed > max_failed {
        problems.push(format!("{failed} tests failed (max {max_failed})"));
    }
    if let Some(min) = expected.min_passed {
        if passed < min {
            problems.push(format!("{passed} tests passed (min {min})"));
        }
    }
    if let Some(needle) = &expected.contains {
        if !output.stdout.contains(needle.as_str()) && !output.stderr.contains(needle.as_str()) {
            problems.push(format!("test output does not contain '{needle}'"));
        }
    }

    verdict(
        criterion,
        problems,
        format!("{passed} passed, {failed} failed"),
        &[*item],
    )
}

fn evaluate_functional(criterion: &SuccessCriterion, evidence: &[Evidence]) -> CriterionEvaluation {
    let expected = &criterion.expected;
    let items: Vec<&Evidence> = latest_attempt(evidence, GateKind::Functional)
        .into_iter()
        .filter(|e| match &expected.check {
            Some(check) => e.payload().subject() == check.as_str(),
            None => true,
        })
        .collect();

    if items.is_empty() {
        let what = expected
            .check
            .as_deref()
            .map(|c| format!("no evidence for functional check '{c}'"))
            .unwrap_or_else(|| "no functional check evidence".to_string());
        return CriterionEvaluation::new(criterion, CriterionStatus::Unsatisfied, what, &[]);
    }

    let mut problems = Vec::new();
    for item in &items {
        let payload = item.payload();
        if !payload.indicates_success() {
            problems.push(format!("check '{}' did not succeed", payload.subject()));
        }
        if let Some(status) = expected.status {
            match payload {
                EvidencePayload::HttpResponse(r) => {
                    if r.status != Some(status) {
                        problems.push(format!(
                            "check '{}' returned {:?}, expected {status}",
                            r.check, r.status
                        ));
                    }
                }
                other => problems.push(format!(
                    "check '{}' has no HTTP status to compare with {status}",
                    other.subject()
                )),
            }
        }
        if let Some(needle) = &expected.contains {
            let text = match payload {
                EvidencePayload::HttpResponse(r) => r.body.as_str(),
                EvidencePayload::Screenshot(s) => s.page_text.as_str(),
                EvidencePayload::DbQueryResult(q) => q.output.as_str(),
                _ => "",
            };
            if !text.contains(needle.as_str()) {
                problems.push(format!(
                    "check '{}' output does not contain '{needle}'",
                    payload.subject()
                ));
            }
        }
    }

    verdict(
        criterion,
        problems,
        format!("{} functional results confirm it", items.len()),
        &items,
    )
}

fn evaluate_diff_based(criterion: &SuccessCriterion, evidence: &[Evidence]) -> CriterionEvaluation {
    let items = latest_attempt(evidence, GateKind::Diff);
    let Some(item) = items.last() else {
        return CriterionEvaluation::new(
            criterion,
            CriterionStatus::Unsatisfied,
            "no diff evidence",
            &[],
        );
    };
    let EvidencePayload::DiffSnippet(diff) = item.payload() else {
        return CriterionEvaluation::new(
            criterion,
            CriterionStatus::Unsatisfied,
            "no diff evidence",
            &[],
        );
    };

    let expected: &ExpectedOutcome = &criterion.expected;
    let mut problems = Vec::new();
    if diff.substantive_lines == 0 {
        problems.push("no substantive changes".to_string());
    }
    if let Some(path) = &expected.path {
        let pattern = glob::Pattern::new(path).ok();
        let touched = diff.files.iter().any(|f| {
            f == path
                || pattern
                    .as_ref()
                    .map(|p| p.matches(f))
                    .unwrap_or(false)
        });
        if !touched {
            problems.push(format!("no changed file matches '{path}'"));
        }
    }
    if let Some(needle) = &expected.contains {
        if !diff.snippet.contains(needle.as_str()) {
            problems.push(format!("diff does not contain '{needle}'"));
        }
    }

    verdict(
        criterion,
        problems,
        format!(
            "{} files, {} substantive lines",
            diff.files.len(),
            diff.substantive_lines
        ),
        &[*item],
    )
}

fn verdict(
    criterion: &SuccessCriterion,
    problems: Vec<String>,
    success: String,
    evidence: &[&Evidence],
) -> CriterionEvaluation {
    if problems.is_empty() {
        CriterionEvaluation::new(criterion, CriterionStatus::Satisfied, success, evidence)
    } else {
        CriterionEvaluation::new(
            criterion,
            CriterionStatus::Unsatisfied,
            problems.join("; "),
            evidence,
        )
    }
}
