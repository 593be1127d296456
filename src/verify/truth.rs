//! Truth enforcement
//!
//! Every completion claim made by the agent must be backed by evidence
//! whose kind and content corroborate it. Only the most recent attempt of
//! each gate counts: an early green run does not survive a later red one.
//!
//! Enforcement is a pure function of its inputs.

use serde::{Deserialize, Serialize};

use crate::models::evidence::{Evidence, EvidencePayload};
use crate::models::failure::FailureClass;
use crate::models::gate::{GateKind, GateResult};

const SUCCESS_SUFFIXES: &[&str] = &[
    " succeeded",
    " succeeds",
    " is working",
    " works",
    " passes",
    " passed",
    " pass",
];

const COMPLETION_WORDS: &[&str] = &["done", "complete", "completed", "finished"];

const CHANGE_WORDS: &[&str] = &[
    "implemented",
    "implement",
    "added",
    "fixed",
    "changed",
    "refactored",
    "updated",
    "modified",
    "created",
    "wrote",
    "removed",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "subject", rename_all = "kebab-case")]
pub enum ClaimKind {
    TestsPassed,
    CheckSucceeded(String),
    CodeChanged,
    TaskCompleted,
    Generic(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub kind: ClaimKind,
    /// Set when any word of the claim says work was done, whatever its kind.
    /// "Implemented login and all tests pass" is a tests claim that still
    /// needs a substantive diff.
    #[serde(default)]
    pub asserts_change: bool,
}

impl Claim {
    /// Classify a free-text claim. `check_names` are the task's functional
    /// check names, used to recognize claims about a specific check.
    pub fn parse(text: &str, check_names: &[String]) -> Self {
        let lower = text.trim().to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            .filter(|w| !w.is_empty())
            .collect();
        let has = |list: &[&str]| words.iter().any(|w| list.contains(w));
        let succeeded = has(&[
            "pass", "passes", "passed", "passing", "succeeded", "succeeds", "works", "green", "ok",
        ]);

        let kind = if words.iter().any(|w| w.starts_with("test")) && succeeded {
            ClaimKind::TestsPassed
        } else if let Some(name) = check_names
            .iter()
            .find(|name| words.contains(&name.to_lowercase().as_str()))
            .filter(|_| succeeded)
        {
            ClaimKind::CheckSucceeded(name.clone())
        } else if has(COMPLETION_WORDS) && !has(CHANGE_WORDS) {
            ClaimKind::TaskCompleted
        } else if has(CHANGE_WORDS) {
            ClaimKind::CodeChanged
        } else {
            let subject = SUCCESS_SUFFIXES
                .iter()
                .find_map(|suffix| lower.strip_suffix(suffix))
                .unwrap_or(lower.as_str())
                .trim()
                .to_string();
            ClaimKind::Generic(subject)
        };

        Self {
            text: text.to_string(),
            kind,
            asserts_change: has(COMPLETION_WORDS) || has(CHANGE_WORDS),
        }
    }

    /// The claim made when an agent submits a task without stating one
    pub fn implicit_completion() -> Self {
        Self {
            text: "task completed".to_string(),
            kind: ClaimKind::TaskCompleted,
            asserts_change: true,
        }
    }

    /// Whether the claim asserts that code was changed or the task is done
    pub fn asserts_completion(&self) -> bool {
        self.asserts_change
            || matches!(self.kind, ClaimKind::TaskCompleted | ClaimKind::CodeChanged)
    }
}

/// Parse claims, adding the implicit completion claim when there are none
pub fn parse_claims(claims: &[String], check_names: &[String]) -> Vec<Claim> {
    if claims.is_empty() {
        return vec![Claim::implicit_completion()];
    }
    claims.iter().map(|c| Claim::parse(c, check_names)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim: Claim,
    pub supported: bool,
    pub evidence_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthReport {
    pub passed: bool,
    /// Why each unsupported claim was rejected
    pub reasons: Vec<String>,
    /// Evidence backing the supported claims, without duplicates
    pub supporting_evidence: Vec<String>,
    pub claims: Vec<ClaimCheck>,
}

impl TruthReport {
    pub fn gate_result(&self, attempt: u32) -> GateResult {
        let gate = GateKind::TruthEnforcement;
        if self.passed {
            GateResult::passed(
                gate,
                attempt,
                self.supporting_evidence.clone(),
                format!("{} claims backed by evidence", self.claims.len()),
            )
        } else {
            GateResult::failed(
                gate,
                attempt,
                FailureClass::IntegrityViolation,
                self.supporting_evidence.clone(),
                self.reasons.join("; "),
            )
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TruthEnforcer;

impl TruthEnforcer {
    pub fn new() -> Self {
        Self
    }

    pub fn enforce(&self, claims: &[Claim], evidence: &[Evidence]) -> TruthReport {
        let latest = latest_attempts(evidence);

        let checks: Vec<ClaimCheck> = claims
            .iter()
            .map(|claim| {
                let (mut support, mut missing) = support_for(&claim.kind, &latest);
                let diff_checked =
                    matches!(claim.kind, ClaimKind::TaskCompleted | ClaimKind::CodeChanged);
                if claim.asserts_completion() && !diff_checked && missing.is_none() {
                    match substantive_diff(&latest) {
                        Some(diff) => support.push(diff),
                        None => {
                            missing =
                                Some("claims work was done but the diff is not substantive".to_string())
                        }
                    }
                }
                let supported = missing.is_none() && !support.is_empty();
                ClaimCheck {
                    claim: claim.clone(),
                    supported,
                    evidence_ids: support.iter().map(|e| e.id().to_string()).collect(),
                    reason: missing.unwrap_or_else(|| "backed by evidence".to_string()),
                }
            })
            .collect();

        let mut supporting_evidence: Vec<String> = Vec::new();
        for id in checks
            .iter()
            .filter(|c| c.supported)
            .flat_map(|c| c.evidence_ids.iter())
        {
            if !supporting_evidence.contains(id) {
                supporting_evidence.push(id.clone());
            }
        }

        let reasons: Vec<String> = checks
            .iter()
            .filter(|c| !c.supported)
            .map(|c| format!("unsupported claim '{}': {}", c.claim.text, c.reason))
            .collect();

        TruthReport {
            passed: reasons.is_empty() && !checks.is_empty(),
            reasons,
            supporting_evidence,
            claims: checks,
        }
    }
}

/// Evidence from the most recent attempt of each gate, in input order
fn latest_attempts(evidence: &[Evidence]) -> Vec<&Evidence> {
    evidence
        .iter()
        .filter(|e| {
            let newest = evidence
                .iter()
                .filter(|other| other.gate() == e.gate())
                .map(Evidence::attempt)
                .max()
                .unwrap_or(0);
            e.attempt() == newest
        })
        .collect()
}

/// Evidence supporting a claim, or the reason it is unsupported
fn support_for<'a>(kind: &ClaimKind, evidence: &[&'a Evidence]) -> (Vec<&'a Evidence>, Option<String>) {
    match kind {
        ClaimKind::TestsPassed => match successful_tests(evidence) {
            Some(e) => (vec![e], None),
            None => (
                Vec::new(),
                Some("no test run exited 0 with passing and zero failing tests".to_string()),
            ),
        },
        ClaimKind::CheckSucceeded(name) => {
            let items: Vec<&Evidence> = evidence
                .iter()
                .copied()
                .filter(|e| e.gate() == GateKind::Functional && e.payload().subject() == name.as_str())
                .collect();
            if items.is_empty() {
                (Vec::new(), Some(format!("no evidence for check '{name}'")))
            } else if items.iter().all(|e| e.payload().indicates_success()) {
                (items, None)
            } else {
                (Vec::new(), Some(format!("check '{name}' did not succeed")))
            }
        }
        ClaimKind::CodeChanged => match substantive_diff(evidence) {
            Some(e) => (vec![e], None),
            None => (
                Vec::new(),
                Some("no diff with substantive changes".to_string()),
            ),
        },
        ClaimKind::TaskCompleted => {
            match (successful_tests(evidence), substantive_diff(evidence)) {
                (Some(tests), Some(diff)) => (vec![tests, diff], None),
                (None, _) => (
                    Vec::new(),
                    Some("completion requires a successful test run".to_string()),
                ),
                (_, None) => (
                    Vec::new(),
                    Some("completion requires a diff with substantive changes".to_string()),
                ),
            }
        }
        ClaimKind::Generic(subject) => {
            let items: Vec<&Evidence> = evidence
                .iter()
                .copied()
                .filter(|e| {
                    matches!(e.gate(), GateKind::TestExecution | GateKind::Functional)
                        && e.payload().indicates_success()
                        && mentions(e.payload(), subject)
                })
                .collect();
            if items.is_empty() {
                (
                    Vec::new(),
                    Some(format!("no successful evidence mentions '{subject}'")),
                )
            } else {
                (items, None)
            }
        }
    }
}

fn successful_tests<'a>(evidence: &[&'a Evidence]) -> Option<&'a Evidence> {
    evidence.iter().copied().find(|e| {
        e.gate() == GateKind::TestExecution
            && match e.payload() {
                EvidencePayload::CommandOutput(output) => {
                    !output.timed_out
                        && output.exit_code == Some(0)
                        && output.failed.unwrap_or(0) == 0
                        && output.passed.unwrap_or(0) > 0
                }
                _ => false,
            }
    })
}

fn substantive_diff<'a>(evidence: &[&'a Evidence]) -> Option<&'a Evidence> {
    evidence.iter().copied().find(|e| {
        matches!(e.payload(), EvidencePayload::DiffSnippet(diff) if diff.substantive_lines > 0)
    })
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word match: one side's words appear as a run inside the other's
fn mentions(payload: &EvidencePayload, subject: &str) -> bool {
    let claim = tokens(subject);
    let evidence = tokens(payload.subject());
    if claim.is_empty() || evidence.is_empty() {
        return false;
    }
    let contains = |haystack: &[String], needle: &[String]| {
        haystack.windows(needle.len()).any(|window| window == needle)
    };
    contains(&claim, &evidence) || contains(&evidence, &claim)
}
