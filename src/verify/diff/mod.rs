//! Diff gate
//!
//! Inspects the code change behind a completion claim. Every violation is
//! an integrity violation: a diff does not get better by running it again.

pub mod parser;
pub mod rules;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use shell_escape::escape;
use std::path::Path;
use std::time::Duration;

use crate::error::GateError;
use crate::models::evidence::{DiffSnippet, EvidencePayload};
use crate::models::failure::FailureClass;
use crate::models::gate::{GateKind, GateResult};
use crate::models::task::DiffReference;
use crate::process::{run_shell_command, CancellationToken};

pub use parser::{parse_unified_diff, FileChange, FileStatus, ParsedDiff};
pub use rules::{is_test_file, DiffPolicy, DiffViolation, ViolationRule};

/// Changed lines copied into the evidence snippet
const SNIPPET_MAX_LINES: usize = 80;
const SNIPPET_MAX_BYTES: usize = 8192;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files: Vec<String>,
    pub added: usize,
    pub removed: usize,
    pub substantive_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffValidationResult {
    pub violations: Vec<DiffViolation>,
    pub is_valid: bool,
    pub stats: DiffStats,
    pub warnings: Vec<String>,
    snippet: String,
}

impl DiffValidationResult {
    pub fn to_payload(&self) -> EvidencePayload {
        EvidencePayload::DiffSnippet(DiffSnippet {
            files: self.stats.files.clone(),
            added: self.stats.added,
            removed: self.stats.removed,
            substantive_lines: self.stats.substantive_lines,
            snippet: self.snippet.clone(),
        })
    }

    pub fn gate_result(&self, attempt: u32, evidence_ids: Vec<String>) -> GateResult {
        if self.is_valid {
            return GateResult::passed(
                GateKind::Diff,
                attempt,
                evidence_ids,
                format!(
                    "{} files changed (+{} -{}, {} substantive)",
                    self.stats.files.len(),
                    self.stats.added,
                    self.stats.removed,
                    self.stats.substantive_lines
                ),
            );
        }
        let messages: Vec<&str> = self.violations.iter().map(|v| v.message.as_str()).collect();
        GateResult::failed(
            GateKind::Diff,
            attempt,
            FailureClass::IntegrityViolation,
            evidence_ids,
            messages.join("; "),
        )
    }
}

#[derive(Debug, Clone)]
pub struct DiffValidator {
    policy: DiffPolicy,
    forbidden: Vec<Pattern>,
}

impl DiffValidator {
    pub fn new(policy: DiffPolicy) -> Result<Self, GateError> {
        let forbidden = policy.compile()?;
        Ok(Self { policy, forbidden })
    }

    pub fn policy(&self) -> &DiffPolicy {
        &self.policy
    }

    /// Check a parsed diff against the policy.
    ///
    /// An empty or whitespace-only diff combined with a completion claim is
    /// always a violation, whatever the policy says.
    pub fn validate(&self, diff: &ParsedDiff, completion_claimed: bool) -> DiffValidationResult {
        let mut violations = Vec::new();

        if completion_claimed && (diff.is_empty() || diff.is_whitespace_only()) {
            let what = if diff.is_empty() {
                "the diff is empty"
            } else {
                "the diff only changes whitespace"
            };
            violations.push(DiffViolation {
                rule: ViolationRule::UnsubstantiatedCompletion,
                path: None,
                message: format!("completion claimed but {what}"),
            });
        } else if self.policy.require_changes && diff.is_empty() {
            violations.push(DiffViolation {
                rule: ViolationRule::NoChanges,
                path: None,
                message: "no changes found".to_string(),
            });
        }

        violations.extend(rules::forbidden_path_violations(diff, &self.forbidden));
        if self.policy.protect_test_files {
            violations.extend(rules::deleted_test_violations(diff));
        }

        DiffValidationResult {
            is_valid: violations.is_empty(),
            violations,
            stats: DiffStats {
                files: diff.paths(),
                added: diff.added(),
                removed: diff.removed(),
                substantive_lines: diff.substantive_lines(),
            },
            warnings: rules::stub_warnings(diff),
            snippet: snippet(diff),
        }
    }
}

fn snippet(diff: &ParsedDiff) -> String {
    let mut lines = Vec::new();
    'files: for file in &diff.files {
        lines.push(format!("## {}", file.path));
        for line in &file.removed_lines {
            if lines.len() >= SNIPPET_MAX_LINES {
                break 'files;
            }
            lines.push(format!("-{line}"));
        }
        for line in &file.added_lines {
            if lines.len() >= SNIPPET_MAX_LINES {
                break 'files;
            }
            lines.push(format!("+{line}"));
        }
    }
    crate::verify::functional::http::truncate(&lines.join("\n"), SNIPPET_MAX_BYTES)
}

/// Read the diff text a task refers to.
pub fn load_diff(
    reference: &DiffReference,
    working_dir: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, GateError> {
    match reference {
        DiffReference::Inline { text } => Ok(text.clone()),
        DiffReference::File { path } => {
            let path = working_dir.join(path);
            std::fs::read_to_string(&path).map_err(|e| {
                GateError::Environment(format!("cannot read diff file {}: {e}", path.display()))
            })
        }
        DiffReference::Git { base, head } => {
            let mut command = format!(
                "git --no-pager diff --no-color --no-ext-diff {}",
                escape(base.as_str().into())
            );
            if let Some(head) = head {
                command.push(' ');
                command.push_str(&escape(head.as_str().into()));
            }

            let outcome = run_shell_command(&command, Some(working_dir), timeout, cancel)
                .map_err(|e| GateError::Execution(format!("{e:#}")))?;
            if outcome.cancelled {
                return Err(GateError::Cancelled);
            }
            if outcome.timed_out {
                return Err(GateError::Timeout(timeout.as_secs()));
            }
            if !outcome.success() {
                return Err(GateError::Execution(format!(
                    "{command} failed: {}",
                    outcome.error_excerpt(5)
                )));
            }
            Ok(outcome.stdout)
        }
    }
}
