use serde::{Deserialize, Serialize};

use super::gate::GateKind;

/// Classification of a gate failure.
///
/// Different classes have different handling strategies:
/// - Transient failures (ExecutionError, AssertionFailure) may be retried per policy
/// - Definition and environment problems (ConfigurationError, EnvironmentError) are fatal
/// - Reporting-integrity problems (IntegrityViolation) are fatal and never retried
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    /// Malformed criterion or check definition
    ConfigurationError,

    /// Preflight found the environment not ready
    EnvironmentError,

    /// Process or network failure, including timeouts, while running a check
    ExecutionError,

    /// A check ran to completion and its outcome was false
    AssertionFailure,

    /// Truth-enforcement or diff-policy failure
    IntegrityViolation,
}

impl FailureClass {
    /// Whether a failure of this class can ever be fixed by repeating the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureClass::ExecutionError | FailureClass::AssertionFailure
        )
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureClass::ConfigurationError => "configuration-error",
            FailureClass::EnvironmentError => "environment-error",
            FailureClass::ExecutionError => "execution-error",
            FailureClass::AssertionFailure => "assertion-failure",
            FailureClass::IntegrityViolation => "integrity-violation",
        };
        write!(f, "{label}")
    }
}

/// What the coordinator should do after a gate failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    /// Run the same gate again after the backoff delay
    Retry,
    /// Retries are exhausted; surface to the caller
    Escalate,
    /// Fatal failure; stop without retrying
    Abort,
}

impl std::fmt::Display for FailureAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureAction::Retry => write!(f, "retry"),
            FailureAction::Escalate => write!(f, "escalate"),
            FailureAction::Abort => write!(f, "abort"),
        }
    }
}

/// Structured, user-visible description of a gate failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureReport {
    /// Gate that failed
    pub gate: GateKind,
    /// How the failure was classified
    pub classification: FailureClass,
    /// Number of retries already performed for this gate
    pub retry_count: u32,
    /// True when the failure must be handled by someone beyond automatic retry
    pub escalation: bool,
    /// Decision taken by the failure handler
    pub action: FailureAction,
    /// Evidence referenced by the failing attempt
    pub evidence_ids: Vec<String>,
    /// True when the gate was retryable but `max_retries` ran out
    pub retries_exhausted: bool,
    /// Delay before the next attempt, when `action` is retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    /// Message of the failing attempt
    pub message: String,
}

impl FailureReport {
    /// Whether another attempt of the gate follows this report.
    pub fn will_retry(&self) -> bool {
        self.action == FailureAction::Retry
    }

    /// Convert a pending retry into an abort because the run was cancelled.
    pub fn cancelled(mut self) -> Self {
        if self.action == FailureAction::Retry {
            self.action = FailureAction::Abort;
            self.backoff_ms = None;
            self.message = format!("{} (retry cancelled)", self.message);
        }
        self
    }

    /// One-line summary for terminal output
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {} -> {} (retries: {})",
            self.gate, self.classification, self.action, self.retry_count
        );
        if self.retries_exhausted {
            line.push_str(", retries exhausted");
        }
        line
    }
}
