use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use super::gate::GateKind;

/// A task submitted for verification.
///
/// The descriptor is borrowed immutably for the whole coordinator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: String,
    /// Shell command that runs the task's tests
    pub test_command: String,
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
    #[serde(default)]
    pub functional_checks: Vec<FunctionalCheck>,
    #[serde(default)]
    pub diff_reference: DiffReference,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Completion claims made by the agent ("tests pass", "implemented X")
    #[serde(default)]
    pub claims: Vec<String>,
    /// Directory commands run in
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Requirements checked by preflight
    #[serde(default)]
    pub environment: EnvironmentRequirements,
}

fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}

impl TaskDescriptor {
    /// Create a descriptor with defaults for everything but the id and test command
    pub fn new(task_id: impl Into<String>, test_command: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            test_command: test_command.into(),
            success_criteria: Vec::new(),
            functional_checks: Vec::new(),
            diff_reference: DiffReference::default(),
            retry_policy: RetryPolicy::default(),
            claims: Vec::new(),
            working_dir: default_working_dir(),
            environment: EnvironmentRequirements::default(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_diff(mut self, diff: DiffReference) -> Self {
        self.diff_reference = diff;
        self
    }

    pub fn with_claim(mut self, claim: impl Into<String>) -> Self {
        self.claims.push(claim.into());
        self
    }

    pub fn with_criterion(mut self, criterion: SuccessCriterion) -> Self {
        self.success_criteria.push(criterion);
        self
    }

    pub fn with_check(mut self, check: FunctionalCheck) -> Self {
        self.functional_checks.push(check);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentRequirements) -> Self {
        self.environment = environment;
        self
    }
}

/// Where the code change under review comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiffReference {
    /// Unified diff text embedded in the descriptor
    Inline { text: String },
    /// Path to a patch file, relative to the working directory
    File { path: PathBuf },
    /// `git diff <base> [<head>]` in the working directory
    Git {
        base: String,
        #[serde(default)]
        head: Option<String>,
    },
}

impl Default for DiffReference {
    fn default() -> Self {
        DiffReference::Git {
            base: "HEAD".to_string(),
            head: None,
        }
    }
}

impl std::fmt::Display for DiffReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffReference::Inline { text } => write!(f, "inline ({} bytes)", text.len()),
            DiffReference::File { path } => write!(f, "file {}", path.display()),
            DiffReference::Git { base, head: None } => write!(f, "git diff {base}"),
            DiffReference::Git {
                base,
                head: Some(head),
            } => write!(f, "git diff {base} {head}"),
        }
    }
}

/// A declared success criterion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub description: String,
    /// Verification method tag, resolved through the strategy registry
    pub method: MethodTag,
    #[serde(default)]
    pub expected: ExpectedOutcome,
}

impl SuccessCriterion {
    pub fn new(description: impl Into<String>, method: MethodTag) -> Self {
        Self {
            description: description.into(),
            method,
            expected: ExpectedOutcome::default(),
        }
    }

    pub fn expecting(mut self, expected: ExpectedOutcome) -> Self {
        self.expected = expected;
        self
    }
}

/// Verification method tag of a criterion.
///
/// Unknown tags are kept verbatim so the verifier can report them as a
/// configuration defect instead of failing to parse the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MethodTag {
    TestBased,
    Functional,
    DiffBased,
    Unregistered(String),
}

impl From<String> for MethodTag {
    fn from(tag: String) -> Self {
        match tag.trim().to_lowercase().replace('-', "_").as_str() {
            "test" | "tests" | "test_based" => MethodTag::TestBased,
            "functional" | "http" | "browser" | "database" => MethodTag::Functional,
            "diff" | "diff_based" => MethodTag::DiffBased,
            _ => MethodTag::Unregistered(tag),
        }
    }
}

impl From<&str> for MethodTag {
    fn from(tag: &str) -> Self {
        MethodTag::from(tag.to_string())
    }
}

impl From<MethodTag> for String {
    fn from(tag: MethodTag) -> Self {
        tag.to_string()
    }
}

impl std::fmt::Display for MethodTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodTag::TestBased => write!(f, "test"),
            MethodTag::Functional => write!(f, "functional"),
            MethodTag::DiffBased => write!(f, "diff"),
            MethodTag::Unregistered(tag) => write!(f, "{tag}"),
        }
    }
}

/// Expected outcome of a criterion. Each strategy reads the fields it understands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedOutcome {
    /// Name of the functional check the criterion refers to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    /// Text that must appear in the relevant output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    /// Minimum number of passing tests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_passed: Option<u32>,
    /// Maximum number of failing tests (default 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_failed: Option<u32>,
    /// Expected HTTP status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Path (or glob) that must appear among changed files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A live check against the running system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionalCheck {
    Http(HttpCheck),
    Browser(BrowserCheck),
    Database(DatabaseCheck),
}

impl FunctionalCheck {
    pub fn name(&self) -> &str {
        match self {
            FunctionalCheck::Http(c) => &c.name,
            FunctionalCheck::Browser(c) => &c.name,
            FunctionalCheck::Database(c) => &c.name,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            FunctionalCheck::Http(_) => "http",
            FunctionalCheck::Browser(_) => "browser",
            FunctionalCheck::Database(_) => "database",
        }
    }

    /// Per-check timeout override
    pub fn timeout_secs(&self) -> Option<u64> {
        match self {
            FunctionalCheck::Http(c) => c.timeout_secs,
            FunctionalCheck::Browser(c) => c.timeout_secs,
            FunctionalCheck::Database(c) => c.timeout_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub name: String,
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Exact status expected; any 2xx when absent
    #[serde(default)]
    pub expected_status: Option<u16>,
    #[serde(default)]
    pub expect_body_contains: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_http_method() -> String {
    "GET".to_string()
}

impl HttpCheck {
    pub fn get(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            method: default_http_method(),
            headers: BTreeMap::new(),
            body: None,
            expected_status: None,
            expect_body_contains: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserCheck {
    pub name: String,
    pub url: String,
    /// Text the rendered page must contain
    #[serde(default)]
    pub expect_text: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCheck {
    pub name: String,
    /// Connection string or database path handed to the client
    pub database: String,
    pub query: String,
    #[serde(default)]
    pub expect_rows: Option<usize>,
    #[serde(default)]
    pub expect_contains: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Linear,
    #[default]
    Exponential,
}

/// Retry configuration for flaky gates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retryable_gate_kinds: BTreeSet<GateKind>,
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retryable_gate_kinds: [GateKind::TestExecution, GateKind::Functional]
                .into_iter()
                .collect(),
            backoff: Backoff::Exponential,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff, base_delay_ms: u64) -> Self {
        self.backoff = backoff;
        self.base_delay_ms = base_delay_ms;
        self
    }
}

/// What must be in place before any gate runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentRequirements {
    /// Files that must exist (relative to the working directory)
    pub files: Vec<PathBuf>,
    /// Programs that must resolve on PATH
    pub commands: Vec<String>,
    /// `host:port` endpoints that must accept a TCP connection
    pub services: Vec<String>,
    /// Environment variables that must be set
    pub env_vars: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_tag_aliases() {
        assert_eq!(MethodTag::from("test"), MethodTag::TestBased);
        assert_eq!(MethodTag::from("test-based"), MethodTag::TestBased);
        assert_eq!(MethodTag::from("HTTP"), MethodTag::Functional);
        assert_eq!(MethodTag::from("diff_based"), MethodTag::DiffBased);
        assert_eq!(
            MethodTag::from("manual-review"),
            MethodTag::Unregistered("manual-review".to_string())
        );
    }

    #[test]
    fn test_descriptor_from_yaml_with_defaults() {
        let yaml = r#"
task_id: add-login
test_command: pytest -q
claims:
  - "tests pass"
success_criteria:
  - description: login endpoint responds
    method: functional
    expected:
      check: login
      status: 200
functional_checks:
  - kind: http
    name: login
    url: http://localhost:8000/login
diff_reference:
  source: inline
  text: ""
"#;
        let task: TaskDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.task_id, "add-login");
        assert_eq!(task.working_dir, PathBuf::from("."));
        assert_eq!(task.retry_policy, RetryPolicy::default());
        assert_eq!(task.success_criteria[0].method, MethodTag::Functional);
        assert_eq!(task.success_criteria[0].expected.status, Some(200));
        match &task.functional_checks[0] {
            FunctionalCheck::Http(check) => {
                assert_eq!(check.method, "GET");
                assert_eq!(check.name, "login");
            }
            other => panic!("unexpected check: {other:?}"),
        }
        assert_eq!(
            task.diff_reference,
            DiffReference::Inline {
                text: String::new()
            }
        );
    }

    #[test]
    fn test_unknown_method_tag_survives_round_trip() {
        let criterion = SuccessCriterion::new("manual", MethodTag::from("eyeball"));
        let json = serde_json::to_string(&criterion).unwrap();
        assert!(json.contains("\"method\":\"eyeball\""));
        let back: SuccessCriterion = serde_json::from_str(&json).unwrap();
        assert_eq!(back.method, MethodTag::Unregistered("eyeball".to_string()));
    }

    #[test]
    fn test_default_retry_policy_covers_flaky_gates() {
        let policy = RetryPolicy::default();
        assert!(policy.retryable_gate_kinds.contains(&GateKind::TestExecution));
        assert!(policy.retryable_gate_kinds.contains(&GateKind::Functional));
        assert_eq!(policy.backoff, Backoff::Exponential);
    }

    #[test]
    fn test_retry_policy_accepts_gate_aliases() {
        let yaml = "retryable_gate_kinds: [test, Functional, truth_enforcement]\n";
        let policy: RetryPolicy = serde_yaml::from_str(yaml).unwrap();
        let kinds: Vec<GateKind> = policy.retryable_gate_kinds.into_iter().collect();
        assert_eq!(
            kinds,
            vec![
                GateKind::TestExecution,
                GateKind::Functional,
                GateKind::TruthEnforcement
            ]
        );

        let bad: Result<RetryPolicy, _> = serde_yaml::from_str("retryable_gate_kinds: [lint]\n");
        assert!(bad.is_err());
    }

    #[test]
    fn test_retry_policy_parses_gate_kinds() {
        let yaml = r#"
max_retries: 4
retryable_gate_kinds: [test-execution]
backoff: linear
"#;
        let policy: RetryPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.backoff, Backoff::Linear);
        assert_eq!(policy.retryable_gate_kinds.len(), 1);
        assert_eq!(policy.base_delay_ms, 1_000);
    }

    #[test]
    fn test_default_diff_reference_is_working_tree() {
        assert_eq!(DiffReference::default().to_string(), "git diff HEAD");
    }
}
