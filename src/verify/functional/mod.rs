//! Functional verification against the running system
//!
//! Checks of one attempt run concurrently on scoped threads. Outcomes are
//! gathered after every check has returned and are reported in declaration
//! order, so evidence order never depends on thread scheduling.

pub mod browser;
pub mod database;
pub mod http;

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::config::{Config, TimeoutConfig};
use crate::models::evidence::{EvidencePayload, HttpResponse};
use crate::models::failure::FailureClass;
use crate::models::gate::{GateKind, GateResult};
use crate::models::task::FunctionalCheck;
use crate::process::CancellationToken;
use crate::verify::context::CommandContext;

pub use browser::{BrowserDriver, CommandBrowserDriver, PageCapture, UnconfiguredBrowser};
pub use database::{CommandDatabaseClient, DatabaseClient, QueryOutput, UnconfiguredDatabase};

/// Execution environment handed to drivers and clients
#[derive(Debug, Clone, Copy)]
pub struct CheckEnv<'a> {
    pub working_dir: &'a Path,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
}

/// Result of one check
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: String,
    pub kind: &'static str,
    pub success: bool,
    /// Set when the outcome could not be determined (connect failure,
    /// timeout, missing driver)
    pub error: Option<String>,
    pub message: String,
    pub payload: EvidencePayload,
}

impl CheckOutcome {
    pub fn classification(&self) -> Option<FailureClass> {
        if self.success {
            None
        } else if self.error.is_some() {
            Some(FailureClass::ExecutionError)
        } else {
            Some(FailureClass::AssertionFailure)
        }
    }
}

#[derive(Debug, Clone)]
pub struct FunctionalVerificationResult {
    /// One outcome per check, in declaration order
    pub outcomes: Vec<CheckOutcome>,
    pub all_passed: bool,
}

impl FunctionalVerificationResult {
    /// Gate result of this attempt.
    ///
    /// Any undetermined check makes the attempt an error; otherwise any
    /// failed check makes it a failure.
    pub fn gate_result(&self, attempt: u32, evidence_ids: Vec<String>) -> GateResult {
        let gate = GateKind::Functional;
        if self.all_passed {
            return GateResult::passed(
                gate,
                attempt,
                evidence_ids,
                format!("{} functional checks passed", self.outcomes.len()),
            );
        }

        let failing: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| format!("{}: {}", o.name, o.message))
            .collect();
        let message = failing.join("; ");

        if self.outcomes.iter().any(|o| o.error.is_some()) {
            GateResult::errored(
                gate,
                attempt,
                FailureClass::ExecutionError,
                evidence_ids,
                message,
            )
        } else {
            GateResult::failed(
                gate,
                attempt,
                FailureClass::AssertionFailure,
                evidence_ids,
                message,
            )
        }
    }
}

pub struct FunctionalVerifier {
    timeouts: TimeoutConfig,
    browser: Box<dyn BrowserDriver>,
    database: Box<dyn DatabaseClient>,
    artifact_dir: PathBuf,
}

impl FunctionalVerifier {
    /// Verifier with no browser driver or database client configured
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self {
            timeouts,
            browser: Box::new(UnconfiguredBrowser),
            database: Box::new(UnconfiguredDatabase),
            artifact_dir: std::env::temp_dir().join("proofgate"),
        }
    }

    /// Verifier using the command templates from `proofgate.toml`
    pub fn from_config(config: &Config) -> Self {
        let mut verifier = Self::new(config.timeouts.clone())
            .with_artifact_dir(config.store.dir.join("artifacts"));
        if let Some(template) = &config.browser.command {
            verifier = verifier.with_browser(Box::new(CommandBrowserDriver::new(template)));
        }
        if let Some(template) = &config.database.command {
            verifier = verifier.with_database(Box::new(CommandDatabaseClient::new(template)));
        }
        verifier
    }

    pub fn with_browser(mut self, driver: Box<dyn BrowserDriver>) -> Self {
        self.browser = driver;
        self
    }

    pub fn with_database(mut self, client: Box<dyn DatabaseClient>) -> Self {
        self.database = client;
        self
    }

    /// Directory screenshots are written to
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    fn timeout_for(&self, check: &FunctionalCheck) -> Duration {
        let default = match check {
            FunctionalCheck::Http(_) => self.timeouts.http_secs,
            FunctionalCheck::Browser(_) => self.timeouts.browser_secs,
            FunctionalCheck::Database(_) => self.timeouts.database_secs,
        };
        Duration::from_secs(check.timeout_secs().unwrap_or(default))
    }

    /// Run every check once.
    ///
    /// `${VAR}` placeholders in URLs and queries are expanded from `ctx`
    /// before execution.
    pub fn run_checks(
        &self,
        checks: &[FunctionalCheck],
        ctx: &CommandContext,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> FunctionalVerificationResult {
        let checks: Vec<FunctionalCheck> = checks.iter().map(|c| expand_check(c, ctx)).collect();

        let outcomes: Vec<CheckOutcome> = thread::scope(|s| {
            let handles: Vec<_> = checks
                .iter()
                .map(|check| {
                    let env = CheckEnv {
                        working_dir,
                        timeout: self.timeout_for(check),
                        cancel,
                    };
                    s.spawn(move || self.run_check(check, &env))
                })
                .collect();

            handles
                .into_iter()
                .zip(checks.iter())
                .map(|(handle, check)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| panicked_outcome(check))
                })
                .collect()
        });

        let all_passed = outcomes.iter().all(|o| o.success);
        FunctionalVerificationResult {
            outcomes,
            all_passed,
        }
    }

    fn run_check(&self, check: &FunctionalCheck, env: &CheckEnv<'_>) -> CheckOutcome {
        tracing::debug!(check = check.name(), kind = check.kind_label(), "running functional check");
        let outcome = match check {
            FunctionalCheck::Http(http) => http::run_http_check(http, env.timeout, env.cancel),
            FunctionalCheck::Browser(page) => {
                browser::run_browser_check(self.browser.as_ref(), page, &self.artifact_dir, env)
            }
            FunctionalCheck::Database(db) => {
                database::run_database_check(self.database.as_ref(), db, env)
            }
        };
        if !outcome.success {
            tracing::warn!(check = %outcome.name, message = %outcome.message, "functional check failed");
        }
        outcome
    }
}

fn expand_check(check: &FunctionalCheck, ctx: &CommandContext) -> FunctionalCheck {
    let mut check = check.clone();
    match &mut check {
        FunctionalCheck::Http(http) => {
            http.url = ctx.expand(&http.url);
            http.body = http.body.as_deref().map(|b| ctx.expand(b));
        }
        FunctionalCheck::Browser(page) => page.url = ctx.expand(&page.url),
        FunctionalCheck::Database(db) => {
            db.database = ctx.expand(&db.database);
            db.query = ctx.expand(&db.query);
        }
    }
    check
}

fn panicked_outcome(check: &FunctionalCheck) -> CheckOutcome {
    let error = format!("check '{}' panicked", check.name());
    CheckOutcome {
        name: check.name().to_string(),
        kind: check.kind_label(),
        success: false,
        error: Some(error.clone()),
        message: error.clone(),
        payload: EvidencePayload::HttpResponse(HttpResponse {
            check: check.name().to_string(),
            method: String::new(),
            url: String::new(),
            status: None,
            body: String::new(),
            error: Some(error),
            success: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::models::gate::GateStatus;
    use crate::models::task::{BrowserCheck, DatabaseCheck, HttpCheck};
    use std::net::TcpListener;

    struct SlowRows(Duration, &'static str);

    impl DatabaseClient for SlowRows {
        fn query(
            &self,
            _check: &DatabaseCheck,
            _env: &CheckEnv<'_>,
        ) -> Result<QueryOutput, GateError> {
            std::thread::sleep(self.0);
            Ok(QueryOutput {
                output: self.1.to_string(),
                rows: 1,
            })
        }
    }

    fn db_check(name: &str, contains: &str) -> FunctionalCheck {
        FunctionalCheck::Database(DatabaseCheck {
            name: name.to_string(),
            database: "${WORKING_DIR}/app.db".to_string(),
            query: "SELECT 1".to_string(),
            expect_rows: Some(1),
            expect_contains: Some(contains.to_string()),
            timeout_secs: None,
        })
    }

    fn verifier() -> FunctionalVerifier {
        FunctionalVerifier::new(TimeoutConfig::default())
    }

    #[test]
    fn test_outcomes_in_declaration_order() {
        let temp = tempfile::tempdir().unwrap();
        let verifier = verifier().with_database(Box::new(SlowRows(Duration::from_millis(50), "1")));
        let checks = vec![db_check("first", "1"), db_check("second", "1"), db_check("third", "1")];
        let ctx = CommandContext::new("t", temp.path());

        let result = verifier.run_checks(&checks, &ctx, temp.path(), &CancellationToken::new());
        let names: Vec<_> = result.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert!(result.all_passed);
        assert_eq!(
            result.gate_result(1, vec!["e".to_string()]).status,
            GateStatus::Pass
        );
    }

    #[test]
    fn test_assertion_failure_when_checks_ran() {
        let temp = tempfile::tempdir().unwrap();
        let verifier = verifier().with_database(Box::new(SlowRows(Duration::ZERO, "0")));
        let ctx = CommandContext::new("t", temp.path());

        let result = verifier.run_checks(
            &[db_check("rows", "1")],
            &ctx,
            temp.path(),
            &CancellationToken::new(),
        );
        let gate = result.gate_result(1, vec!["e".to_string()]);
        assert_eq!(gate.status, GateStatus::Fail);
        assert_eq!(gate.classification, Some(FailureClass::AssertionFailure));
    }

    #[test]
    fn test_unreachable_http_is_execution_error() {
        let temp = tempfile::tempdir().unwrap();
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let checks = vec![FunctionalCheck::Http(HttpCheck::get(
            "api",
            format!("http://{addr}/"),
        ))];
        let ctx = CommandContext::new("t", temp.path());

        let result = verifier().run_checks(&checks, &ctx, temp.path(), &CancellationToken::new());
        assert!(!result.all_passed);
        assert_eq!(
            result.outcomes[0].classification(),
            Some(FailureClass::ExecutionError)
        );
        let gate = result.gate_result(1, vec!["e".to_string()]);
        assert_eq!(gate.status, GateStatus::Error);
        assert_eq!(gate.classification, Some(FailureClass::ExecutionError));
    }

    #[test]
    fn test_browser_without_driver_is_error() {
        let temp = tempfile::tempdir().unwrap();
        let checks = vec![FunctionalCheck::Browser(BrowserCheck {
            name: "home".to_string(),
            url: "http://localhost/".to_string(),
            expect_text: None,
            timeout_secs: None,
        })];
        let ctx = CommandContext::new("t", temp.path());
        let result = verifier()
            .with_artifact_dir(temp.path())
            .run_checks(&checks, &ctx, temp.path(), &CancellationToken::new());
        assert!(result.outcomes[0].error.is_some());
    }

    #[test]
    fn test_placeholders_expanded() {
        let ctx = CommandContext::new("task-9", Path::new("/srv/app"));
        match expand_check(&db_check("rows", "1"), &ctx) {
            FunctionalCheck::Database(db) => assert_eq!(db.database, "/srv/app/app.db"),
            other => panic!("unexpected check: {other:?}"),
        }
    }

    #[test]
    fn test_per_check_timeout_override() {
        let mut check = HttpCheck::get("api", "http://localhost/");
        assert_eq!(
            verifier().timeout_for(&FunctionalCheck::Http(check.clone())),
            Duration::from_secs(5)
        );
        check.timeout_secs = Some(1);
        assert_eq!(
            verifier().timeout_for(&FunctionalCheck::Http(check)),
            Duration::from_secs(1)
        );
    }
}
