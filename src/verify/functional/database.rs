//! Database checks
//!
//! Queries go through a `DatabaseClient`. The default client runs a
//! configured command template and treats each non-empty stdout line as a row.

use shell_escape::escape;

use super::{CheckEnv, CheckOutcome};
use crate::error::GateError;
use crate::models::evidence::{DbQueryResult, EvidencePayload};
use crate::models::task::DatabaseCheck;
use crate::process::run_shell_command;

/// Query output kept as evidence
const MAX_OUTPUT_EVIDENCE: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub output: String,
    pub rows: usize,
}

pub trait DatabaseClient: Send + Sync {
    fn query(&self, check: &DatabaseCheck, env: &CheckEnv<'_>) -> Result<QueryOutput, GateError>;
}

/// Client backed by a shell command template with `{database}` and
/// `{query}` placeholders
#[derive(Debug, Clone)]
pub struct CommandDatabaseClient {
    template: String,
}

impl CommandDatabaseClient {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl DatabaseClient for CommandDatabaseClient {
    fn query(&self, check: &DatabaseCheck, env: &CheckEnv<'_>) -> Result<QueryOutput, GateError> {
        let command = self
            .template
            .replace("{database}", &escape(check.database.as_str().into()))
            .replace("{query}", &escape(check.query.as_str().into()));

        let outcome = run_shell_command(&command, Some(env.working_dir), env.timeout, env.cancel)
            .map_err(|e| GateError::Execution(format!("{e:#}")))?;
        if outcome.cancelled {
            return Err(GateError::Cancelled);
        }
        if outcome.timed_out {
            return Err(GateError::Timeout(env.timeout.as_secs()));
        }
        if !outcome.success() {
            return Err(GateError::Execution(format!(
                "database client failed: {}",
                outcome.error_excerpt(5)
            )));
        }

        let rows = outcome
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count();
        Ok(QueryOutput {
            output: outcome.stdout,
            rows,
        })
    }
}

/// Fallback when no client is configured
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredDatabase;

impl DatabaseClient for UnconfiguredDatabase {
    fn query(&self, _check: &DatabaseCheck, _env: &CheckEnv<'_>) -> Result<QueryOutput, GateError> {
        Err(GateError::Execution(
            "no database client configured ([database] command in proofgate.toml)".to_string(),
        ))
    }
}

pub fn run_database_check(
    client: &dyn DatabaseClient,
    check: &DatabaseCheck,
    env: &CheckEnv<'_>,
) -> CheckOutcome {
    let result = match client.query(check, env) {
        Ok(result) => result,
        Err(e) => {
            let error = e.to_string();
            return CheckOutcome {
                name: check.name.clone(),
                kind: "database",
                success: false,
                error: Some(error.clone()),
                message: error.clone(),
                payload: EvidencePayload::DbQueryResult(DbQueryResult {
                    check: check.name.clone(),
                    query: check.query.clone(),
                    output: String::new(),
                    row_count: None,
                    error: Some(error),
                    success: false,
                }),
            };
        }
    };

    let mut problems = Vec::new();
    if let Some(expected) = check.expect_rows {
        if result.rows != expected {
            problems.push(format!("{} rows, expected {expected}", result.rows));
        }
    }
    if let Some(needle) = &check.expect_contains {
        if !result.output.contains(needle.as_str()) {
            problems.push(format!("output does not contain '{needle}'"));
        }
    }

    let success = problems.is_empty();
    CheckOutcome {
        name: check.name.clone(),
        kind: "database",
        success,
        error: None,
        message: if success {
            format!("query returned {} rows", result.rows)
        } else {
            problems.join("; ")
        },
        payload: EvidencePayload::DbQueryResult(DbQueryResult {
            check: check.name.clone(),
            query: check.query.clone(),
            output: super::http::truncate(&result.output, MAX_OUTPUT_EVIDENCE),
            row_count: Some(result.rows),
            error: None,
            success,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CancellationToken;
    use std::time::Duration;

    fn check(expect_rows: Option<usize>, expect_contains: Option<&str>) -> DatabaseCheck {
        DatabaseCheck {
            name: "users".to_string(),
            database: "app.db".to_string(),
            query: "SELECT name FROM users;".to_string(),
            expect_rows,
            expect_contains: expect_contains.map(String::from),
            timeout_secs: None,
        }
    }

    /// Client that echoes canned rows
    struct FixedRows(&'static str);

    impl DatabaseClient for FixedRows {
        fn query(&self, _check: &DatabaseCheck, _env: &CheckEnv<'_>) -> Result<QueryOutput, GateError> {
            Ok(QueryOutput {
                output: self.0.to_string(),
                rows: self.0.lines().count(),
            })
        }
    }

    fn with_env<T>(f: impl FnOnce(&CheckEnv<'_>) -> T) -> T {
        let temp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let env = CheckEnv {
            working_dir: temp.path(),
            timeout: Duration::from_secs(10),
            cancel: &cancel,
        };
        f(&env)
    }

    #[test]
    fn test_row_count_and_contains() {
        let outcome = with_env(|env| {
            run_database_check(&FixedRows("alice\nbob"), &check(Some(2), Some("bob")), env)
        });
        assert!(outcome.success, "{}", outcome.message);
    }

    #[test]
    fn test_wrong_row_count_is_assertion() {
        let outcome =
            with_env(|env| run_database_check(&FixedRows("alice"), &check(Some(2), None), env));
        assert!(!outcome.success);
        assert!(outcome.error.is_none());
        assert!(outcome.message.contains("1 rows, expected 2"));
    }

    #[test]
    fn test_command_client_receives_escaped_arguments() {
        let client = CommandDatabaseClient::new("echo {database}; echo {query}");
        let outcome = with_env(|env| {
            run_database_check(&client, &check(Some(2), Some("SELECT name FROM users;")), env)
        });
        assert!(outcome.success, "{}", outcome.message);
    }

    #[test]
    fn test_failing_client_is_error() {
        let client = CommandDatabaseClient::new("echo 'no such table' >&2; exit 1");
        let outcome = with_env(|env| run_database_check(&client, &check(None, None), env));
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no such table"));
    }

    #[test]
    fn test_unconfigured_client_is_error() {
        let outcome =
            with_env(|env| run_database_check(&UnconfiguredDatabase, &check(None, None), env));
        assert!(outcome.error.unwrap().contains("no database client"));
    }
}
