//! Test execution gate
//!
//! Runs the task's test command through `sh -c` under a timeout and decides
//! pass/fail from both the exit code and the runner's own summary. A zero
//! exit with reported failures is a failure.

pub mod parser;

use std::path::Path;
use std::time::Duration;

use crate::models::evidence::{CommandOutput, EvidencePayload};
use crate::models::failure::FailureClass;
use crate::models::gate::{GateKind, GateResult};
use crate::process::{run_shell_command, CancellationToken};

pub use parser::{parse_test_counts, TestCounts, TestFormat};

#[derive(Debug, Clone)]
pub struct TestExecutionResult {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub parsed_pass_count: Option<u32>,
    pub parsed_fail_count: Option<u32>,
    pub format: Option<TestFormat>,
    pub duration: Duration,
    pub timed_out: bool,
    pub cancelled: bool,
    /// The command could not be started at all
    pub spawn_error: Option<String>,
}

impl TestExecutionResult {
    /// The command completed, exited 0 and reported no failures
    pub fn succeeded(&self) -> bool {
        self.completed() && self.exit_code == Some(0) && self.parsed_fail_count.unwrap_or(0) == 0
    }

    fn completed(&self) -> bool {
        !self.timed_out && !self.cancelled && self.spawn_error.is_none()
    }

    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn to_payload(&self) -> EvidencePayload {
        let mut stderr = self.stderr.clone();
        if let Some(error) = &self.spawn_error {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(error);
        }
        EvidencePayload::CommandOutput(CommandOutput {
            command: self.command.clone(),
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr,
            timed_out: self.timed_out,
            passed: self.parsed_pass_count,
            failed: self.parsed_fail_count,
            duration_ms: self.duration_ms(),
        })
    }

    fn counts_label(&self) -> String {
        match (self.parsed_pass_count, self.parsed_fail_count) {
            (Some(p), Some(f)) => format!("{p} passed, {f} failed"),
            _ => "no test summary recognized".to_string(),
        }
    }

    /// Gate result of this attempt, referencing the evidence it produced
    pub fn gate_result(&self, attempt: u32, evidence_ids: Vec<String>) -> GateResult {
        let gate = GateKind::TestExecution;
        if let Some(error) = &self.spawn_error {
            return GateResult::errored(
                gate,
                attempt,
                FailureClass::ExecutionError,
                evidence_ids,
                format!("test command could not run: {error}"),
            );
        }
        if self.cancelled {
            return GateResult::errored(
                gate,
                attempt,
                FailureClass::ExecutionError,
                evidence_ids,
                "test command cancelled",
            );
        }
        if self.timed_out {
            return GateResult::errored(
                gate,
                attempt,
                FailureClass::ExecutionError,
                evidence_ids,
                format!(
                    "test command timed out after {:.1}s",
                    self.duration.as_secs_f64()
                ),
            );
        }

        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        if self.exit_code != Some(0) {
            return GateResult::failed(
                gate,
                attempt,
                FailureClass::AssertionFailure,
                evidence_ids,
                format!("test command exited with {code} ({})", self.counts_label()),
            );
        }
        if self.parsed_fail_count.unwrap_or(0) > 0 {
            return GateResult::failed(
                gate,
                attempt,
                FailureClass::AssertionFailure,
                evidence_ids,
                format!(
                    "test command exited 0 but reported failures ({})",
                    self.counts_label()
                ),
            );
        }
        GateResult::passed(
            gate,
            attempt,
            evidence_ids,
            format!("tests passed ({})", self.counts_label()),
        )
    }
}

#[derive(Debug, Clone)]
pub struct TestExecutionValidator {
    timeout: Duration,
}

impl TestExecutionValidator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run an already expanded test command in `working_dir`.
    ///
    /// Never fails: spawn errors are reported through `spawn_error`.
    pub fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        cancel: &CancellationToken,
    ) -> TestExecutionResult {
        tracing::debug!(command, dir = %working_dir.display(), "running test command");

        match run_shell_command(command, Some(working_dir), self.timeout, cancel) {
            Ok(outcome) => {
                let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
                let counts = if outcome.completed() {
                    parse_test_counts(&combined)
                } else {
                    TestCounts::default()
                };
                TestExecutionResult {
                    command: outcome.command,
                    exit_code: outcome.exit_code,
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                    parsed_pass_count: counts.passed,
                    parsed_fail_count: counts.failed,
                    format: counts.format,
                    duration: outcome.duration,
                    timed_out: outcome.timed_out,
                    cancelled: outcome.cancelled,
                    spawn_error: None,
                }
            }
            Err(e) => TestExecutionResult {
                command: command.to_string(),
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                parsed_pass_count: None,
                parsed_fail_count: None,
                format: None,
                duration: Duration::ZERO,
                timed_out: false,
                cancelled: false,
                spawn_error: Some(format!("{e:#}")),
            },
        }
    }
}
