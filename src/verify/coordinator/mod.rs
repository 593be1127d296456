//! Quality-gates coordinator
//!
//! Drives one task through the pipeline:
//! `Init -> Preflight -> Verification -> SuccessCriteria -> TruthEnforcement`
//! and always ends in exactly one terminal state.
//!
//! The test, functional and diff gates run concurrently, each in its own
//! retry loop on a scoped thread. A retry re-runs only the failed gate and
//! appends a new `GateResult`; earlier attempts and their evidence stay in
//! the result.

#[cfg(test)]
mod tests;

use chrono::Utc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::config::Config;
use crate::error::GateError;
use crate::fs::evidence_store::EvidenceStore;
use crate::models::evidence::{CommandOutput, EvidencePayload};
use crate::models::failure::{FailureClass, FailureReport};
use crate::models::gate::{GateKind, GateResult, QualityGateResult};
use crate::models::pipeline::PipelineState;
use crate::models::task::{RetryPolicy, TaskDescriptor};
use crate::process::CancellationToken;
use crate::verify::context::CommandContext;
use crate::verify::criteria::{CriterionEvaluation, StrategyRegistry, SuccessCriteriaVerifier};
use crate::verify::diff::{load_diff, parse_unified_diff, DiffValidator};
use crate::verify::evidence::EvidenceCollector;
use crate::verify::failure::VerificationFailureHandler;
use crate::verify::functional::FunctionalVerifier;
use crate::verify::preflight::PreFlightChecker;
use crate::verify::test_execution::TestExecutionValidator;
use crate::verify::truth::{parse_claims, Claim, TruthEnforcer, TruthReport};

/// Attempts of one gate and the failure decisions taken between them
#[derive(Debug, Default)]
struct GateRun {
    results: Vec<GateResult>,
    failures: Vec<FailureReport>,
}

impl GateRun {
    fn passed(&self) -> bool {
        self.results.last().is_some_and(GateResult::is_pass)
    }

    fn skipped(gate: GateKind, message: impl Into<String>) -> Self {
        Self {
            results: vec![GateResult::skipped(gate, message)],
            failures: Vec::new(),
        }
    }

    fn counts_as_passed(&self) -> bool {
        self.passed() || self.results.last().is_some_and(GateResult::is_skipped)
    }

    fn panicked(gate: GateKind) -> Self {
        Self {
            results: vec![GateResult::errored(
                gate,
                1,
                FailureClass::ExecutionError,
                Vec::new(),
                format!("{gate} gate panicked"),
            )],
            failures: Vec::new(),
        }
    }
}

/// Tracks the pipeline state and every transition taken
struct Pipeline {
    task_id: String,
    state: PipelineState,
    transitions: Vec<PipelineState>,
}

impl Pipeline {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: PipelineState::Init,
            transitions: vec![PipelineState::Init],
        }
    }

    fn advance(&mut self, next: PipelineState) {
        match self.state.try_transition(next) {
            Ok(state) => {
                tracing::info!(
                    task_id = %self.task_id,
                    from = %self.state,
                    to = %state,
                    "pipeline transition"
                );
                self.state = state;
                self.transitions.push(state);
            }
            Err(e) => tracing::error!(task_id = %self.task_id, "{e:#}"),
        }
    }
}

/// Collects everything a run produces before it is assembled into a
/// `QualityGateResult`
struct RunState {
    gate_results: Vec<GateResult>,
    failures: Vec<FailureReport>,
    criteria: Vec<CriterionEvaluation>,
    truth: Option<TruthReport>,
}

impl RunState {
    fn absorb(&mut self, run: GateRun) {
        self.gate_results.extend(run.results);
        self.failures.extend(run.failures);
    }

    fn skip_rest(&mut self, gates: &[GateKind], reason: &str) {
        for gate in gates {
            self.gate_results
                .push(GateResult::skipped(*gate, format!("not reached: {reason}")));
        }
    }
}

pub struct QualityGatesCoordinator {
    config: Config,
    store: Option<EvidenceStore>,
    functional: FunctionalVerifier,
    registry: StrategyRegistry,
    handler: VerificationFailureHandler,
}

impl QualityGatesCoordinator {
    pub fn new(config: Config) -> Self {
        let functional = FunctionalVerifier::from_config(&config);
        Self {
            config,
            store: None,
            functional,
            registry: StrategyRegistry::default(),
            handler: VerificationFailureHandler::new(),
        }
    }

    /// Persist evidence to a durable store as it is collected
    pub fn with_store(mut self, store: EvidenceStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_functional_verifier(mut self, verifier: FunctionalVerifier) -> Self {
        self.functional = verifier;
        self
    }

    pub fn with_registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn run(&self, task: &TaskDescriptor) -> QualityGateResult {
        self.run_with_cancel(task, &CancellationToken::new())
    }

    /// Run the pipeline. Never fails: every problem ends up in the result.
    pub fn run_with_cancel(
        &self,
        task: &TaskDescriptor,
        cancel: &CancellationToken,
    ) -> QualityGateResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(task_id = %task.task_id, %run_id, "quality gates started");

        let mut collector = EvidenceCollector::new(task.task_id.clone());
        if let Some(store) = &self.store {
            let next_sequence = store.next_sequence(&task.task_id).unwrap_or_else(|e| {
                tracing::warn!(task_id = %task.task_id, "cannot read evidence store: {e:#}");
                0
            });
            collector = collector
                .with_store(store.clone())
                .starting_at(next_sequence);
        }

        let mut pipeline = Pipeline::new(&task.task_id);
        let mut state = RunState {
            gate_results: Vec::new(),
            failures: Vec::new(),
            criteria: Vec::new(),
            truth: None,
        };

        self.drive(task, cancel, &collector, &mut pipeline, &mut state);

        let passed = pipeline.state == PipelineState::Passed;
        tracing::info!(
            task_id = %task.task_id,
            %run_id,
            state = %pipeline.state,
            passed,
            "quality gates finished"
        );

        QualityGateResult {
            run_id,
            task_id: task.task_id.clone(),
            state: pipeline.state,
            passed,
            gate_results: state.gate_results,
            evidence: collector.get(&task.task_id),
            failures: state.failures,
            criteria: state.criteria,
            truth: state.truth,
            transitions: pipeline.transitions,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn drive(
        &self,
        task: &TaskDescriptor,
        cancel: &CancellationToken,
        collector: &EvidenceCollector,
        pipeline: &mut Pipeline,
        state: &mut RunState,
    ) {
        const AFTER_PREFLIGHT: [GateKind; 5] = [
            GateKind::TestExecution,
            GateKind::Functional,
            GateKind::Diff,
            GateKind::SuccessCriteria,
            GateKind::TruthEnforcement,
        ];

        pipeline.advance(PipelineState::Preflight);
        let preflight = self.preflight(task, collector);
        let ready = preflight.passed();
        state.absorb(preflight);
        if !ready {
            state.skip_rest(&AFTER_PREFLIGHT, "preflight failed");
            pipeline.advance(PipelineState::Aborted);
            return;
        }

        let check_names: Vec<String> = task
            .functional_checks
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let claims = parse_claims(&task.claims, &check_names);

        pipeline.advance(PipelineState::Verification);
        let [tests, functional, diff] = self.verification(task, &claims, cancel, collector);
        let verified =
            tests.counts_as_passed() && functional.counts_as_passed() && diff.counts_as_passed();
        state.absorb(tests);
        state.absorb(functional);
        state.absorb(diff);
        if !verified {
            state.skip_rest(
                &[GateKind::SuccessCriteria, GateKind::TruthEnforcement],
                "verification failed",
            );
            pipeline.advance(PipelineState::Failed);
            return;
        }

        pipeline.advance(PipelineState::SuccessCriteria);
        let evidence = collector.get(&task.task_id);
        let criteria = if task.success_criteria.is_empty() {
            GateRun::skipped(GateKind::SuccessCriteria, "no success criteria declared")
        } else {
            let verifier = SuccessCriteriaVerifier::new(self.registry.clone());
            let evaluations = verifier.evaluate(&task.success_criteria, &evidence);
            let result = SuccessCriteriaVerifier::gate_result(&evaluations, 1);
            state.criteria = evaluations;
            self.single_attempt(task, result)
        };
        let criteria_ok = criteria.counts_as_passed();
        state.absorb(criteria);
        if !criteria_ok {
            state.skip_rest(&[GateKind::TruthEnforcement], "success criteria failed");
            pipeline.advance(PipelineState::Failed);
            return;
        }

        pipeline.advance(PipelineState::TruthEnforcement);
        let report = TruthEnforcer::new().enforce(&claims, &evidence);
        let truth = self.single_attempt(task, report.gate_result(1));
        let truth_ok = truth.passed();
        state.truth = Some(report);
        state.absorb(truth);

        pipeline.advance(if truth_ok {
            PipelineState::Passed
        } else {
            PipelineState::Failed
        });
    }

    fn preflight(&self, task: &TaskDescriptor, collector: &EvidenceCollector) -> GateRun {
        let gate = GateKind::Preflight;
        let started = Instant::now();
        let check = PreFlightChecker::new(self.config.timeouts.preflight())
            .check(task, &task.environment);

        for warning in &check.warnings {
            tracing::warn!(task_id = %task.task_id, "preflight: {warning}");
        }

        let payload = EvidencePayload::CommandOutput(CommandOutput {
            command: "preflight".to_string(),
            exit_code: Some(if check.ready { 0 } else { 1 }),
            stdout: check.report(),
            stderr: String::new(),
            timed_out: false,
            passed: None,
            failed: None,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });

        let result = match collector.collect(gate, 1, payload) {
            Err(e) => store_failure(gate, 1, &e),
            Ok(evidence) if check.ready => GateResult::passed(
                gate,
                1,
                vec![evidence.id().to_string()],
                "environment ready",
            ),
            Ok(evidence) => {
                let messages: Vec<&str> = check
                    .blocking_issues
                    .iter()
                    .map(|i| i.message.as_str())
                    .collect();
                GateResult::errored(
                    gate,
                    1,
                    check
                        .classification()
                        .unwrap_or(FailureClass::EnvironmentError),
                    vec![evidence.id().to_string()],
                    messages.join("; "),
                )
            }
        };

        self.single_attempt(task, result.with_duration(started.elapsed()))
    }

    /// Run the test, functional and diff gates concurrently
    fn verification(
        &self,
        task: &TaskDescriptor,
        claims: &[Claim],
        cancel: &CancellationToken,
        collector: &EvidenceCollector,
    ) -> [GateRun; 3] {
        let ctx = CommandContext::new(&task.task_id, &task.working_dir);
        let policy = &task.retry_policy;
        let completion_claimed = claims.iter().any(Claim::asserts_completion);

        let test_command = ctx.expand(&task.test_command);
        let unresolved = ctx.find_unresolved(&test_command);
        if !unresolved.is_empty() {
            tracing::warn!(
                task_id = %task.task_id,
                variables = ?unresolved,
                "test command has unresolved variables"
            );
        }

        let validator = TestExecutionValidator::new(self.config.timeouts.test());
        let diff_validator = DiffValidator::new(self.config.diff.clone());

        thread::scope(|s| {
            let tests = s.spawn(|| {
                self.retry_loop(task, GateKind::TestExecution, policy, cancel, |attempt| {
                    let execution = validator.execute(&test_command, &task.working_dir, cancel);
                    match collector.collect(GateKind::TestExecution, attempt, execution.to_payload())
                    {
                        Ok(evidence) => {
                            execution.gate_result(attempt, vec![evidence.id().to_string()])
                        }
                        Err(e) => store_failure(GateKind::TestExecution, attempt, &e),
                    }
                })
            });

            let functional = s.spawn(|| {
                if task.functional_checks.is_empty() {
                    return GateRun::skipped(GateKind::Functional, "no functional checks declared");
                }
                self.retry_loop(task, GateKind::Functional, policy, cancel, |attempt| {
                    let result = self.functional.run_checks(
                        &task.functional_checks,
                        &ctx,
                        &task.working_dir,
                        cancel,
                    );
                    let mut ids = Vec::with_capacity(result.outcomes.len());
                    for outcome in &result.outcomes {
                        match collector.collect(GateKind::Functional, attempt, outcome.payload.clone())
                        {
                            Ok(evidence) => ids.push(evidence.id().to_string()),
                            Err(e) => return store_failure(GateKind::Functional, attempt, &e),
                        }
                    }
                    result.gate_result(attempt, ids)
                })
            });

            let diff = s.spawn(|| {
                self.retry_loop(task, GateKind::Diff, policy, cancel, |attempt| {
                    let validator = match &diff_validator {
                        Ok(validator) => validator,
                        Err(e) => {
                            return GateResult::errored(
                                GateKind::Diff,
                                attempt,
                                e.class(),
                                Vec::new(),
                                format!("{e}"),
                            )
                        }
                    };
                    let text = match load_diff(
                        &task.diff_reference,
                        &task.working_dir,
                        self.config.timeouts.diff(),
                        cancel,
                    ) {
                        Ok(text) => text,
                        Err(e) => {
                            return GateResult::errored(
                                GateKind::Diff,
                                attempt,
                                e.class(),
                                Vec::new(),
                                format!("cannot load {}: {e}", task.diff_reference),
                            )
                        }
                    };

                    let validation = validator.validate(&parse_unified_diff(&text), completion_claimed);
                    for warning in &validation.warnings {
                        tracing::warn!(task_id = %task.task_id, "diff: {warning}");
                    }
                    match collector.collect(GateKind::Diff, attempt, validation.to_payload()) {
                        Ok(evidence) => {
                            validation.gate_result(attempt, vec![evidence.id().to_string()])
                        }
                        Err(e) => store_failure(GateKind::Diff, attempt, &e),
                    }
                })
            });

            [
                tests
                    .join()
                    .unwrap_or_else(|_| GateRun::panicked(GateKind::TestExecution)),
                functional
                    .join()
                    .unwrap_or_else(|_| GateRun::panicked(GateKind::Functional)),
                diff.join()
                    .unwrap_or_else(|_| GateRun::panicked(GateKind::Diff)),
            ]
        })
    }

    /// Run attempts of one gate until it passes or the failure handler stops it.
    fn retry_loop<F>(
        &self,
        task: &TaskDescriptor,
        gate: GateKind,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> GateRun
    where
        F: FnMut(u32) -> GateResult,
    {
        let mut run = GateRun::default();
        let mut retry_count = 0;

        loop {
            let attempt = retry_count + 1;
            tracing::info!(task_id = %task.task_id, %gate, attempt, "gate started");
            let started = Instant::now();
            let result = attempt_fn(attempt).with_duration(started.elapsed());
            log_result(&task.task_id, &result);

            let passed = result.is_pass();
            let report = (!passed).then(|| self.handler.on_failure(&result, policy, retry_count));
            run.results.push(result);
            let Some(mut report) = report else {
                return run;
            };

            if cancel.is_cancelled() {
                report = report.cancelled();
            }
            if !report.will_retry() {
                run.failures.push(report);
                return run;
            }

            let delay = Duration::from_millis(report.backoff_ms.unwrap_or(0));
            if !cancel.sleep(delay) {
                run.failures.push(report.cancelled());
                return run;
            }
            run.failures.push(report);
            retry_count += 1;
        }
    }

    /// Record a gate that is attempted exactly once
    fn single_attempt(&self, task: &TaskDescriptor, result: GateResult) -> GateRun {
        log_result(&task.task_id, &result);
        let mut run = GateRun::default();
        if !result.is_pass() && !result.is_skipped() {
            run.failures
                .push(self.handler.on_failure(&result, &task.retry_policy, 0));
        }
        run.results.push(result);
        run
    }
}

fn store_failure(gate: GateKind, attempt: u32, error: &GateError) -> GateResult {
    GateResult::errored(gate, attempt, error.class(), Vec::new(), error.to_string())
}

fn log_result(task_id: &str, result: &GateResult) {
    if result.is_pass() || result.is_skipped() {
        tracing::info!(
            task_id,
            gate = %result.gate,
            attempt = result.attempt,
            status = %result.status,
            duration_ms = result.duration_ms,
            "{}",
            result.message
        );
    } else {
        tracing::warn!(
            task_id,
            gate = %result.gate,
            attempt = result.attempt,
            status = %result.status,
            class = ?result.classification,
            "{}",
            result.message
        );
    }
}
