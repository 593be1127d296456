//! Failure handling: retry, escalate or abort
//!
//! A gate is retried only when all of these hold: its failure class is
//! transient, the gate kind is flaky, and the policy lists the gate as
//! retryable. Diff and truth-enforcement failures never qualify.

use std::time::Duration;

use crate::models::failure::{FailureAction, FailureClass, FailureReport};
use crate::models::gate::GateResult;
use crate::models::task::{Backoff, RetryPolicy};

/// Delay before retry number `retry` (1-based).
///
/// Linear: `base * retry`. Exponential: `base * 2^(retry-1)`. Both are
/// capped at `max_delay_ms`; retry 0 has no delay.
///
/// With base=1000ms, max=30000ms, exponential:
/// - Retry 1: 1s
/// - Retry 2: 2s
/// - Retry 3: 4s
/// - Retry 6+: 30s (capped)
pub fn calculate_backoff(retry: u32, policy: &RetryPolicy) -> Duration {
    if retry == 0 {
        return Duration::ZERO;
    }

    let multiplier = match policy.backoff {
        Backoff::Linear => u64::from(retry),
        Backoff::Exponential => 2u64.saturating_pow(retry - 1),
    };
    let delay_ms = policy
        .base_delay_ms
        .saturating_mul(multiplier)
        .min(policy.max_delay_ms);

    Duration::from_millis(delay_ms)
}

/// Whether a gate result may ever be retried under `policy`
pub fn is_retryable(result: &GateResult, policy: &RetryPolicy) -> bool {
    let Some(class) = result.failure_class() else {
        return false;
    };
    class.is_retryable()
        && result.gate.is_flaky()
        && policy.retryable_gate_kinds.contains(&result.gate)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerificationFailureHandler;

impl VerificationFailureHandler {
    pub fn new() -> Self {
        Self
    }

    /// Decide what happens after a failed or errored attempt.
    ///
    /// `retry_count` is the number of retries already performed for the
    /// gate, so the first failure is reported with `retry_count == 0`.
    pub fn on_failure(
        &self,
        result: &GateResult,
        policy: &RetryPolicy,
        retry_count: u32,
    ) -> FailureReport {
        let classification = result
            .failure_class()
            .unwrap_or(FailureClass::ExecutionError);

        let (action, escalation, retries_exhausted, backoff_ms) = if is_retryable(result, policy) {
            if retry_count < policy.max_retries {
                let delay = calculate_backoff(retry_count + 1, policy);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                (FailureAction::Retry, false, false, Some(delay_ms))
            } else {
                (FailureAction::Escalate, true, true, None)
            }
        } else {
            (FailureAction::Abort, false, false, None)
        };

        match action {
            FailureAction::Retry => tracing::info!(
                gate = %result.gate,
                class = %classification,
                retry = retry_count + 1,
                backoff_ms = backoff_ms.unwrap_or(0),
                "scheduling retry"
            ),
            FailureAction::Escalate => tracing::warn!(
                gate = %result.gate,
                class = %classification,
                retries = retry_count,
                "retries exhausted, escalating"
            ),
            FailureAction::Abort => tracing::info!(
                gate = %result.gate,
                class = %classification,
                "failure is not retryable"
            ),
        }

        FailureReport {
            gate: result.gate,
            classification,
            retry_count,
            escalation,
            action,
            evidence_ids: result.evidence_ids.clone(),
            retries_exhausted,
            backoff_ms,
            message: result.message.clone(),
        }
    }
}
