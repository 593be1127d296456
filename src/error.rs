//! Typed errors raised inside gates
//!
//! Gates never let these escape the coordinator: each variant maps onto a
//! `FailureClass` and is captured into a `GateResult`.

use thiserror::Error;

use crate::models::failure::FailureClass;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid definition: {0}")]
    Configuration(String),
    #[error("environment not ready: {0}")]
    Environment(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("cancelled")]
    Cancelled,
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("evidence store unavailable: {0}")]
    Store(String),
}

impl GateError {
    pub fn class(&self) -> FailureClass {
        match self {
            GateError::Configuration(_) => FailureClass::ConfigurationError,
            GateError::Environment(_) | GateError::Store(_) => FailureClass::EnvironmentError,
            GateError::Execution(_) | GateError::Timeout(_) | GateError::Cancelled => {
                FailureClass::ExecutionError
            }
            GateError::Integrity(_) => FailureClass::IntegrityViolation,
        }
    }
}
