pub mod evidence;
pub mod failure;
pub mod gate;
pub mod pipeline;
pub mod task;

pub use evidence::{Evidence, EvidenceKind, EvidencePayload};
pub use failure::{FailureAction, FailureClass, FailureReport};
pub use gate::{GateKind, GateResult, GateStatus, QualityGateResult};
pub use pipeline::PipelineState;
pub use task::{
    Backoff, BrowserCheck, DatabaseCheck, DiffReference, EnvironmentRequirements,
    ExpectedOutcome, FunctionalCheck, HttpCheck, MethodTag, RetryPolicy, SuccessCriterion,
    TaskDescriptor,
};
