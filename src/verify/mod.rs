pub mod context;
pub mod coordinator;
pub mod criteria;
pub mod diff;
pub mod evidence;
pub mod failure;
pub mod functional;
pub mod preflight;
pub mod test_execution;
pub mod truth;

pub use context::CommandContext;
pub use coordinator::QualityGatesCoordinator;
pub use criteria::{
    CriterionEvaluation, CriterionStatus, Strategy, StrategyRegistry, SuccessCriteriaVerifier,
};
pub use diff::{load_diff, parse_unified_diff, DiffPolicy, DiffValidationResult, DiffValidator};
pub use evidence::EvidenceCollector;
pub use failure::{calculate_backoff, VerificationFailureHandler};
pub use functional::{
    BrowserDriver, CheckOutcome, DatabaseClient, FunctionalVerificationResult, FunctionalVerifier,
};
pub use preflight::{PreFlightCheckResult, PreFlightChecker};
pub use test_execution::{TestExecutionResult, TestExecutionValidator};
pub use truth::{parse_claims, Claim, ClaimKind, TruthEnforcer, TruthReport};
