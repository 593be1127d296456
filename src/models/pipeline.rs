use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// State of a quality-gates run.
///
/// State machine transitions:
/// - `Init` -> `Preflight`
/// - `Preflight` -> `Verification` | `Aborted`
/// - `Verification` -> `SuccessCriteria` | `Failed` (test, functional and diff gates run here)
/// - `SuccessCriteria` -> `TruthEnforcement` | `Failed`
/// - `TruthEnforcement` -> `Passed` | `Failed`
/// - `Passed`, `Failed` and `Aborted` are terminal states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Preflight,
    Verification,
    SuccessCriteria,
    TruthEnforcement,
    Passed,
    Failed,
    Aborted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PipelineState::Init => "INIT",
            PipelineState::Preflight => "PREFLIGHT",
            PipelineState::Verification => "VERIFICATION",
            PipelineState::SuccessCriteria => "SUCCESS_CRITERIA",
            PipelineState::TruthEnforcement => "TRUTH_ENFORCEMENT",
            PipelineState::Passed => "PASSED",
            PipelineState::Failed => "FAILED",
            PipelineState::Aborted => "ABORTED",
        };
        write!(f, "{label}")
    }
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Passed | PipelineState::Failed | PipelineState::Aborted
        )
    }

    /// Check if transitioning from the current state to the new state is valid.
    ///
    /// Unlike stage statuses, staying in the same state is not a transition:
    /// every recorded step moves the pipeline forward.
    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        match self {
            PipelineState::Init => matches!(next, PipelineState::Preflight),
            PipelineState::Preflight => {
                matches!(next, PipelineState::Verification | PipelineState::Aborted)
            }
            PipelineState::Verification => {
                matches!(next, PipelineState::SuccessCriteria | PipelineState::Failed)
            }
            PipelineState::SuccessCriteria => {
                matches!(next, PipelineState::TruthEnforcement | PipelineState::Failed)
            }
            PipelineState::TruthEnforcement => {
                matches!(next, PipelineState::Passed | PipelineState::Failed)
            }
            PipelineState::Passed | PipelineState::Failed | PipelineState::Aborted => false,
        }
    }

    /// Attempt to transition to a new state, returning an error if invalid.
    pub fn try_transition(&self, next: PipelineState) -> Result<PipelineState> {
        if self.can_transition_to(&next) {
            Ok(next)
        } else {
            bail!("Invalid pipeline transition: {self} -> {next}")
        }
    }

    /// Returns the list of valid states this state can transition to.
    pub fn valid_transitions(&self) -> Vec<PipelineState> {
        match self {
            PipelineState::Init => vec![PipelineState::Preflight],
            PipelineState::Preflight => vec![PipelineState::Verification, PipelineState::Aborted],
            PipelineState::Verification => {
                vec![PipelineState::SuccessCriteria, PipelineState::Failed]
            }
            PipelineState::SuccessCriteria => {
                vec![PipelineState::TruthEnforcement, PipelineState::Failed]
            }
            PipelineState::TruthEnforcement => vec![PipelineState::Passed, PipelineState::Failed],
            PipelineState::Passed | PipelineState::Failed | PipelineState::Aborted => vec![],
        }
    }
}
