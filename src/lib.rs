pub mod commands;
pub mod config;
pub mod error;
pub mod fs;
pub mod models;
pub mod process;
pub mod task;
pub mod validation;
pub mod verify;

pub use config::Config;
pub use error::GateError;
pub use models::{GateKind, GateResult, GateStatus, QualityGateResult, TaskDescriptor};
pub use verify::QualityGatesCoordinator;
