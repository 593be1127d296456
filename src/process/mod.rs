//! Process utilities: bounded command execution and cancellation

pub mod cancel;
pub mod executor;

pub use cancel::{CancellationToken, POLL_INTERVAL};
pub use executor::{run_shell_command, CommandOutcome};
