//! Task descriptor loading and validation
//!
//! Descriptors are YAML (or JSON, which YAML accepts) documents that
//! deserialize into `TaskDescriptor`.

pub mod parser;
pub mod validation;

pub use parser::{parse_task, parse_task_content};
pub use validation::{validate, warnings, ValidationError};
