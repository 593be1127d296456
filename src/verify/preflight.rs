//! Readiness checks run before any other gate
//!
//! The checker only inspects; it never starts services or fixes the
//! environment. A not-ready result short-circuits the pipeline.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::context::CommandContext;
use crate::models::failure::FailureClass;
use crate::models::task::{EnvironmentRequirements, TaskDescriptor};
use crate::task::validation::validate;

/// Words that are resolved by `sh` itself rather than looked up on PATH
const SHELL_BUILTINS: &[&str] = &[
    "!", ".", ":", "[", "alias", "case", "cd", "command", "echo", "eval", "exec", "exit",
    "export", "false", "for", "if", "printf", "pwd", "read", "set", "shift", "source", "test",
    "trap", "true", "type", "ulimit", "umask", "unset", "until", "wait", "while",
];

/// A problem that blocks the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightIssue {
    pub class: FailureClass,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreFlightCheckResult {
    pub ready: bool,
    pub blocking_issues: Vec<PreflightIssue>,
    pub warnings: Vec<String>,
    /// Human readable record of every check performed
    pub checked: Vec<String>,
}

impl PreFlightCheckResult {
    /// Class of the run's failure: configuration problems win over
    /// environment problems.
    pub fn classification(&self) -> Option<FailureClass> {
        if self.ready {
            return None;
        }
        if self
            .blocking_issues
            .iter()
            .any(|i| i.class == FailureClass::ConfigurationError)
        {
            Some(FailureClass::ConfigurationError)
        } else {
            Some(FailureClass::EnvironmentError)
        }
    }

    /// Report text stored as preflight evidence
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        for line in &self.checked {
            lines.push(format!("ok: {line}"));
        }
        for issue in &self.blocking_issues {
            lines.push(format!("blocking ({}): {}", issue.class, issue.message));
        }
        for warning in &self.warnings {
            lines.push(format!("warning: {warning}"));
        }
        lines.join("\n")
    }

    fn block(&mut self, class: FailureClass, message: impl Into<String>) {
        self.blocking_issues.push(PreflightIssue {
            class,
            message: message.into(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct PreFlightChecker {
    /// Connect timeout for each required service
    timeout: Duration,
}

impl PreFlightChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn check(
        &self,
        task: &TaskDescriptor,
        environment: &EnvironmentRequirements,
    ) -> PreFlightCheckResult {
        let mut result = PreFlightCheckResult::default();

        match validate(task) {
            Ok(()) => result.checked.push("task descriptor is well formed".to_string()),
            Err(errors) => {
                for error in errors {
                    result.block(FailureClass::ConfigurationError, error.to_string());
                }
            }
        }

        let working_dir = task.working_dir.as_path();
        if !working_dir.is_dir() {
            result.block(
                FailureClass::EnvironmentError,
                format!("working directory does not exist: {}", working_dir.display()),
            );
            // Nothing else can be resolved relative to a missing directory
            result.ready = false;
            return result;
        }
        result
            .checked
            .push(format!("working directory {}", working_dir.display()));

        for file in &environment.files {
            let path = working_dir.join(file);
            if path.exists() {
                result.checked.push(format!("file {}", file.display()));
            } else {
                result.block(
                    FailureClass::EnvironmentError,
                    format!("required file missing: {}", file.display()),
                );
            }
        }

        for command in &environment.commands {
            match resolve_program(command, working_dir) {
                Some(path) => result
                    .checked
                    .push(format!("command {command} -> {}", path.display())),
                None => result.block(
                    FailureClass::EnvironmentError,
                    format!("required command not found on PATH: {command}"),
                ),
            }
        }

        for service in &environment.services {
            match self.probe_service(service) {
                Ok(()) => result.checked.push(format!("service {service}")),
                Err(e) => result.block(
                    FailureClass::EnvironmentError,
                    format!("required service {service} unreachable: {e}"),
                ),
            }
        }

        for var in &environment.env_vars {
            if std::env::var_os(var).is_some() {
                result.checked.push(format!("env {var}"));
            } else {
                result.block(
                    FailureClass::EnvironmentError,
                    format!("required environment variable not set: {var}"),
                );
            }
        }

        let ctx = CommandContext::new(&task.task_id, working_dir);
        let command = ctx.expand(&task.test_command);
        match test_program(&command) {
            TestProgram::Builtin(word) => result
                .checked
                .push(format!("test command uses shell builtin {word}")),
            TestProgram::Unknown => result.warnings.push(format!(
                "cannot determine the program run by test command: {command}"
            )),
            TestProgram::Program(program) => match resolve_program(&program, working_dir) {
                Some(path) => result
                    .checked
                    .push(format!("test program {program} -> {}", path.display())),
                None => result.block(
                    FailureClass::EnvironmentError,
                    format!("test command program not found: {program}"),
                ),
            },
        }

        result.ready = result.blocking_issues.is_empty();
        result
    }

    fn probe_service(&self, service: &str) -> Result<(), String> {
        let addrs: Vec<_> = service
            .to_socket_addrs()
            .map_err(|e| format!("cannot resolve: {e}"))?
            .collect();
        if addrs.is_empty() {
            return Err("no addresses".to_string());
        }

        let mut last_error = String::new();
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return Ok(()),
                Err(e) => last_error = e.to_string(),
            }
        }
        Err(last_error)
    }
}

fn resolve_program(program: &str, working_dir: &Path) -> Option<std::path::PathBuf> {
    which::which_in(program, std::env::var_os("PATH"), working_dir).ok()
}

#[derive(Debug, PartialEq, Eq)]
enum TestProgram {
    Program(String),
    Builtin(String),
    Unknown,
}

/// First program word of a shell command, skipping `VAR=value` prefixes
fn test_program(command: &str) -> TestProgram {
    let word = command
        .split_whitespace()
        .find(|w| !is_assignment(w));

    let Some(word) = word else {
        return TestProgram::Unknown;
    };
    if SHELL_BUILTINS.contains(&word) {
        return TestProgram::Builtin(word.to_string());
    }
    if word
        .chars()
        .any(|c| matches!(c, '$' | '`' | '(' | ')' | '{' | '}' | '\'' | '"' | ';' | '|' | '&'))
    {
        return TestProgram::Unknown;
    }
    TestProgram::Program(word.to_string())
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::net::TcpListener;

    fn task_in(dir: &Path, command: &str) -> TaskDescriptor {
        TaskDescriptor::new("task-1", command).with_working_dir(dir)
    }

    fn checker() -> PreFlightChecker {
        PreFlightChecker::new(Duration::from_secs(1))
    }

    #[test]
    fn test_ready_environment() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("setup.cfg"), "").unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let env = EnvironmentRequirements {
            files: vec!["setup.cfg".into()],
            commands: vec!["sh".to_string()],
            services: vec![listener.local_addr().unwrap().to_string()],
            env_vars: vec!["PATH".to_string()],
        };
        let task = task_in(temp.path(), "sh -c 'exit 0'");

        let result = checker().check(&task, &env);
        assert!(result.ready, "{:?}", result.blocking_issues);
        assert!(result.classification().is_none());
        assert!(result.report().contains("ok: service"));
    }

    #[test]
    fn test_missing_working_dir_blocks() {
        let task = task_in(Path::new("/definitely/not/here"), "true");
        let result = checker().check(&task, &EnvironmentRequirements::default());
        assert!(!result.ready);
        assert_eq!(
            result.classification(),
            Some(FailureClass::EnvironmentError)
        );
    }

    #[test]
    fn test_missing_file_and_command_block() {
        let temp = tempfile::tempdir().unwrap();
        let env = EnvironmentRequirements {
            files: vec!["missing.txt".into()],
            commands: vec!["no-such-tool-proofgate".to_string()],
            ..Default::default()
        };
        let result = checker().check(&task_in(temp.path(), "true"), &env);
        assert!(!result.ready);
        assert_eq!(result.blocking_issues.len(), 2);
    }

    #[test]
    fn test_unreachable_service_blocks() {
        let temp = tempfile::tempdir().unwrap();
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let env = EnvironmentRequirements {
            services: vec![addr.to_string()],
            ..Default::default()
        };
        let result = checker().check(&task_in(temp.path(), "true"), &env);
        assert!(!result.ready);
        assert!(result.blocking_issues[0].message.contains("unreachable"));
    }

    #[test]
    #[serial]
    fn test_env_var_requirement() {
        let temp = tempfile::tempdir().unwrap();
        let env = EnvironmentRequirements {
            env_vars: vec!["PROOFGATE_PREFLIGHT_TEST_VAR".to_string()],
            ..Default::default()
        };
        std::env::remove_var("PROOFGATE_PREFLIGHT_TEST_VAR");
        assert!(!checker().check(&task_in(temp.path(), "true"), &env).ready);

        std::env::set_var("PROOFGATE_PREFLIGHT_TEST_VAR", "1");
        assert!(checker().check(&task_in(temp.path(), "true"), &env).ready);
        std::env::remove_var("PROOFGATE_PREFLIGHT_TEST_VAR");
    }

    #[test]
    fn test_invalid_descriptor_is_configuration_error() {
        let temp = tempfile::tempdir().unwrap();
        let task = task_in(temp.path(), "   ");
        let result = checker().check(&task, &EnvironmentRequirements::default());
        assert!(!result.ready);
        assert_eq!(
            result.classification(),
            Some(FailureClass::ConfigurationError)
        );
    }

    #[test]
    fn test_missing_test_program_blocks() {
        let temp = tempfile::tempdir().unwrap();
        let task = task_in(temp.path(), "no-such-runner-proofgate --all");
        let result = checker().check(&task, &EnvironmentRequirements::default());
        assert!(!result.ready);
        assert!(result.blocking_issues[0].message.contains("no-such-runner"));
    }

    #[test]
    fn test_undeterminable_program_is_warning() {
        let temp = tempfile::tempdir().unwrap();
        let task = task_in(temp.path(), "$RUNNER --all");
        let result = checker().check(&task, &EnvironmentRequirements::default());
        assert!(result.ready);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_program_detection() {
        assert_eq!(
            test_program("RUST_LOG=debug cargo test"),
            TestProgram::Program("cargo".to_string())
        );
        assert_eq!(
            test_program("cd app && pytest"),
            TestProgram::Builtin("cd".to_string())
        );
        assert_eq!(test_program("$(which pytest)"), TestProgram::Unknown);
        assert_eq!(test_program(""), TestProgram::Unknown);
    }
}
