//! Variable expansion for task commands, URLs and queries.
//!
//! Variables use shell-style syntax: `${VARIABLE_NAME}`.
//!
//! # Supported Variables
//!
//! - `${TASK_ID}` - The task identifier
//! - `${WORKING_DIR}` - The task working directory
//! - `${PROJECT_ROOT}` - Directory containing the project manifest (Cargo.toml, package.json, etc.)
//!
//! # Example
//!
//! ```yaml
//! test_command: "cd ${PROJECT_ROOT} && cargo test"
//! functional_checks:
//!   - kind: http
//!     name: health
//!     url: "http://localhost:8080/tasks/${TASK_ID}"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Variables available to one task run.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    variables: HashMap<String, String>,
}

impl CommandContext {
    /// Build the context for a task running in `working_dir`.
    ///
    /// `PROJECT_ROOT` is only set when a manifest is found.
    pub fn new(task_id: &str, working_dir: &Path) -> Self {
        let mut variables = HashMap::new();
        variables.insert("TASK_ID".into(), task_id.to_string());
        variables.insert("WORKING_DIR".into(), working_dir.display().to_string());
        if let Some(project_root) = find_project_root(working_dir) {
            variables.insert("PROJECT_ROOT".into(), project_root.display().to_string());
        }
        Self { variables }
    }

    pub fn set_variable(&mut self, key: &str, value: &str) {
        self.variables.insert(key.to_string(), value.to_string());
    }

    pub fn get_variable(&self, key: &str) -> Option<&str> {
        self.variables.get(key).map(String::as_str)
    }

    /// Expand all known variables. Unknown variables are left unchanged.
    pub fn expand(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (key, value) in &self.variables {
            result = result.replace(&format!("${{{key}}}"), value);
        }
        result
    }

    /// Names of `${...}` variables in `text` that have no value.
    pub fn find_unresolved(&self, text: &str) -> Vec<String> {
        let mut unresolved = Vec::new();
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '$' && chars.peek() == Some(&'{') {
                chars.next();
                let mut var_name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    var_name.push(c);
                }
                if !var_name.is_empty() && !self.variables.contains_key(&var_name) {
                    unresolved.push(var_name);
                }
            }
        }

        unresolved
    }
}

/// Find the directory holding a project manifest: `dir` itself, or one of
/// its immediate subdirectories.
fn find_project_root(dir: &Path) -> Option<PathBuf> {
    const MARKERS: &[&str] = &[
        "Cargo.toml",
        "package.json",
        "go.mod",
        "pyproject.toml",
        "setup.py",
        "pom.xml",
        "build.gradle",
    ];

    if MARKERS.iter().any(|m| dir.join(m).exists()) {
        return Some(dir.to_path_buf());
    }

    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    // read_dir order is platform dependent
    subdirs.sort();

    subdirs
        .into_iter()
        .find(|path| MARKERS.iter().any(|m| path.join(m).exists()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_expand_task_variables() {
        let ctx = CommandContext::new("task-7", Path::new("/srv/app"));
        assert_eq!(
            ctx.expand("cd ${WORKING_DIR} && echo ${TASK_ID}"),
            "cd /srv/app && echo task-7"
        );
    }

    #[test]
    fn test_unknown_variables_left_unchanged() {
        let ctx = CommandContext::new("task-7", Path::new("/srv/app"));
        assert_eq!(ctx.expand("echo ${HOME_DIR}"), "echo ${HOME_DIR}");
        assert_eq!(ctx.find_unresolved("${HOME_DIR} ${TASK_ID}"), vec!["HOME_DIR"]);
    }

    #[test]
    fn test_project_root_in_working_dir() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("Cargo.toml"), "[package]").unwrap();
        let ctx = CommandContext::new("t", temp.path());
        assert_eq!(
            ctx.get_variable("PROJECT_ROOT"),
            Some(temp.path().display().to_string().as_str())
        );
    }

    #[test]
    fn test_project_root_in_subdirectory() {
        let temp = tempdir().unwrap();
        let sub = temp.path().join("service");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("package.json"), "{}").unwrap();
        let ctx = CommandContext::new("t", temp.path());
        assert_eq!(
            ctx.get_variable("PROJECT_ROOT"),
            Some(sub.display().to_string().as_str())
        );
    }

    #[test]
    fn test_no_project_root() {
        let temp = tempdir().unwrap();
        let ctx = CommandContext::new("t", temp.path());
        assert!(ctx.get_variable("PROJECT_ROOT").is_none());
    }

    #[test]
    fn test_custom_variable() {
        let mut ctx = CommandContext::new("t", Path::new("/srv"));
        ctx.set_variable("PORT", "8080");
        assert_eq!(ctx.expand("localhost:${PORT}"), "localhost:8080");
    }
}
