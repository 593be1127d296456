//! Diff policy rules

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use super::parser::{FileStatus, ParsedDiff};
use crate::error::GateError;

/// File-name patterns recognized as tests
const TEST_FILE_PATTERNS: &[&str] = &[
    "test_*.py",
    "*_test.py",
    "*_test.go",
    "*_test.rs",
    "*.test.js",
    "*.test.jsx",
    "*.test.ts",
    "*.test.tsx",
    "*.spec.js",
    "*.spec.jsx",
    "*.spec.ts",
    "*.spec.tsx",
    "*_spec.rb",
    "*Test.java",
    "*Tests.cs",
    "conftest.py",
];

/// Directory names whose contents are tests
const TEST_DIRS: &[&str] = &["test", "tests", "__tests__", "spec", "testdata"];

/// Markers of stubbed-out code in added lines
const STUB_MARKERS: &[&str] = &[
    "todo!()",
    "unimplemented!()",
    "raise NotImplementedError",
    "TODO: implement",
    "throw new Error(\"Not implemented\")",
    "panic(\"not implemented\")",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffPolicy {
    /// Glob patterns of paths the change must not touch
    pub forbidden_paths: Vec<String>,
    /// Deleting test files is a violation
    pub protect_test_files: bool,
    /// The diff must not be empty
    pub require_changes: bool,
}

impl Default for DiffPolicy {
    fn default() -> Self {
        Self {
            forbidden_paths: Vec::new(),
            protect_test_files: true,
            require_changes: true,
        }
    }
}

impl DiffPolicy {
    pub(crate) fn compile(&self) -> Result<Vec<Pattern>, GateError> {
        self.forbidden_paths
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    GateError::Configuration(format!("invalid forbidden path pattern '{p}': {e}"))
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationRule {
    ForbiddenPath,
    TestFileDeleted,
    NoChanges,
    /// Completion was claimed but nothing substantive changed
    UnsubstantiatedCompletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffViolation {
    pub rule: ViolationRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
}

pub fn is_test_file(path: &str) -> bool {
    let mut components: Vec<&str> = path.split('/').collect();
    let Some(file_name) = components.pop() else {
        return false;
    };
    if components.iter().any(|c| TEST_DIRS.contains(c)) {
        return true;
    }
    TEST_FILE_PATTERNS.iter().any(|p| {
        Pattern::new(p)
            .map(|pattern| pattern.matches(file_name))
            .unwrap_or(false)
    })
}

pub(crate) fn forbidden_path_violations(
    diff: &ParsedDiff,
    patterns: &[Pattern],
) -> Vec<DiffViolation> {
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };
    let mut violations = Vec::new();
    for file in &diff.files {
        for path in file.paths() {
            if let Some(pattern) = patterns.iter().find(|p| p.matches_with(path, options)) {
                violations.push(DiffViolation {
                    rule: ViolationRule::ForbiddenPath,
                    path: Some(path.to_string()),
                    message: format!("{path} matches forbidden pattern '{}'", pattern.as_str()),
                });
            }
        }
    }
    violations
}

pub(crate) fn deleted_test_violations(diff: &ParsedDiff) -> Vec<DiffViolation> {
    diff.files
        .iter()
        .filter(|f| f.status == FileStatus::Deleted && is_test_file(&f.path))
        .map(|f| DiffViolation {
            rule: ViolationRule::TestFileDeleted,
            path: Some(f.path.clone()),
            message: format!("test file deleted: {}", f.path),
        })
        .collect()
}

/// Warnings for stub markers introduced by the change
pub(crate) fn stub_warnings(diff: &ParsedDiff) -> Vec<String> {
    let mut warnings = Vec::new();
    for file in &diff.files {
        for line in &file.added_lines {
            if let Some(marker) = STUB_MARKERS.iter().find(|m| line.contains(*m)) {
                warnings.push(format!("{}: added stub marker `{marker}`", file.path));
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::diff::parser::parse_unified_diff;

    #[test]
    fn test_is_test_file() {
        assert!(is_test_file("tests/integration.rs"));
        assert!(is_test_file("pkg/app/test_views.py"));
        assert!(is_test_file("server/handler_test.go"));
        assert!(is_test_file("web/src/App.spec.ts"));
        assert!(is_test_file("src/__tests__/App.js"));
        assert!(!is_test_file("src/testing_utils.rs"));
        assert!(!is_test_file("src/lib.rs"));
    }

    #[test]
    fn test_forbidden_paths_match_nested() {
        let diff = parse_unified_diff(
            "diff --git a/.github/workflows/ci.yml b/.github/workflows/ci.yml\n--- a/.github/workflows/ci.yml\n+++ b/.github/workflows/ci.yml\n@@ -1 +1 @@\n-a\n+b\n",
        );
        let policy = DiffPolicy {
            forbidden_paths: vec![".github/**".to_string()],
            ..Default::default()
        };
        let violations = forbidden_path_violations(&diff, &policy.compile().unwrap());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule, ViolationRule::ForbiddenPath);
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let policy = DiffPolicy {
            forbidden_paths: vec!["[".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            policy.compile(),
            Err(GateError::Configuration(_))
        ));
    }

    #[test]
    fn test_stub_markers() {
        let diff = parse_unified_diff(
            "--- a/lib.rs\n+++ b/lib.rs\n@@ -1 +1,2 @@\n-fn a() {}\n+fn a() { todo!() }\n+fn b() {}\n",
        );
        let warnings = stub_warnings(&diff);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("todo!()"));
    }
}
