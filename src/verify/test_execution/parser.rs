//! Test runner output parsing
//!
//! Recognizes the summary lines of common runners. Formats are tried from
//! most to least specific and the first one that matches wins, so a cargo
//! summary is never counted a second time by the generic fallback.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Runner whose summary format was recognized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestFormat {
    Cargo,
    Jest,
    Go,
    /// pytest and any other `N passed` / `N failed` summary
    Generic,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: Option<u32>,
    pub failed: Option<u32>,
    pub format: Option<TestFormat>,
}

impl TestCounts {
    fn found(format: TestFormat, passed: u32, failed: u32) -> Self {
        Self {
            passed: Some(passed),
            failed: Some(failed),
            format: Some(format),
        }
    }
}

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn cargo_summary() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(
        &RE,
        r"test result: (?:ok|FAILED)\. (\d+) passed; (\d+) failed",
    )
}

fn count_fragment() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"(?i)\b(\d+) (passed|failed|errors?)\b")
}

fn go_test_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"^\s*--- (PASS|FAIL): ")
}

fn go_package_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"^(ok|FAIL)\s+\S+\s+(?:[\d.]+s|\(cached\)|\[)")
}

/// Extract pass/fail counts from combined runner output.
pub fn parse_test_counts(output: &str) -> TestCounts {
    parse_cargo(output)
        .or_else(|| parse_jest(output))
        .or_else(|| parse_go(output))
        .or_else(|| parse_generic(output))
        .unwrap_or_default()
}

fn parse_cargo(output: &str) -> Option<TestCounts> {
    let re = cargo_summary()?;
    let mut matched = false;
    let (mut passed, mut failed) = (0u32, 0u32);
    for caps in re.captures_iter(output) {
        matched = true;
        passed = passed.saturating_add(caps[1].parse().unwrap_or(0));
        failed = failed.saturating_add(caps[2].parse().unwrap_or(0));
    }
    matched.then(|| TestCounts::found(TestFormat::Cargo, passed, failed))
}

/// `Tests: 1 failed, 5 passed, 6 total` (jest) and
/// `Tests  1 failed | 5 passed (6)` (vitest)
fn parse_jest(output: &str) -> Option<TestCounts> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_start)
        .filter(|l| l.starts_with("Tests:") || l.starts_with("Tests "))
        .collect();
    if lines.is_empty() {
        return None;
    }
    let (passed, failed) = sum_fragments(lines.into_iter())?;
    Some(TestCounts::found(TestFormat::Jest, passed, failed))
}

/// Individual `--- PASS:` / `--- FAIL:` lines when present, otherwise
/// package `ok` / `FAIL` lines
fn parse_go(output: &str) -> Option<TestCounts> {
    let test_re = go_test_line()?;
    let (mut passed, mut failed) = (0u32, 0u32);
    for line in output.lines() {
        if let Some(caps) = test_re.captures(line) {
            match &caps[1] {
                "PASS" => passed += 1,
                _ => failed += 1,
            }
        }
    }
    if passed + failed > 0 {
        return Some(TestCounts::found(TestFormat::Go, passed, failed));
    }

    let package_re = go_package_line()?;
    for line in output.lines() {
        if let Some(caps) = package_re.captures(line) {
            match &caps[1] {
                "ok" => passed += 1,
                _ => failed += 1,
            }
        }
    }
    (passed + failed > 0).then(|| TestCounts::found(TestFormat::Go, passed, failed))
}

fn parse_generic(output: &str) -> Option<TestCounts> {
    let (passed, failed) = sum_fragments(output.lines())?;
    Some(TestCounts::found(TestFormat::Generic, passed, failed))
}

/// Sum `N passed` / `N failed` / `N error(s)` fragments; errors count as failures.
fn sum_fragments<'a>(lines: impl Iterator<Item = &'a str>) -> Option<(u32, u32)> {
    let re = count_fragment()?;
    let mut matched = false;
    let (mut passed, mut failed) = (0u32, 0u32);
    for line in lines {
        for caps in re.captures_iter(line) {
            let n: u32 = caps[1].parse().unwrap_or(0);
            matched = true;
            if caps[2].eq_ignore_ascii_case("passed") {
                passed = passed.saturating_add(n);
            } else {
                failed = failed.saturating_add(n);
            }
        }
    }
    matched.then_some((passed, failed))
}
