//! Browser checks
//!
//! Rendering is delegated to a `BrowserDriver`. The default driver runs a
//! configured command template; proofgate itself never drives a browser.

use sha2::{Digest, Sha256};
use shell_escape::escape;
use std::path::{Path, PathBuf};

use super::{CheckEnv, CheckOutcome};
use crate::error::GateError;
use crate::models::evidence::{EvidencePayload, Screenshot};
use crate::models::task::BrowserCheck;
use crate::process::run_shell_command;

/// Page text kept as evidence
const MAX_PAGE_TEXT: usize = 4096;

/// What a driver observed for one page
#[derive(Debug, Clone, Default)]
pub struct PageCapture {
    pub screenshot: Option<PathBuf>,
    pub page_text: String,
}

pub trait BrowserDriver: Send + Sync {
    /// Load `check.url`, write a screenshot to `output`, return the page text
    fn capture(
        &self,
        check: &BrowserCheck,
        output: &Path,
        env: &CheckEnv<'_>,
    ) -> Result<PageCapture, GateError>;
}

/// Driver backed by a shell command template with `{url}` and `{output}`
/// placeholders
#[derive(Debug, Clone)]
pub struct CommandBrowserDriver {
    template: String,
}

impl CommandBrowserDriver {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl BrowserDriver for CommandBrowserDriver {
    fn capture(
        &self,
        check: &BrowserCheck,
        output: &Path,
        env: &CheckEnv<'_>,
    ) -> Result<PageCapture, GateError> {
        let output_str = output.display().to_string();
        let command = self
            .template
            .replace("{url}", &escape(check.url.as_str().into()))
            .replace("{output}", &escape(output_str.as_str().into()));

        let outcome = run_shell_command(&command, Some(env.working_dir), env.timeout, env.cancel)
            .map_err(|e| GateError::Execution(format!("{e:#}")))?;
        if outcome.cancelled {
            return Err(GateError::Cancelled);
        }
        if outcome.timed_out {
            return Err(GateError::Timeout(env.timeout.as_secs()));
        }
        if !outcome.success() {
            return Err(GateError::Execution(format!(
                "browser driver failed: {}",
                outcome.error_excerpt(5)
            )));
        }

        Ok(PageCapture {
            screenshot: output.exists().then(|| output.to_path_buf()),
            page_text: outcome.stdout,
        })
    }
}

/// Fallback when no driver is configured
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredBrowser;

impl BrowserDriver for UnconfiguredBrowser {
    fn capture(
        &self,
        _check: &BrowserCheck,
        _output: &Path,
        _env: &CheckEnv<'_>,
    ) -> Result<PageCapture, GateError> {
        Err(GateError::Execution(
            "no browser driver configured ([browser] command in proofgate.toml)".to_string(),
        ))
    }
}

pub fn run_browser_check(
    driver: &dyn BrowserDriver,
    check: &BrowserCheck,
    artifact_dir: &Path,
    env: &CheckEnv<'_>,
) -> CheckOutcome {
    let output = artifact_dir.join(format!("{}-{}.png", check.name, uuid::Uuid::new_v4()));
    if let Err(e) = std::fs::create_dir_all(artifact_dir) {
        return errored(check, format!("cannot create {}: {e}", artifact_dir.display()));
    }

    let capture = match driver.capture(check, &output, env) {
        Ok(capture) => capture,
        Err(e) => return errored(check, e.to_string()),
    };

    let Some(path) = capture.screenshot else {
        return errored(check, "browser driver produced no screenshot".to_string());
    };
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => return errored(check, format!("cannot read screenshot: {e}")),
    };

    let text_ok = check
        .expect_text
        .as_ref()
        .map(|needle| capture.page_text.contains(needle.as_str()))
        .unwrap_or(true);
    let success = text_ok && !bytes.is_empty();
    let message = if bytes.is_empty() {
        "screenshot is empty".to_string()
    } else if !text_ok {
        format!(
            "page text does not contain '{}'",
            check.expect_text.as_deref().unwrap_or_default()
        )
    } else {
        format!("rendered {} ({} byte screenshot)", check.url, bytes.len())
    };

    CheckOutcome {
        name: check.name.clone(),
        kind: "browser",
        success,
        error: None,
        message,
        payload: EvidencePayload::Screenshot(Screenshot {
            check: check.name.clone(),
            url: check.url.clone(),
            path: Some(path.display().to_string()),
            bytes: bytes.len() as u64,
            sha256: Some(hex::encode(Sha256::digest(&bytes))),
            page_text: super::http::truncate(&capture.page_text, MAX_PAGE_TEXT),
            error: None,
            success,
        }),
    }
}

fn errored(check: &BrowserCheck, error: String) -> CheckOutcome {
    CheckOutcome {
        name: check.name.clone(),
        kind: "browser",
        success: false,
        error: Some(error.clone()),
        message: error.clone(),
        payload: EvidencePayload::Screenshot(Screenshot {
            check: check.name.clone(),
            url: check.url.clone(),
            path: None,
            bytes: 0,
            sha256: None,
            page_text: String::new(),
            error: Some(error),
            success: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CancellationToken;
    use std::time::Duration;

    fn check(expect_text: Option<&str>) -> BrowserCheck {
        BrowserCheck {
            name: "home".to_string(),
            url: "http://localhost:3000/".to_string(),
            expect_text: expect_text.map(String::from),
            timeout_secs: None,
        }
    }

    #[test]
    fn test_command_driver_captures_page() {
        let temp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let env = CheckEnv {
            working_dir: temp.path(),
            timeout: Duration::from_secs(10),
            cancel: &cancel,
        };
        let driver = CommandBrowserDriver::new("printf PNGDATA > {output}; echo Welcome to {url}");

        let outcome = run_browser_check(&driver, &check(Some("Welcome")), temp.path(), &env);
        assert!(outcome.success, "{}", outcome.message);
        match outcome.payload {
            EvidencePayload::Screenshot(s) => {
                assert_eq!(s.bytes, 7);
                assert_eq!(s.sha256.unwrap().len(), 64);
                assert!(s.page_text.contains("localhost:3000"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_missing_text_is_assertion() {
        let temp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let env = CheckEnv {
            working_dir: temp.path(),
            timeout: Duration::from_secs(10),
            cancel: &cancel,
        };
        let driver = CommandBrowserDriver::new("printf PNG > {output}; echo Error page");

        let outcome = run_browser_check(&driver, &check(Some("Welcome")), temp.path(), &env);
        assert!(!outcome.success);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_unconfigured_driver_is_error() {
        let temp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let env = CheckEnv {
            working_dir: temp.path(),
            timeout: Duration::from_secs(10),
            cancel: &cancel,
        };
        let outcome = run_browser_check(&UnconfiguredBrowser, &check(None), temp.path(), &env);
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no browser driver"));
    }

    #[test]
    fn test_driver_without_screenshot_is_error() {
        let temp = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let env = CheckEnv {
            working_dir: temp.path(),
            timeout: Duration::from_secs(10),
            cancel: &cancel,
        };
        let driver = CommandBrowserDriver::new("echo rendered");
        let outcome = run_browser_check(&driver, &check(None), temp.path(), &env);
        assert!(outcome.error.unwrap().contains("no screenshot"));
    }
}
