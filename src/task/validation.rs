//! Task descriptor validation

use std::collections::HashSet;

use crate::models::task::{DiffReference, FunctionalCheck, MethodTag, TaskDescriptor};
use crate::validation::{validate_command, validate_id};

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Maximum length of a claim or criterion description
const MAX_TEXT_LENGTH: usize = 1024;

/// A problem found in a task descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
    /// Descriptor field the problem was found in
    pub field: Option<String>,
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    fn at(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "{field}: {}", self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate free text (claims, criterion descriptions)
fn validate_text(text: &str, what: &str) -> Result<(), String> {
    if text.trim().is_empty() {
        return Err(format!("{what} cannot be empty"));
    }
    if text.len() > MAX_TEXT_LENGTH {
        return Err(format!(
            "{what} too long ({} chars, max {MAX_TEXT_LENGTH})",
            text.len()
        ));
    }
    for (idx, ch) in text.chars().enumerate() {
        if ch.is_control() && ch != '\t' && ch != '\n' && ch != '\r' {
            return Err(format!("{what} contains control character at position {idx}"));
        }
    }
    Ok(())
}

/// Validate a URL, tolerating `${VAR}` placeholders expanded at run time
fn validate_url(url: &str) -> Result<(), String> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(format!("URL must start with http:// or https://: {url}"));
    }
    if url.contains("${") {
        return Ok(());
    }
    reqwest::Url::parse(url)
        .map(|_| ())
        .map_err(|e| format!("invalid URL '{url}': {e}"))
}

/// Validate a task descriptor, collecting every problem found.
///
/// Unregistered criterion methods are not errors here; they surface as
/// configuration errors when the criterion is evaluated.
pub fn validate(task: &TaskDescriptor) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = validate_id(&task.task_id) {
        errors.push(ValidationError::at("task_id", e.to_string()));
    }

    if let Err(e) = validate_command(&task.test_command) {
        errors.push(ValidationError::at("test_command", e.to_string()));
    }

    for (i, claim) in task.claims.iter().enumerate() {
        if let Err(e) = validate_text(claim, "claim") {
            errors.push(ValidationError::at(format!("claims[{i}]"), e));
        }
    }

    for (i, criterion) in task.success_criteria.iter().enumerate() {
        if let Err(e) = validate_text(&criterion.description, "criterion description") {
            errors.push(ValidationError::at(format!("success_criteria[{i}]"), e));
        }
        if let Some(check) = &criterion.expected.check {
            if !task.functional_checks.iter().any(|c| c.name() == check) {
                errors.push(ValidationError::at(
                    format!("success_criteria[{i}]"),
                    format!("refers to unknown functional check '{check}'"),
                ));
            }
        }
    }

    let mut names = HashSet::new();
    for (i, check) in task.functional_checks.iter().enumerate() {
        let field = format!("functional_checks[{i}]");
        if let Err(e) = validate_id(check.name()) {
            errors.push(ValidationError::at(&field, format!("invalid check name: {e}")));
        }
        if !names.insert(check.name()) {
            errors.push(ValidationError::at(
                &field,
                format!("duplicate check name '{}'", check.name()),
            ));
        }
        if check.timeout_secs() == Some(0) {
            errors.push(ValidationError::at(&field, "timeout_secs must be positive"));
        }

        match check {
            FunctionalCheck::Http(http) => {
                if let Err(e) = validate_url(&http.url) {
                    errors.push(ValidationError::at(&field, e));
                }
                if !HTTP_METHODS.contains(&http.method.to_uppercase().as_str()) {
                    errors.push(ValidationError::at(
                        &field,
                        format!("unsupported HTTP method '{}'", http.method),
                    ));
                }
                if let Some(status) = http.expected_status {
                    if !(100..=599).contains(&status) {
                        errors.push(ValidationError::at(
                            &field,
                            format!("expected_status {status} is not an HTTP status"),
                        ));
                    }
                }
            }
            FunctionalCheck::Browser(browser) => {
                if let Err(e) = validate_url(&browser.url) {
                    errors.push(ValidationError::at(&field, e));
                }
            }
            FunctionalCheck::Database(db) => {
                if db.database.trim().is_empty() {
                    errors.push(ValidationError::at(&field, "database cannot be empty"));
                }
                if let Err(e) = validate_command(&db.query) {
                    errors.push(ValidationError::at(&field, format!("query: {e}")));
                }
            }
        }
    }

    match &task.diff_reference {
        DiffReference::Git { base, head } => {
            for rev in std::iter::once(base).chain(head.iter()) {
                if rev.trim().is_empty() || rev.starts_with('-') {
                    errors.push(ValidationError::at(
                        "diff_reference",
                        format!("invalid git revision '{rev}'"),
                    ));
                }
            }
        }
        DiffReference::File { path } => {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::at("diff_reference", "path cannot be empty"));
            }
        }
        DiffReference::Inline { .. } => {}
    }

    for (i, command) in task.environment.commands.iter().enumerate() {
        if command.trim().is_empty() || command.contains(char::is_whitespace) {
            errors.push(ValidationError::at(
                format!("environment.commands[{i}]"),
                format!("'{command}' is not a program name"),
            ));
        }
    }
    for (i, service) in task.environment.services.iter().enumerate() {
        if service.rsplit_once(':').is_none() {
            errors.push(ValidationError::at(
                format!("environment.services[{i}]"),
                format!("'{service}' is not host:port"),
            ));
        }
    }

    if task.retry_policy.base_delay_ms > task.retry_policy.max_delay_ms {
        errors.push(ValidationError::new(format!(
            "retry_policy: base_delay_ms ({}) exceeds max_delay_ms ({})",
            task.retry_policy.base_delay_ms, task.retry_policy.max_delay_ms
        )));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Non-fatal remarks about a descriptor
pub fn warnings(task: &TaskDescriptor) -> Vec<String> {
    let mut warnings = Vec::new();

    for criterion in &task.success_criteria {
        if let MethodTag::Unregistered(tag) = &criterion.method {
            warnings.push(format!(
                "criterion '{}' uses unregistered method '{tag}' and will be reported as an error",
                criterion.description
            ));
        }
    }

    if task.retry_policy.max_retries > 0
        && !task
            .retry_policy
            .retryable_gate_kinds
            .iter()
            .any(|g| g.is_flaky())
    {
        warnings.push(
            "retry_policy.max_retries is set but no retryable gate kind can be retried".to_string(),
        );
    }

    warnings
}
