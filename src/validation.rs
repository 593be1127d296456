//! Input validation for identifiers and commands.
//!
//! Task ids end up in store file names, so they are restricted to a safe
//! character set before any path is built from them.

use anyhow::{bail, Result};

/// Maximum allowed length for task ids and check names.
pub const MAX_ID_LENGTH: usize = 128;

/// Maximum allowed length for a shell command or query.
pub const MAX_COMMAND_LENGTH: usize = 4096;

/// Reserved names that cannot be used as IDs (case-insensitive).
const RESERVED_NAMES: &[&str] = &[
    ".", "..", "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7",
    "com8", "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Validates that an ID is safe for use in file paths.
///
/// An ID is valid if it is non-empty, at most `MAX_ID_LENGTH` characters,
/// made of ASCII alphanumerics, dashes and underscores, and not a reserved
/// system name.
///
/// # Examples
///
/// ```
/// use proofgate::validation::validate_id;
///
/// assert!(validate_id("task-001").is_ok());
/// assert!(validate_id("").is_err());
/// assert!(validate_id("../etc/passwd").is_err());
/// ```
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("ID cannot be empty");
    }

    if id.len() > MAX_ID_LENGTH {
        bail!(
            "ID too long: {} characters (max {})",
            id.len(),
            MAX_ID_LENGTH
        );
    }

    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_chars {
        bail!("ID '{id}' contains invalid characters. Use only alphanumeric characters, dashes (-), and underscores (_)");
    }

    if RESERVED_NAMES.contains(&id.to_lowercase().as_str()) {
        bail!("ID '{id}' uses a reserved name");
    }

    Ok(())
}

/// Validates a shell command (or query) taken from a task descriptor.
///
/// Commands must not be blank, must fit within `MAX_COMMAND_LENGTH`, and
/// must not contain control characters other than tab and newlines.
pub fn validate_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        bail!("command cannot be empty");
    }

    if command.len() > MAX_COMMAND_LENGTH {
        bail!(
            "command too long ({} chars, max {MAX_COMMAND_LENGTH})",
            command.len()
        );
    }

    for (idx, ch) in command.chars().enumerate() {
        if ch.is_control() && ch != '\t' && ch != '\n' && ch != '\r' {
            bail!("command contains control character at position {idx}");
        }
    }

    Ok(())
}

/// Clap value parser for validating ID arguments.
pub fn clap_id_validator(s: &str) -> Result<String, String> {
    validate_id(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_valid() {
        assert!(validate_id("task-001").is_ok());
        assert!(validate_id("fix_login_2024").is_ok());
        assert!(validate_id("A").is_ok());
    }

    #[test]
    fn test_validate_id_empty() {
        let result = validate_id("");
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_validate_id_too_long() {
        let long_id = "a".repeat(MAX_ID_LENGTH + 1);
        assert!(validate_id(&long_id)
            .unwrap_err()
            .to_string()
            .contains("too long"));
    }

    #[test]
    fn test_validate_id_invalid_chars() {
        assert!(validate_id("task/001").is_err());
        assert!(validate_id("../passwd").is_err());
        assert!(validate_id("task 001").is_err());
        assert!(validate_id("task.json").is_err());
    }

    #[test]
    fn test_validate_id_reserved_names() {
        assert!(validate_id("..").is_err());
        assert!(validate_id("CON").is_err());
        assert!(validate_id("nul").is_err());
    }

    #[test]
    fn test_validate_command() {
        assert!(validate_command("cargo test --all").is_ok());
        assert!(validate_command("pytest -q\n").is_ok());
        assert!(validate_command("   ").is_err());
        assert!(validate_command("echo \u{7}bell").is_err());
        assert!(validate_command(&"x".repeat(MAX_COMMAND_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_clap_id_validator() {
        assert!(clap_id_validator("valid-id").is_ok());
        assert!(clap_id_validator("../invalid").is_err());
    }
}
