//! Unified diff parser
//!
//! Understands `git diff` output (including new, deleted, renamed and
//! binary files) as well as plain `diff -u` output. Hunk line counts are
//! tracked so a removed line that happens to start with `--` is never
//! mistaken for a file header.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    /// Previous path of a renamed file
    pub old_path: Option<String>,
    pub status: FileStatus,
    pub binary: bool,
    pub added_lines: Vec<String>,
    pub removed_lines: Vec<String>,
}

impl FileChange {
    fn new(path: String) -> Self {
        Self {
            path,
            old_path: None,
            status: FileStatus::Modified,
            binary: false,
            added_lines: Vec::new(),
            removed_lines: Vec::new(),
        }
    }

    /// Changed lines that differ by more than whitespace.
    ///
    /// Added and removed lines are compared with all whitespace stripped;
    /// lines that cancel out (re-indentation, reflowed spacing) and blank
    /// lines do not count. A pure rename or a binary change counts as one.
    pub fn substantive_lines(&self) -> usize {
        let mut removed: HashMap<String, usize> = HashMap::new();
        for line in &self.removed_lines {
            let key = normalize(line);
            if !key.is_empty() {
                *removed.entry(key).or_default() += 1;
            }
        }

        let mut count = 0;
        for line in &self.added_lines {
            let key = normalize(line);
            if key.is_empty() {
                continue;
            }
            match removed.get_mut(&key) {
                Some(n) if *n > 0 => *n -= 1,
                _ => count += 1,
            }
        }
        count += removed.values().sum::<usize>();

        if count == 0 && (self.binary || self.status == FileStatus::Renamed) {
            1
        } else {
            count
        }
    }

    /// Every path this change touches
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str()).chain(self.old_path.as_deref())
    }
}

fn normalize(line: &str) -> String {
    line.chars().filter(|c| !c.is_whitespace()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDiff {
    pub files: Vec<FileChange>,
}

impl ParsedDiff {
    pub fn added(&self) -> usize {
        self.files.iter().map(|f| f.added_lines.len()).sum()
    }

    pub fn removed(&self) -> usize {
        self.files.iter().map(|f| f.removed_lines.len()).sum()
    }

    pub fn substantive_lines(&self) -> usize {
        self.files.iter().map(FileChange::substantive_lines).sum()
    }

    /// No file is touched at all
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Something changed, but only whitespace
    pub fn is_whitespace_only(&self) -> bool {
        !self.is_empty() && self.substantive_lines() == 0
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

fn hunk_header() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@@ -\d+(?:,(\d+))? \+\d+(?:,(\d+))? @@").ok())
        .as_ref()
}

/// Strip the `a/` / `b/` prefix and any trailing tab-separated timestamp
fn header_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let path = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(path.to_string())
}

pub fn parse_unified_diff(text: &str) -> ParsedDiff {
    let mut files: Vec<FileChange> = Vec::new();
    let mut current: Option<FileChange> = None;
    // Lines left in the current hunk (old side, new side)
    let mut remaining = (0usize, 0usize);
    let mut pending_old: Option<Option<String>> = None;

    for line in text.lines() {
        if remaining.0 > 0 || remaining.1 > 0 {
            if let Some(file) = current.as_mut() {
                if let Some(rest) = line.strip_prefix('+') {
                    file.added_lines.push(rest.to_string());
                    remaining.1 = remaining.1.saturating_sub(1);
                    continue;
                }
                if let Some(rest) = line.strip_prefix('-') {
                    file.removed_lines.push(rest.to_string());
                    remaining.0 = remaining.0.saturating_sub(1);
                    continue;
                }
                if line.starts_with('\\') {
                    continue;
                }
                if line.starts_with(' ') || line.is_empty() {
                    remaining.0 = remaining.0.saturating_sub(1);
                    remaining.1 = remaining.1.saturating_sub(1);
                    continue;
                }
            }
            remaining = (0, 0);
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(file) = current.take() {
                files.push(file);
            }
            let path = rest
                .rsplit_once(" b/")
                .map(|(_, new)| new.to_string())
                .unwrap_or_else(|| rest.to_string());
            current = Some(FileChange::new(path));
            pending_old = None;
        } else if line.starts_with("new file mode") {
            if let Some(file) = current.as_mut() {
                file.status = FileStatus::Added;
            }
        } else if line.starts_with("deleted file mode") {
            if let Some(file) = current.as_mut() {
                file.status = FileStatus::Deleted;
            }
        } else if let Some(from) = line.strip_prefix("rename from ") {
            if let Some(file) = current.as_mut() {
                file.status = FileStatus::Renamed;
                file.old_path = Some(from.to_string());
            }
        } else if let Some(to) = line.strip_prefix("rename to ") {
            if let Some(file) = current.as_mut() {
                file.path = to.to_string();
            }
        } else if line.starts_with("Binary files ") {
            if let Some(file) = current.as_mut() {
                file.binary = true;
            }
        } else if let Some(rest) = line.strip_prefix("--- ") {
            pending_old = Some(header_path(rest));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let old = pending_old.take().flatten();
            let new = header_path(rest);
            // Plain `diff -u` output has no `diff --git` line
            let from_git_header = current
                .as_ref()
                .map(|f| f.added_lines.is_empty() && f.removed_lines.is_empty())
                .unwrap_or(false);
            if !from_git_header {
                if let Some(file) = current.take() {
                    files.push(file);
                }
                let path = new.clone().or_else(|| old.clone()).unwrap_or_default();
                current = Some(FileChange::new(path));
            }
            if let Some(file) = current.as_mut() {
                match (&old, &new) {
                    (None, Some(_)) => file.status = FileStatus::Added,
                    (Some(path), None) => {
                        file.status = FileStatus::Deleted;
                        file.path = path.clone();
                    }
                    _ => {}
                }
            }
        } else if let Some(caps) = hunk_header().and_then(|re| re.captures(line)) {
            let count = |i: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(1usize)
            };
            remaining = (count(1), count(2));
        }
    }

    if let Some(file) = current.take() {
        files.push(file);
    }

    ParsedDiff { files }
}
