//! Advisory file locks around the evidence log and stored results
//!
//! A run appending evidence and an audit replaying it may touch the same
//! file at once. Readers take a shared `fs2` lock, writers an exclusive
//! one; the lock is released when the handle drops. Nothing outside this
//! module should open those files directly.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Clone, Copy)]
enum Lock {
    Shared,
    Exclusive,
}

fn acquire(file: &File, lock: Lock, path: &Path) -> Result<()> {
    let locked = match lock {
        Lock::Shared => file.lock_shared(),
        Lock::Exclusive => file.lock_exclusive(),
    };
    locked.with_context(|| format!("Could not lock {}", path.display()))
}

/// Whole-file read under a shared lock
pub fn locked_read(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    acquire(&file, Lock::Shared, path)?;
    let mut content = String::new();
    file.read_to_string(&mut content)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    Ok(content)
}

/// Replace the file contents under an exclusive lock.
///
/// Truncation happens after the lock is held, so a concurrent `locked_read`
/// sees either the old contents or the new ones.
pub fn locked_write(path: &Path, content: &str) -> Result<()> {
    #[allow(clippy::suspicious_open_options)]
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .with_context(|| format!("Cannot open {} for writing", path.display()))?;
    acquire(&file, Lock::Exclusive, path)?;
    file.set_len(0)
        .and_then(|_| file.write_all(content.as_bytes()))
        .and_then(|_| file.flush())
        .with_context(|| format!("Cannot write {}", path.display()))
}

/// Append `line` plus a newline as one locked, synced write
pub fn locked_append(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("Cannot open {} for appending", path.display()))?;
    acquire(&file, Lock::Exclusive, path)?;
    let mut record = String::with_capacity(line.len() + 1);
    record.push_str(line);
    record.push('\n');
    file.write_all(record.as_bytes())
        .and_then(|_| file.sync_data())
        .with_context(|| format!("Cannot append to {}", path.display()))
}
