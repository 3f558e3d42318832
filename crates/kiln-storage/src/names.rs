//! Name validation for databases and branches.
//!
//! Both names become a single path component (`{data_dir}/{name}/`,
//! `{branch}.json`) or URL segment, so they must be non-empty, must not
//! contain separators, whitespace, or control characters, and must not start
//! with `.`.

use crate::error::{StorageError, StorageResult};

/// Characters that are forbidden anywhere in a name.
const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '?', '#', '*', '%', '"', '<', '>', '|'];

/// Validate a branch name, returning `Ok(())` if valid.
///
/// ```
/// use kiln_storage::names::validate_branch_name;
///
/// assert!(validate_branch_name("main").is_ok());
/// assert!(validate_branch_name("index-by-title").is_ok());
/// assert!(validate_branch_name("").is_err());
/// assert!(validate_branch_name("../escape").is_err());
/// ```
pub fn validate_branch_name(name: &str) -> StorageResult<()> {
    validate("branch", name)
}

/// Validate a database name. Same rules as branch names.
pub fn validate_database_name(name: &str) -> StorageResult<()> {
    validate("database", name)
}

fn validate(kind: &'static str, name: &str) -> StorageResult<()> {
    let invalid = |reason: String| StorageError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("must not be empty".into()));
    }
    if let Some(ch) = name
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_whitespace() || c.is_control())
    {
        return Err(invalid(format!("contains forbidden character: {ch:?}")));
    }
    if name.starts_with('.') {
        return Err(invalid("must not start with '.'".into()));
    }
    Ok(())
}
