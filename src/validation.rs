//! Input validation at mutation boundaries.
//!
//! Malformed input is rejected, never coerced. Errors name the offending
//! field and leave the value out, since values may be user-authored text.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationError;

pub const MAX_PROMPT_LEN: usize = 50_000;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_SESSION_COUNT: u32 = 100;

static REPO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.-]+/[a-zA-Z0-9_.-]+$").expect("static regex")
});

static BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_./-]+$").expect("static regex"));

/// `owner/repo`, no traversal segments.
pub fn validate_repo(repo: &str) -> Result<(), ValidationError> {
    if repo.is_empty() {
        return Err(ValidationError::Required { field: "repo" });
    }
    if !REPO_RE.is_match(repo) || repo.contains("..") {
        return Err(ValidationError::InvalidRepo);
    }
    Ok(())
}

/// Git ref name subset: no `..`, no `//`, no leading or trailing slash.
pub fn validate_branch(branch: &str) -> Result<(), ValidationError> {
    if branch.is_empty() {
        return Err(ValidationError::Required { field: "branch" });
    }
    if !BRANCH_RE.is_match(branch)
        || branch.contains("..")
        || branch.contains("//")
        || branch.starts_with('/')
        || branch.ends_with('/')
    {
        return Err(ValidationError::InvalidBranch);
    }
    Ok(())
}

pub fn validate_prompt(prompt: &str) -> Result<(), ValidationError> {
    if prompt.trim().is_empty() {
        return Err(ValidationError::Required { field: "prompt" });
    }
    validate_len("prompt", prompt, MAX_PROMPT_LEN)
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    validate_len("name", name, MAX_NAME_LEN)
}

pub fn validate_session_count(count: u32) -> Result<(), ValidationError> {
    if count == 0 || count > MAX_SESSION_COUNT {
        return Err(ValidationError::SessionCount {
            max: MAX_SESSION_COUNT,
        });
    }
    Ok(())
}

fn validate_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}
