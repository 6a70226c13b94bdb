//! Pull request coordinates parsed from a session's output URL.

use std::fmt;
use std::str::FromStr;

use crate::error::GitHubError;

/// (owner, repo, number) of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRequestRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// Parse `https://github.com/{owner}/{repo}/pull/{number}`, tolerating a
    /// trailing path (`/files`), query or fragment.
    pub fn parse(url: &str) -> Result<Self, GitHubError> {
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .ok_or(GitHubError::InvalidPullRequestUrl)?;
        let rest = rest.split(['?', '#']).next().unwrap_or_default();

        let mut parts = rest.split('/').skip(1); // host
        let owner = parts.next().filter(|s| !s.is_empty());
        let repo = parts.next().filter(|s| !s.is_empty());
        let kind = parts.next();
        let number = parts.next().and_then(|n| n.parse::<u64>().ok());

        match (owner, repo, kind, number) {
            (Some(owner), Some(repo), Some("pull"), Some(number)) if number > 0 => {
                Ok(Self::new(owner, repo, number))
            }
            _ => Err(GitHubError::InvalidPullRequestUrl),
        }
    }
}

impl FromStr for PullRequestRef {
    type Err = GitHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Split `owner/repo`.
pub fn split_repo(full_name: &str) -> Option<(&str, &str)> {
    let (owner, repo) = full_name.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}
