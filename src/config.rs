//! Process configuration, read from the environment.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::github::client::DEFAULT_API_URL;
use crate::remote::client::DEFAULT_BASE_URL;
use crate::settings::DEFAULT_PROFILE_ID;

pub const DEFAULT_DB_PATH: &str = "./data/autopilot.db";
pub const DEFAULT_BRANCH_PREFIX: &str = "jules-";

/// Autopilot configuration.
#[derive(Debug, Clone)]
pub struct AutopilotConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Remote session API keys, tried in order.
    pub api_keys: Vec<SecretString>,
    pub api_url: String,
    /// Without a token, GitHub-backed workers skip their passes.
    pub github_token: Option<SecretString>,
    pub github_api_url: String,
    /// Only branches with this prefix are considered for stale cleanup.
    pub branch_prefix: String,
    /// Settings profile the workers operate on.
    pub profile_id: String,
    /// Directory for daily rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            api_keys: Vec::new(),
            api_url: DEFAULT_BASE_URL.to_string(),
            github_token: None,
            github_api_url: DEFAULT_API_URL.to_string(),
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            profile_id: DEFAULT_PROFILE_ID.to_string(),
            log_dir: None,
        }
    }
}

impl AutopilotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let api_keys = get("JULES_API_KEY")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(|k| SecretString::from(k.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            db_path: get("AUTOPILOT_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            api_keys,
            api_url: get("JULES_API_URL").unwrap_or(defaults.api_url),
            github_token: get("GITHUB_TOKEN").map(SecretString::from),
            github_api_url: get("GITHUB_API_URL").unwrap_or(defaults.github_api_url),
            branch_prefix: get("AUTOPILOT_BRANCH_PREFIX").unwrap_or(defaults.branch_prefix),
            profile_id: get("AUTOPILOT_PROFILE_ID").unwrap_or(defaults.profile_id),
            log_dir: get("AUTOPILOT_LOG_DIR").map(PathBuf::from),
        };
        require_http_url("JULES_API_URL", &config.api_url)?;
        require_http_url("GITHUB_API_URL", &config.github_api_url)?;
        Ok(config)
    }

    /// Create the database's parent directory and the log directory.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        if let Some(dir) = &self.log_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn require_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "expected an http(s) URL".to_string(),
        })
    }
}
