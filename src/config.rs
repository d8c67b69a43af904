//! read client configuration from a file, the environment, or explicit values

use serde::Deserialize;

use crate::errors::Error;

pub const BASE_URL_ENV: &str = "LMS_API_BASE_URL";
pub const REFRESH_PATH_ENV: &str = "LMS_API_REFRESH_PATH";
pub const TIMEOUT_ENV: &str = "LMS_API_TIMEOUT_SECS";
pub const USER_AGENT_ENV: &str = "LMS_API_USER_AGENT";

pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";
pub const DEFAULT_USER_AGENT: &str = "lms-admin-client/0.1.0";

pub enum ConfigLocation {
    File(String),
    Env,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub base_url: String,
    #[serde(default)]
    pub refresh_path: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Config {
    pub fn load(loc: ConfigLocation) -> Result<Self, Error> {
        match loc {
            ConfigLocation::File(path) => Self::from_file(path),
            ConfigLocation::Env => Self::from_env(),
        }
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validated()
    }

    /// Reads `LMS_API_BASE_URL` (required) plus the optional
    /// `LMS_API_REFRESH_PATH`, `LMS_API_TIMEOUT_SECS` and `LMS_API_USER_AGENT`.
    ///
    /// There is no default base URL; a missing value is an error so that a
    /// misconfigured deployment never talks to the wrong host.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var(BASE_URL_ENV)
            .map_err(|_| Error::Config(format!("Missing {BASE_URL_ENV} env var")))?;
        let timeout_secs = match std::env::var(TIMEOUT_ENV) {
            Ok(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("Invalid {TIMEOUT_ENV} '{raw}': {e}"))
            })?),
            Err(_) => None,
        };
        Config {
            base_url,
            refresh_path: std::env::var(REFRESH_PATH_ENV).ok(),
            timeout_secs,
            user_agent: std::env::var(USER_AGENT_ENV).ok(),
        }
        .validated()
    }

    pub fn from_values(
        base_url: impl Into<String>,
        refresh_path: Option<String>,
        timeout_secs: Option<u64>,
        user_agent: Option<String>,
    ) -> Self {
        Config {
            base_url: base_url.into(),
            refresh_path,
            timeout_secs,
            user_agent,
        }
    }

    pub fn refresh_path(&self) -> &str {
        self.refresh_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_REFRESH_PATH)
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }

    pub(crate) fn validated(self) -> Result<Self, Error> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config(format!("{BASE_URL_ENV} must not be empty")));
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::Config("timeout_secs must be > 0".into()));
        }
        Ok(self)
    }
}
