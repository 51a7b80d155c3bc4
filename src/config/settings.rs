//! Process settings read from the environment.

use crate::dispatch::PLATFORM_USER_TYPE;
use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_API_PATH: &str = "/api/db";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
pub const DEFAULT_WORKER_MAX: usize = 10;
pub const DEFAULT_WORKER_POLL_SECS: u64 = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub listen_addr: String,
    /// Mount point of the CRUD routes.
    pub api_path: String,
    pub body_limit: usize,
    pub worker_max: usize,
    pub worker_poll: Duration,
    pub platform_user_type: i64,
    pub access_rules_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: "postgres://localhost/estate".into(),
            listen_addr: DEFAULT_LISTEN_ADDR.into(),
            api_path: DEFAULT_API_PATH.into(),
            body_limit: DEFAULT_BODY_LIMIT,
            worker_max: DEFAULT_WORKER_MAX,
            worker_poll: Duration::from_secs(DEFAULT_WORKER_POLL_SECS),
            platform_user_type: PLATFORM_USER_TYPE,
            access_rules_path: None,
        }
    }
}

impl Settings {
    /// Read from the process environment. Unset keys take their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let d = Settings::default();
        Ok(Settings {
            database_url: get("DATABASE_URL").unwrap_or(d.database_url),
            listen_addr: get("LISTEN_ADDR").unwrap_or(d.listen_addr),
            api_path: get("API_PATH")
                .map(|p| p.trim_end_matches('/').to_string())
                .unwrap_or(d.api_path),
            body_limit: parsed("BODY_LIMIT_BYTES", get("BODY_LIMIT_BYTES"))?.unwrap_or(d.body_limit),
            worker_max: parsed("WORKER_MAX", get("WORKER_MAX"))?.unwrap_or(d.worker_max),
            worker_poll: parsed("WORKER_POLL_SECS", get("WORKER_POLL_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(d.worker_poll),
            platform_user_type: parsed("PLATFORM_USER_TYPE", get("PLATFORM_USER_TYPE"))?
                .unwrap_or(d.platform_user_type),
            access_rules_path: get("ACCESS_RULES_PATH").map(PathBuf::from),
        })
    }
}

fn parsed<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|v| {
        v.trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: v.clone() })
    })
    .transpose()
}
