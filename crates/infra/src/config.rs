//! Process configuration from environment variables.
//!
//! Empty values count as unset. Unparsable values are errors rather than
//! silently falling back to defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use docflow_ai::OpenAiConfig;
use docflow_core::RetryPolicy;

use crate::jobs::DEFAULT_MAX_ATTEMPTS;
use crate::workers::{JobFailurePolicy, WorkerConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required{reason}")]
    Missing { key: &'static str, reason: String },

    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
    pub workers: usize,
    pub worker: WorkerConfig,
    /// `None` disables the attempt cap.
    pub max_attempts: Option<u32>,
    pub blob_root: PathBuf,
    pub workflows_file: Option<PathBuf>,
    /// Set when `OPENAI_API_KEY` is present; generation is disabled otherwise.
    pub openai: Option<OpenAiConfig>,
    pub generation_retry: RetryPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };

        let database_url = env.string("DATABASE_URL");
        let use_persistent_stores = env.flag("USE_PERSISTENT_STORES", false)?;
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing {
                key: "DATABASE_URL",
                reason: " when USE_PERSISTENT_STORES=true".to_string(),
            });
        }

        let workers = env.parse("DOCFLOW_WORKERS", 2usize)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                key: "DOCFLOW_WORKERS",
                value: "0".to_string(),
                reason: "at least one worker is required".to_string(),
            });
        }

        let worker = WorkerConfig {
            lease: Duration::from_secs(env.parse("DOCFLOW_LEASE_SECS", 120u64)?),
            idle_interval: Duration::from_millis(env.parse("DOCFLOW_IDLE_MS", 3000u64)?),
            error_backoff: Duration::from_millis(env.parse("DOCFLOW_ERROR_BACKOFF_MS", 1000u64)?),
            failure_policy: env.parse("DOCFLOW_JOB_FAILURE_POLICY", JobFailurePolicy::default())?,
            ..WorkerConfig::default()
        };

        let max_attempts = match env.parse("DOCFLOW_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)? {
            0 => None,
            n => Some(n),
        };

        let openai = env.string("OPENAI_API_KEY").map(|key| {
            Ok::<_, ConfigError>(
                OpenAiConfig::new(key)
                    .with_model(env.string("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()))
                    .with_base_url(
                        env.string("OPENAI_BASE_URL")
                            .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                    )
                    .with_timeout(Duration::from_secs(env.parse("OPENAI_TIMEOUT_SECS", 90u64)?)),
            )
        });
        let openai = openai.transpose()?;

        let generation_retry = RetryPolicy::exponential(
            env.parse("GENERATION_MAX_ATTEMPTS", 4u32)?.max(1),
            Duration::from_millis(env.parse("GENERATION_BASE_DELAY_MS", 500u64)?),
            Duration::from_millis(env.parse("GENERATION_MAX_DELAY_MS", 10_000u64)?),
        );

        Ok(Self {
            database_url,
            use_persistent_stores,
            workers,
            worker,
            max_attempts,
            blob_root: env
                .string("DOCFLOW_BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/blobs")),
            workflows_file: env.string("DOCFLOW_WORKFLOWS_FILE").map(PathBuf::from),
            openai,
            generation_retry,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(value) => match value.parse() {
                Ok(parsed) => Ok(parsed),
                Err(e) => Err(ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                }),
            },
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        }
    }
}
