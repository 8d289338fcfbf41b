//! Application configuration.
//!
//! Values come from the environment (a `.env` file is loaded first when
//! present). Every setting has a default except the Gmail access token,
//! which only the CLI `send` command requires.
//!
//! | Variable                    | Default                                  |
//! |-----------------------------|------------------------------------------|
//! | `MAILMERGE_PORT`            | `3000`                                   |
//! | `MAILMERGE_PACING_MS`       | `500`                                    |
//! | `MAILMERGE_MAX_BATCH_SIZE`  | `100`                                    |
//! | `MAILMERGE_TEMPLATES_PATH`  | `.mailmerge/templates.json`              |
//! | `GMAIL_API_BASE`            | `https://gmail.googleapis.com/gmail/v1`  |
//! | `GMAIL_TIMEOUT_SECS`        | `30`                                     |
//! | `GMAIL_ACCESS_TOKEN`        | (none)                                   |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::{DispatchOptions, DEFAULT_MAX_BATCH_SIZE, DEFAULT_PACING_MS};
use crate::error::ConfigError;
use crate::gmail::{GmailClient, DEFAULT_API_BASE, DEFAULT_TIMEOUT_SECS};
use crate::store::DEFAULT_STORE_PATH;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 3000;

/// Hard ceiling accepted from configuration; the delivery quota does not
/// allow more per batch.
pub const MAX_BATCH_SIZE_LIMIT: usize = 100;

/// Environment variable holding the Gmail OAuth access token.
pub const ACCESS_TOKEN_VAR: &str = "GMAIL_ACCESS_TOKEN";

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub pacing_interval: Duration,
    pub max_batch_size: usize,
    pub templates_path: PathBuf,
    pub gmail_api_base: String,
    pub gmail_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            pacing_interval: Duration::from_millis(DEFAULT_PACING_MS),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            templates_path: PathBuf::from(DEFAULT_STORE_PATH),
            gmail_api_base: DEFAULT_API_BASE.to_string(),
            gmail_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from any key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = parse_var(&lookup, "MAILMERGE_PORT")?.unwrap_or(defaults.port);
        let pacing_interval = parse_var::<u64, _>(&lookup, "MAILMERGE_PACING_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.pacing_interval);
        let max_batch_size =
            parse_var(&lookup, "MAILMERGE_MAX_BATCH_SIZE")?.unwrap_or(defaults.max_batch_size);
        let gmail_timeout = parse_var::<u64, _>(&lookup, "GMAIL_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.gmail_timeout);

        if max_batch_size == 0 || max_batch_size > MAX_BATCH_SIZE_LIMIT {
            return Err(ConfigError::InvalidValue {
                key: "MAILMERGE_MAX_BATCH_SIZE".to_string(),
                message: format!("must be between 1 and {}", MAX_BATCH_SIZE_LIMIT),
            });
        }

        Ok(Self {
            port,
            pacing_interval,
            max_batch_size,
            templates_path: lookup("MAILMERGE_TEMPLATES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.templates_path),
            gmail_api_base: lookup("GMAIL_API_BASE").unwrap_or(defaults.gmail_api_base),
            gmail_timeout,
        })
    }

    /// Dispatcher settings derived from this config.
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            pacing_interval: self.pacing_interval,
            max_batch_size: self.max_batch_size,
        }
    }

    /// Gmail client for a caller-supplied access token.
    pub fn gmail_client(&self, access_token: &str) -> GmailClient {
        GmailClient::new(access_token)
            .with_api_base(&self.gmail_api_base)
            .with_timeout(self.gmail_timeout)
    }
}

/// Read the Gmail access token from the environment.
pub fn access_token_from_env() -> Result<String, ConfigError> {
    let _ = dotenvy::dotenv();
    env::var(ACCESS_TOKEN_VAR)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(ACCESS_TOKEN_VAR.to_string()))
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}
