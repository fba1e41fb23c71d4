use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use crate::es::connection::EsOptions;

const DEFAULT_RETRIES: u32 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub es_addresses: Vec<String>,
    pub es_username: Option<String>,
    pub es_password: Option<String>,
    pub retries: u32,
    pub watch_namespace: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_env_file(std::env::var("ENV").ok().as_deref());
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = non_empty("ES_URL").ok_or(ConfigError::MissingVar("ES_URL"))?;
        let es_addresses: Vec<String> = url
            .split(',')
            .map(|a| a.trim().trim_end_matches('/').to_string())
            .filter(|a| !a.is_empty())
            .collect();
        if es_addresses.is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "ES_URL",
                value: url,
            });
        }

        let retries = match non_empty("RETRIES") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: "RETRIES",
                    value: raw.clone(),
                })?,
            None => DEFAULT_RETRIES,
        };

        Ok(Self {
            es_addresses,
            es_username: non_empty("ES_USERNAME"),
            es_password: non_empty("ES_PASSWORD"),
            retries,
            watch_namespace: non_empty("WATCH_NAMESPACE"),
        })
    }

    pub fn es_options(&self) -> EsOptions {
        EsOptions {
            addresses: self.es_addresses.clone(),
            retries: self.retries,
            username: self.es_username.clone(),
            password: self.es_password.clone(),
            connect_backoff: Duration::from_secs(5),
            retry_backoff_unit: Duration::from_secs(1),
        }
    }
}

/// `/etc/<ENV>.env` when `ENV` is set, else a local `.env`. Neither has to exist.
fn load_env_file(env: Option<&str>) {
    if let Some(env) = env.filter(|e| !e.is_empty()) {
        let path = format!("/etc/{env}.env");
        if Path::new(&path).exists() {
            match dotenvy::from_path(&path) {
                Ok(()) => {
                    info!(path = %path, "loaded environment file");
                    return;
                }
                Err(e) => debug!(path = %path, error = %e, "could not load environment file"),
            }
        }
    }
    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "loaded environment file"),
        Err(e) => debug!(error = %e, "no local .env file"),
    }
}
