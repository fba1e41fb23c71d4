use std::time::Duration;

use reqwest::{Method, Url};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EsError;
use crate::es::model::ErrorEnvelope;

/// Statuses retried by `execute`; anything else is returned to the caller.
pub const RETRY_ON_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct EsOptions {
    pub addresses: Vec<String>,
    pub retries: u32,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Initial sleep between connection attempts, doubled after each one
    pub connect_backoff: Duration,
    /// Retry `n` of a request waits `retry_backoff_unit * 2^n`
    pub retry_backoff_unit: Duration,
}

impl EsOptions {
    /// Same cluster and retry policy, authenticating as another user.
    pub fn as_user(&self, username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..self.clone()
        }
    }
}

#[derive(Debug)]
pub struct EsResponse {
    pub status: u16,
    pub body: String,
}

impl EsResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `error.type` of an Elasticsearch error body, if there is one.
    pub fn error_type(&self) -> Option<String> {
        serde_json::from_str::<ErrorEnvelope>(&self.body)
            .ok()
            .and_then(|e| e.error_type())
    }

    pub fn into_error(self, op: &'static str) -> EsError {
        EsError::Api {
            op,
            status: self.status,
            body: self.body,
        }
    }
}

pub fn retry_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(2u32.saturating_pow(attempt))
}

#[derive(Debug, Clone)]
pub struct EsConnection {
    http: reqwest::Client,
    addresses: Vec<Url>,
    username: Option<String>,
    password: Option<String>,
    max_retries: u32,
    backoff_unit: Duration,
}

impl EsConnection {
    pub fn connect(opts: &EsOptions) -> Result<Self, EsError> {
        if opts.addresses.is_empty() {
            return Err(EsError::NoAddress);
        }
        let addresses = opts
            .addresses
            .iter()
            .map(|a| {
                Url::parse(a).map_err(|e| EsError::InvalidAddress {
                    address: a.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        debug!(addresses = ?opts.addresses, username = ?opts.username, "built elasticsearch client");
        Ok(Self {
            http,
            addresses,
            username: opts.username.clone(),
            password: opts.password.clone(),
            max_retries: opts.retries,
            backoff_unit: opts.retry_backoff_unit,
        })
    }

    pub async fn connect_with_retry(opts: &EsOptions) -> Result<Self, EsError> {
        let attempts = opts.retries.max(1);
        let mut sleep = opts.connect_backoff;
        let mut last = String::new();
        for attempt in 0..attempts {
            if attempt > 0 {
                warn!(attempt, error = %last, delay_ms = sleep.as_millis() as u64, "retrying connection");
                tokio::time::sleep(sleep).await;
                sleep = sleep.saturating_mul(2);
            }
            match Self::connect(opts) {
                Ok(conn) => return Ok(conn),
                Err(e) => last = e.to_string(),
            }
        }
        Err(EsError::ConnectExhausted { attempts, last })
    }

    pub async fn ping(&self) -> Result<(), EsError> {
        let res = self.send_empty(Method::GET, "/").await?;
        if !res.is_success() {
            return Err(res.into_error("ping"));
        }
        debug!("elasticsearch ping ok");
        Ok(())
    }

    pub async fn send_empty(&self, method: Method, path: &str) -> Result<EsResponse, EsError> {
        self.execute(method, path, None).await
    }

    pub async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<EsResponse, EsError> {
        let bytes = serde_json::to_vec(body).map_err(|source| EsError::InvalidJson {
            what: "request body",
            source,
        })?;
        self.execute(method, path, Some(bytes)).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<EsResponse, EsError> {
        let mut attempt = 0u32;
        loop {
            let base = &self.addresses[attempt as usize % self.addresses.len()];
            let url = format!(
                "{}/{}",
                base.as_str().trim_end_matches('/'),
                path.trim_start_matches('/')
            );
            let mut req = self.http.request(method.clone(), &url);
            if let Some(user) = &self.username {
                req = req.basic_auth(user, self.password.as_deref());
            }
            if let Some(bytes) = &body {
                req = req
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(bytes.clone());
            }

            let retryable = match req.send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await?;
                    let res = EsResponse { status, body };
                    if !RETRY_ON_STATUS.contains(&status) || attempt >= self.max_retries {
                        return Ok(res);
                    }
                    format!("status {status}")
                }
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.max_retries => {
                    e.to_string()
                }
                Err(e) => return Err(e.into()),
            };

            attempt += 1;
            let delay = retry_delay(self.backoff_unit, attempt);
            warn!(%method, %url, attempt, reason = %retryable, delay_ms = delay.as_millis() as u64, "transient backend error, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}
