use thiserror::Error;

#[derive(Debug, Error)]
pub enum EsError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{op} failed with status {status}: {body}")]
    Api {
        op: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid {what}: {source}")]
    InvalidJson {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("after {attempts} attempts, last error: {last}")]
    ConnectExhausted { attempts: u32, last: String },
    #[error("invalid backend address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("no backend address configured")]
    NoAddress,
    #[error("cancelled before {0}")]
    Cancelled(&'static str),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Es(#[from] EsError),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("config map {name} has no key {key}")]
    MissingConfigKey { name: String, key: &'static str },
    #[error("credential secret is missing field {0}")]
    MissingSecretField(&'static str),
}
