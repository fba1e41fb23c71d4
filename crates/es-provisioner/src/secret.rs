use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube::api::{DeleteParams, PostParams};
use tracing::info;

use crate::error::ReconcileError;
use crate::es::{ProvisionResult, RemoveOptions};

pub const SECRET_NAME: &str = "es-provisioner-index-secret";

const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const ALIAS: &str = "index";
const INDEX: &str = "_index";
const ROLE: &str = "role";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSecret {
    pub username: String,
    pub password: String,
    pub alias: String,
    pub index: String,
    pub role: String,
}

impl From<ProvisionResult> for CredentialSecret {
    fn from(r: ProvisionResult) -> Self {
        Self {
            username: r.username,
            password: r.password,
            alias: r.alias,
            index: r.index,
            role: r.role,
        }
    }
}

impl CredentialSecret {
    pub fn remove_options(&self) -> RemoveOptions {
        RemoveOptions {
            index: self.index.clone(),
            alias: self.alias.clone(),
            role: self.role.clone(),
            user: self.username.clone(),
        }
    }

    pub fn to_secret(&self) -> Secret {
        Secret {
            metadata: kube::core::ObjectMeta {
                name: Some(SECRET_NAME.to_string()),
                annotations: Some(BTreeMap::from([(
                    String::from("owner"),
                    String::from("es-provisioner"),
                )])),
                ..Default::default()
            },
            string_data: Some(BTreeMap::from([
                (USERNAME.to_string(), self.username.clone()),
                (PASSWORD.to_string(), self.password.clone()),
                (ALIAS.to_string(), self.alias.clone()),
                (INDEX.to_string(), self.index.clone()),
                (ROLE.to_string(), self.role.clone()),
            ])),
            ..Default::default()
        }
    }

    pub fn from_secret(sec: &Secret) -> Result<Self, ReconcileError> {
        let field = |key: &'static str| -> Result<String, ReconcileError> {
            if let Some(v) = sec.data.as_ref().and_then(|d| d.get(key)) {
                return Ok(String::from_utf8(v.0.clone())?);
            }
            sec.string_data
                .as_ref()
                .and_then(|d| d.get(key))
                .cloned()
                .ok_or(ReconcileError::MissingSecretField(key))
        };
        Ok(Self {
            username: field(USERNAME)?,
            password: field(PASSWORD)?,
            alias: field(ALIAS)?,
            index: field(INDEX)?,
            role: field(ROLE)?,
        })
    }
}

pub async fn fetch(api: &Api<Secret>) -> Result<Option<CredentialSecret>, ReconcileError> {
    match api.get_opt(SECRET_NAME).await? {
        Some(sec) => Ok(Some(CredentialSecret::from_secret(&sec)?)),
        None => Ok(None),
    }
}

/// Replaces any stale secret from an earlier attempt with a fresh one.
pub async fn materialize(api: &Api<Secret>, cred: &CredentialSecret) -> Result<(), ReconcileError> {
    delete(api).await?;
    let pp = PostParams::default();
    let _ = api.create(&pp, &cred.to_secret()).await?;
    info!(secret = SECRET_NAME, index = %cred.index, "credential secret created");
    Ok(())
}

pub async fn delete(api: &Api<Secret>) -> Result<(), ReconcileError> {
    let dp = DeleteParams::default();
    match api.delete(SECRET_NAME, &dp).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}
