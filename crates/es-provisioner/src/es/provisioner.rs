use async_trait::async_trait;
use rand::{Rng, distr::Alphanumeric};
use reqwest::Method;
use serde_json::{Map, Value};
use time::{Date, OffsetDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::EsError;
use crate::es::connection::{EsConnection, EsOptions, EsResponse};
use crate::es::model::{CreateIndexBody, IndexParams, RoleBody, UserBody, schema_body};

pub const NAME_PREFIX: &str = "es-provisioner-";

const ALREADY_EXISTS: &str = "resource_already_exists_exception";
const PASSWORD_LEN: usize = 32;
const RANDOM_ID_LEN: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub application: String,
    pub index_name: Option<String>,
    pub namespace: Option<String>,
    pub params: IndexParams,
    /// Full create-index body supplied from outside; replaces `params`
    pub schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResult {
    pub username: String,
    pub password: String,
    pub role: String,
    pub index: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOptions {
    pub index: String,
    pub alias: String,
    pub role: String,
    pub user: String,
}

/// Backend capability the reconciler depends on.
#[async_trait]
pub trait EsService: Send + Sync {
    async fn initialize_index(&self, ops: &SetupOptions) -> Result<ProvisionResult, EsError>;
    async fn remove_index(&self, ops: &RemoveOptions) -> Result<(), EsError>;
}

/// Alias name: explicit name, else `es-provisioner-<app>-<namespace>`, else a
/// random identifier.
pub fn resolve_name(ops: &SetupOptions) -> String {
    if let Some(name) = ops.index_name.as_deref().filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    match ops.namespace.as_deref().filter(|n| !n.is_empty()) {
        Some(ns) => format!("{NAME_PREFIX}{}-{ns}", ops.application),
        None => format!("{NAME_PREFIX}{}", random_id()),
    }
}

pub fn dated_index_name(alias: &str, date: Date) -> String {
    format!(
        "{alias}-{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn role_name(application: &str, namespace: Option<&str>) -> String {
    match namespace.filter(|n| !n.is_empty()) {
        Some(ns) => format!("{application}-{ns}-role"),
        None => format!("{application}-role"),
    }
}

pub fn user_name(role: &str) -> String {
    format!("{role}-user")
}

pub fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

fn random_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_ID_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn index_body(ops: &SetupOptions) -> Result<Value, EsError> {
    match ops.schema.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(schema) => schema_body(schema, &ops.params),
        None => serde_json::to_value(CreateIndexBody::from_params(&ops.params)?).map_err(
            |source| EsError::InvalidJson {
                what: "request body",
                source,
            },
        ),
    }
}

fn already_exists(res: &EsResponse) -> bool {
    (res.status == 400 || res.status == 409) && res.error_type().as_deref() == Some(ALREADY_EXISTS)
}

/// `EsService` backed by a live cluster connection.
pub struct EsProvisioner {
    conn: EsConnection,
    opts: EsOptions,
    cancel: CancellationToken,
}

impl EsProvisioner {
    /// Connects with retry, then pings once so an unreachable cluster fails
    /// at startup.
    pub async fn connect(opts: EsOptions, cancel: CancellationToken) -> Result<Self, EsError> {
        info!(addresses = ?opts.addresses, "connecting to elasticsearch");
        let conn = EsConnection::connect_with_retry(&opts).await?;
        conn.ping().await?;
        Ok(Self { conn, opts, cancel })
    }

    fn checkpoint(&self, step: &'static str) -> Result<(), EsError> {
        if self.cancel.is_cancelled() {
            warn!(step, "shutdown requested, abandoning saga");
            return Err(EsError::Cancelled(step));
        }
        Ok(())
    }

    /// Concrete index the alias already points at, if any. Reusing it keeps a
    /// re-run on a later day from spreading the alias over two indices.
    async fn alias_target(&self, alias: &str) -> Result<Option<String>, EsError> {
        let res = self
            .conn
            .send_empty(Method::GET, &format!("/_alias/{alias}"))
            .await?;
        if res.status == 404 {
            return Ok(None);
        }
        if !res.is_success() {
            return Err(res.into_error("resolve alias"));
        }
        let targets: Map<String, Value> =
            serde_json::from_str(&res.body).map_err(|source| EsError::InvalidJson {
                what: "alias lookup response",
                source,
            })?;
        Ok(targets.keys().max().cloned())
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), EsError> {
        info!(index, "creating index");
        let res = self
            .conn
            .send_json(Method::PUT, &format!("/{index}"), body)
            .await?;
        if res.is_success() {
            return Ok(());
        }
        if already_exists(&res) {
            info!(index, "index already exists");
            return Ok(());
        }
        Err(res.into_error("create index"))
    }

    async fn put_alias(&self, index: &str, alias: &str) -> Result<(), EsError> {
        info!(index, alias, "creating alias");
        let res = self
            .conn
            .send_empty(Method::PUT, &format!("/{index}/_alias/{alias}"))
            .await?;
        if res.is_success() {
            return Ok(());
        }
        if already_exists(&res) {
            info!(alias, "alias already exists");
            return Ok(());
        }
        Err(res.into_error("create alias"))
    }

    async fn put_role(&self, role: &str, index: &str, alias: &str) -> Result<(), EsError> {
        info!(role, "creating role");
        let res = self
            .conn
            .send_json(
                Method::PUT,
                &format!("/_security/role/{role}"),
                &RoleBody::scoped_to(index, alias),
            )
            .await?;
        if !res.is_success() {
            return Err(res.into_error("create role"));
        }
        Ok(())
    }

    async fn put_user(&self, user: &str, role: &str, password: &str) -> Result<(), EsError> {
        info!(user, "creating user");
        let body = UserBody {
            password: password.to_string(),
            roles: vec![role.to_string()],
            full_name: user.to_string(),
        };
        let res = self
            .conn
            .send_json(Method::PUT, &format!("/_security/user/{user}"), &body)
            .await?;
        if !res.is_success() {
            return Err(res.into_error("create user"));
        }
        Ok(())
    }

    /// Reads the index through a fresh connection using the new credentials.
    async fn verify(&self, index: &str, user: &str, password: &str) -> Result<(), EsError> {
        info!(index, user, "testing credentials");
        let conn = EsConnection::connect(&self.opts.as_user(user, password))?;
        let res = conn.send_empty(Method::GET, &format!("/{index}")).await?;
        if !res.is_success() {
            return Err(res.into_error("verify credentials"));
        }
        Ok(())
    }

    async fn delete_tolerant(&self, op: &'static str, path: &str) -> Result<(), EsError> {
        let res = self.conn.send_empty(Method::DELETE, path).await?;
        if res.is_success() {
            return Ok(());
        }
        if res.status == 404 {
            info!(op, path, "already absent");
            return Ok(());
        }
        Err(res.into_error(op))
    }
}

#[async_trait]
impl EsService for EsProvisioner {
    async fn initialize_index(&self, ops: &SetupOptions) -> Result<ProvisionResult, EsError> {
        let body = index_body(ops)?;
        let alias = resolve_name(ops);

        self.checkpoint("index creation")?;
        let index = match self.alias_target(&alias).await? {
            Some(existing) => {
                info!(index = %existing, %alias, "alias already assigned, reusing its index");
                existing
            }
            None => dated_index_name(&alias, today()),
        };
        self.create_index(&index, &body).await?;

        self.checkpoint("alias creation")?;
        self.put_alias(&index, &alias).await?;

        let role = role_name(&ops.application, ops.namespace.as_deref());
        self.checkpoint("role creation")?;
        self.put_role(&role, &index, &alias).await?;

        let username = user_name(&role);
        let password = generate_password();
        self.checkpoint("user creation")?;
        self.put_user(&username, &role, &password).await?;

        self.checkpoint("credential verification")?;
        self.verify(&index, &username, &password).await?;

        info!(%index, %alias, %role, user = %username, "tenant provisioned");
        Ok(ProvisionResult {
            username,
            password,
            role,
            index,
            alias,
        })
    }

    async fn remove_index(&self, ops: &RemoveOptions) -> Result<(), EsError> {
        self.checkpoint("alias deletion")?;
        info!(alias = %ops.alias, "deleting alias");
        self.delete_tolerant("delete alias", &format!("/{}/_alias/{}", ops.index, ops.alias))
            .await?;

        self.checkpoint("index deletion")?;
        info!(index = %ops.index, "deleting index");
        self.delete_tolerant("delete index", &format!("/{}", ops.index))
            .await?;

        self.checkpoint("user deletion")?;
        info!(user = %ops.user, "deleting user");
        self.delete_tolerant("delete user", &format!("/_security/user/{}", ops.user))
            .await?;

        self.checkpoint("role deletion")?;
        info!(role = %ops.role, "deleting role");
        self.delete_tolerant("delete role", &format!("/_security/role/{}", ops.role))
            .await?;

        info!(index = %ops.index, "tenant deprovisioned");
        Ok(())
    }
}
