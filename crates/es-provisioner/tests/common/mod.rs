#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use es_provisioner::es::EsOptions;
use serde_json::{Map, Value, json};
use tokio::task::JoinHandle;

pub const ADMIN_USER: &str = "elastic";
pub const ADMIN_PASSWORD: &str = "admin-secret";

#[derive(Default)]
pub struct EsState {
    pub indices: HashSet<String>,
    /// alias -> concrete index
    pub aliases: HashMap<String, String>,
    pub roles: HashMap<String, Value>,
    /// user -> (password, roles)
    pub users: HashMap<String, (String, Vec<String>)>,
    /// `METHOD /path` for every request, in arrival order
    pub log: Vec<String>,
    /// Last JSON body received per path
    pub bodies: HashMap<String, Value>,
    /// Role PUTs still to be answered with `role_failure_status`
    pub role_failures: u32,
    pub role_failure_status: u16,
    /// Answer deletes with this status instead of handling them
    pub delete_failure_status: Option<u16>,
    /// Refuse index reads made with tenant credentials
    pub reject_user_reads: bool,
}

pub type Shared = Arc<Mutex<EsState>>;

pub struct FakeEs {
    pub state: Shared,
    pub url: String,
    handle: JoinHandle<()>,
}

impl FakeEs {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(EsState::default()));
        let app = Router::new()
            .route("/", get(root))
            .route("/{index}", put(create_index).get(get_index).delete(delete_index))
            .route("/_alias/{alias}", get(get_alias))
            .route("/{index}/_alias/{alias}", put(put_alias).delete(delete_alias))
            .route("/_security/role/{name}", put(put_role).delete(delete_role))
            .route("/_security/user/{name}", put(put_user).delete(delete_user))
            .layer(axum::middleware::from_fn_with_state(state.clone(), record))
            .with_state(state.clone());
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let local = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Self {
            state,
            url: format!("http://{local}"),
            handle,
        }
    }

    pub fn options(&self, retries: u32) -> EsOptions {
        EsOptions {
            addresses: vec![self.url.clone()],
            retries,
            username: Some(ADMIN_USER.into()),
            password: Some(ADMIN_PASSWORD.into()),
            connect_backoff: Duration::from_millis(1),
            retry_backoff_unit: Duration::from_millis(1),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut EsState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

impl Drop for FakeEs {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn record(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    state
        .lock()
        .unwrap()
        .log
        .push(format!("{} {}", method, uri.path()));
    next.run(req).await
}

fn error(status: u16, kind: &str) -> Response {
    let code = StatusCode::from_u16(status).unwrap();
    (
        code,
        Json(json!({"error": {"type": kind, "reason": kind}, "status": status})),
    )
        .into_response()
}

fn ok(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let decoded = STANDARD.decode(raw.strip_prefix("Basic ")?).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, pw) = text.split_once(':')?;
    Some((user.to_string(), pw.to_string()))
}

fn parse(body: &Bytes) -> Value {
    if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(body).unwrap_or(Value::Null)
    }
}

async fn root() -> Response {
    ok(json!({"tagline": "You Know, for Search"}))
}

async fn create_index(
    State(state): State<Shared>,
    Path(index): Path<String>,
    body: Bytes,
) -> Response {
    let mut s = state.lock().unwrap();
    s.bodies.insert(format!("/{index}"), parse(&body));
    if !s.indices.insert(index) {
        return error(400, "resource_already_exists_exception");
    }
    ok(json!({"acknowledged": true}))
}

async fn get_index(
    State(state): State<Shared>,
    Path(index): Path<String>,
    headers: HeaderMap,
) -> Response {
    let s = state.lock().unwrap();
    let authorized = match credentials(&headers) {
        Some((user, _)) if user == ADMIN_USER => true,
        Some((user, pw)) => {
            !s.reject_user_reads
                && s.users
                    .get(&user)
                    .is_some_and(|(expected, _)| *expected == pw)
        }
        None => false,
    };
    if !authorized {
        return error(401, "security_exception");
    }
    if !s.indices.contains(&index) {
        return error(404, "index_not_found_exception");
    }
    ok(json!({"index": index}))
}

async fn delete_index(State(state): State<Shared>, Path(index): Path<String>) -> Response {
    let mut s = state.lock().unwrap();
    if let Some(status) = s.delete_failure_status {
        return error(status, "internal_server_error");
    }
    if !s.indices.remove(&index) {
        return error(404, "index_not_found_exception");
    }
    s.aliases.retain(|_, target| *target != index);
    ok(json!({"acknowledged": true}))
}

async fn get_alias(State(state): State<Shared>, Path(alias): Path<String>) -> Response {
    let s = state.lock().unwrap();
    match s.aliases.get(&alias) {
        Some(index) => {
            let mut aliases = Map::new();
            aliases.insert(alias.clone(), json!({}));
            let mut body = Map::new();
            body.insert(index.clone(), json!({ "aliases": aliases }));
            ok(Value::Object(body))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("alias [{alias}] missing"), "status": 404})),
        )
            .into_response(),
    }
}

async fn put_alias(
    State(state): State<Shared>,
    Path((index, alias)): Path<(String, String)>,
) -> Response {
    let mut s = state.lock().unwrap();
    if !s.indices.contains(&index) {
        return error(404, "index_not_found_exception");
    }
    s.aliases.insert(alias, index);
    ok(json!({"acknowledged": true}))
}

async fn delete_alias(
    State(state): State<Shared>,
    Path((index, alias)): Path<(String, String)>,
) -> Response {
    let mut s = state.lock().unwrap();
    if let Some(status) = s.delete_failure_status {
        return error(status, "internal_server_error");
    }
    if s.aliases.get(&alias) != Some(&index) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("alias [{alias}] missing"), "status": 404})),
        )
            .into_response();
    }
    s.aliases.remove(&alias);
    ok(json!({"acknowledged": true}))
}

async fn put_role(
    State(state): State<Shared>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let mut s = state.lock().unwrap();
    if s.role_failures > 0 {
        s.role_failures -= 1;
        let status = s.role_failure_status;
        return error(status, "es_rejected_execution_exception");
    }
    let body = parse(&body);
    s.bodies.insert(format!("/_security/role/{name}"), body.clone());
    let created = s.roles.insert(name, body).is_none();
    ok(json!({"role": {"created": created}}))
}

async fn delete_role(State(state): State<Shared>, Path(name): Path<String>) -> Response {
    let mut s = state.lock().unwrap();
    if s.roles.remove(&name).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({"found": false}))).into_response();
    }
    ok(json!({"found": true}))
}

async fn put_user(
    State(state): State<Shared>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let mut s = state.lock().unwrap();
    let body = parse(&body);
    let password = body["password"].as_str().unwrap_or_default().to_string();
    let roles = body["roles"]
        .as_array()
        .map(|r| {
            r.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    s.bodies.insert(format!("/_security/user/{name}"), body);
    let created = s.users.insert(name, (password, roles)).is_none();
    ok(json!({"created": created}))
}

async fn delete_user(State(state): State<Shared>, Path(name): Path<String>) -> Response {
    let mut s = state.lock().unwrap();
    if s.users.remove(&name).is_none() {
        return (StatusCode::NOT_FOUND, Json(json!({"found": false}))).into_response();
    }
    ok(json!({"found": true}))
}
