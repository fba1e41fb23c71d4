use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams},
    runtime::controller::{Action, Controller},
};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    crds::index::{Index, IndexPhase, IndexStatus},
    error::ReconcileError,
    es::{EsService, SetupOptions, model::IndexParams, provisioner::resolve_name},
    secret::{self, CredentialSecret},
};

pub const FINALIZER: &str = "index.es-provisioner.dev/finalizer";
pub const CONFIG_MAP_KEY: &str = "mapping.json";

const FIELD_MANAGER: &str = "es-provisioner";

pub struct Ctx {
    pub client: Client,
    pub es: Arc<dyn EsService>,
}

pub fn controller(client: Client, namespace: Option<&str>) -> Controller<Index> {
    let api: Api<Index> = match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    Controller::new(api, Default::default()).shutdown_on_signal()
}

/// Platform side effects of a reconcile, scoped to one `Index`.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn add_finalizer(&self, idx: &Index) -> Result<(), ReconcileError>;
    async fn remove_finalizer(&self, idx: &Index) -> Result<(), ReconcileError>;
    async fn set_status(&self, idx: &Index, status: &IndexStatus) -> Result<(), ReconcileError>;
    /// Create-index body stored under `mapping.json` in the named ConfigMap.
    async fn schema(&self, idx: &Index, config_map: &str) -> Result<String, ReconcileError>;
    async fn read_credentials(&self, idx: &Index)
    -> Result<Option<CredentialSecret>, ReconcileError>;
    async fn write_credentials(
        &self,
        idx: &Index,
        cred: &CredentialSecret,
    ) -> Result<(), ReconcileError>;
    async fn delete_credentials(&self, idx: &Index) -> Result<(), ReconcileError>;
}

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, idx: &Index) -> Result<Api<K>, ReconcileError>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        let ns = idx
            .namespace()
            .ok_or_else(|| anyhow::anyhow!("index {} has no namespace", idx.name_any()))?;
        Ok(Api::namespaced(self.client.clone(), &ns))
    }

    async fn patch_finalizers(&self, idx: &Index, finals: Vec<String>) -> Result<(), ReconcileError> {
        let api: Api<Index> = self.api(idx)?;
        let pp = PatchParams::default();
        let patch = serde_json::json!({"metadata": {"finalizers": finals}});
        let _ = api.patch(&idx.name_any(), &pp, &Patch::Merge(&patch)).await?;
        Ok(())
    }
}

#[async_trait]
impl IndexStore for KubeStore {
    async fn add_finalizer(&self, idx: &Index) -> Result<(), ReconcileError> {
        let mut finals: Vec<String> = idx.finalizers().to_vec();
        finals.push(FINALIZER.to_string());
        self.patch_finalizers(idx, finals).await
    }

    async fn remove_finalizer(&self, idx: &Index) -> Result<(), ReconcileError> {
        let finals: Vec<String> = idx
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        self.patch_finalizers(idx, finals).await
    }

    async fn set_status(&self, idx: &Index, status: &IndexStatus) -> Result<(), ReconcileError> {
        let api: Api<Index> = self.api(idx)?;
        let pp = PatchParams::apply(FIELD_MANAGER);
        let _ = api
            .patch_status(
                &idx.name_any(),
                &pp,
                &Patch::Merge(serde_json::json!({ "status": status })),
            )
            .await?;
        Ok(())
    }

    async fn schema(&self, idx: &Index, config_map: &str) -> Result<String, ReconcileError> {
        let api: Api<ConfigMap> = self.api(idx)?;
        let cm = api.get(config_map).await?;
        cm.data
            .and_then(|mut d| d.remove(CONFIG_MAP_KEY))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ReconcileError::MissingConfigKey {
                name: config_map.to_string(),
                key: CONFIG_MAP_KEY,
            })
    }

    async fn read_credentials(
        &self,
        idx: &Index,
    ) -> Result<Option<CredentialSecret>, ReconcileError> {
        let api: Api<Secret> = self.api(idx)?;
        secret::fetch(&api).await
    }

    async fn write_credentials(
        &self,
        idx: &Index,
        cred: &CredentialSecret,
    ) -> Result<(), ReconcileError> {
        let api: Api<Secret> = self.api(idx)?;
        secret::materialize(&api, cred).await
    }

    async fn delete_credentials(&self, idx: &Index) -> Result<(), ReconcileError> {
        let api: Api<Secret> = self.api(idx)?;
        secret::delete(&api).await
    }
}

pub async fn reconcile(idx: Arc<Index>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let store = KubeStore::new(ctx.client.clone());
    reconcile_index(&idx, &store, ctx.es.as_ref()).await
}

pub fn error_policy(idx: Arc<Index>, err: &ReconcileError, _ctx: Arc<Ctx>) -> Action {
    error!(index = %idx.name_any(), error = ?err, "index reconcile failed");
    Action::requeue(Duration::from_secs(60))
}

/// One pass of the state machine for a single `Index`.
pub async fn reconcile_index<S, E>(idx: &Index, store: &S, es: &E) -> Result<Action, ReconcileError>
where
    S: IndexStore + ?Sized,
    E: EsService + ?Sized,
{
    let name = idx.name_any();
    debug!(index = %name, phase = ?idx.phase(), "reconciling");

    // Handle deletion via finalizer
    if idx.metadata.deletion_timestamp.is_some() {
        if has_finalizer(idx) {
            if let Err(e) = deprovision(idx, store, es).await {
                return Err(fail(store, idx, e).await);
            }
            if let Err(e) = store.remove_finalizer(idx).await {
                return Err(fail(store, idx, e).await);
            }
            info!(index = %name, "finalizer removed");
        }
        return Ok(Action::await_change());
    }

    // The finalizer must be in place before anything is created in the cluster
    if !has_finalizer(idx) {
        if let Err(e) = store.add_finalizer(idx).await {
            return Err(fail(store, idx, e).await);
        }
    }

    match idx.phase() {
        None | Some(IndexPhase::Creating) | Some(IndexPhase::Created) => {
            match already_provisioned(idx, store).await {
                Ok(true) => {
                    info!(index = %name, "credentials already written, marking ready");
                    set_phase(store, idx, IndexPhase::Ready, None).await;
                    Ok(Action::await_change())
                }
                Ok(false) => provision(idx, store, es).await,
                Err(e) => Err(fail(store, idx, e).await),
            }
        }
        Some(IndexPhase::Error) if idx.spec_changed() => {
            info!(index = %name, "spec changed since last failure, retrying");
            provision(idx, store, es).await
        }
        Some(phase) => {
            debug!(index = %name, ?phase, "nothing to do");
            Ok(Action::await_change())
        }
    }
}

fn has_finalizer(idx: &Index) -> bool {
    idx.finalizers().iter().any(|f| f == FINALIZER)
}

/// A status snapshot older than the last successful run still reads as
/// unfinished; the credential Secret for this alias shows the run completed.
async fn already_provisioned<S>(idx: &Index, store: &S) -> Result<bool, ReconcileError>
where
    S: IndexStore + ?Sized,
{
    let alias = resolve_name(&setup_options(idx, None));
    Ok(store
        .read_credentials(idx)
        .await?
        .is_some_and(|cred| cred.alias == alias))
}

async fn provision<S, E>(idx: &Index, store: &S, es: &E) -> Result<Action, ReconcileError>
where
    S: IndexStore + ?Sized,
    E: EsService + ?Sized,
{
    let name = idx.name_any();
    set_phase(store, idx, IndexPhase::Creating, None).await;

    let schema = match idx.spec.config_map.as_deref().filter(|c| !c.is_empty()) {
        Some(cm) => match store.schema(idx, cm).await {
            Ok(schema) => Some(schema),
            Err(e) => return Err(fail(store, idx, e).await),
        },
        None => None,
    };

    let ops = setup_options(idx, schema);
    info!(index = %name, application = %ops.application, "provisioning tenant in elasticsearch");
    let result = match es.initialize_index(&ops).await {
        Ok(r) => r,
        Err(e) => return Err(fail(store, idx, e).await),
    };
    set_phase(store, idx, IndexPhase::Created, None).await;

    info!(index = %name, es_index = %result.index, "tenant provisioned, creating secret");
    if let Err(e) = store
        .write_credentials(idx, &CredentialSecret::from(result))
        .await
    {
        return Err(fail(store, idx, e).await);
    }

    set_phase(store, idx, IndexPhase::Ready, None).await;
    info!(index = %name, "provisioning completed");
    Ok(Action::await_change())
}

async fn deprovision<S, E>(idx: &Index, store: &S, es: &E) -> Result<(), ReconcileError>
where
    S: IndexStore + ?Sized,
    E: EsService + ?Sized,
{
    let name = idx.name_any();
    let Some(cred) = store.read_credentials(idx).await? else {
        warn!(index = %name, "no credential secret found, nothing recorded to clean up");
        return Ok(());
    };
    info!(index = %name, alias = %cred.alias, "deleting tenant resources");
    es.remove_index(&cred.remove_options()).await?;
    store.delete_credentials(idx).await?;
    info!(index = %name, "clean up completed");
    Ok(())
}

pub fn setup_options(idx: &Index, schema: Option<String>) -> SetupOptions {
    let spec = &idx.spec;
    SetupOptions {
        application: spec.application.clone(),
        index_name: spec.name.clone(),
        namespace: idx.namespace(),
        params: IndexParams {
            shards: spec.number_of_shards,
            replicas: spec.number_of_replicas,
            refresh_interval: spec.refresh_interval.clone(),
            analyzer: spec.analyzers.clone(),
            source_enabled: spec.source_enabled,
            properties: spec.properties.clone(),
        },
        schema,
    }
}

/// Status writes are best effort; a failure is logged and the run goes on.
async fn set_phase<S>(store: &S, idx: &Index, phase: IndexPhase, message: Option<String>)
where
    S: IndexStore + ?Sized,
{
    let status = IndexStatus {
        index_status: Some(phase),
        message,
        observed_generation: idx.metadata.generation,
    };
    if let Err(e) = store.set_status(idx, &status).await {
        error!(index = %idx.name_any(), ?phase, error = %e, "error updating status");
    }
}

async fn fail<S>(store: &S, idx: &Index, err: impl Into<ReconcileError>) -> ReconcileError
where
    S: IndexStore + ?Sized,
{
    let err = err.into();
    error!(index = %idx.name_any(), error = %err, "reconcile step failed");
    set_phase(store, idx, IndexPhase::Error, Some(err.to_string())).await;
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::index::IndexSpec;

    #[test]
    fn setup_options_carry_request_parameters() {
        let mut idx = Index::new(
            "tenant",
            IndexSpec {
                application: "billing".into(),
                number_of_shards: Some(2),
                number_of_replicas: Some(1),
                analyzers: Some("english".into()),
                ..Default::default()
            },
        );
        idx.metadata.namespace = Some("prod".into());
        let ops = setup_options(&idx, None);
        assert_eq!(ops.application, "billing");
        assert_eq!(ops.namespace.as_deref(), Some("prod"));
        assert_eq!(ops.params.shards, Some(2));
        assert_eq!(ops.params.replicas, Some(1));
        assert_eq!(ops.params.analyzer.as_deref(), Some("english"));
        assert!(ops.index_name.is_none());
        assert!(ops.schema.is_none());
    }
}
