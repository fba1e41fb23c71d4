use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[kube(
    group = "es-provisioner.dev",
    version = "v1",
    kind = "Index",
    plural = "indices",
    namespaced,
    status = "IndexStatus",
    shortname = "esidx"
)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    /// Index name, overrides the generated `es-provisioner-<app>-<namespace>`
    pub name: Option<String>,
    /// Application name
    pub application: String,
    /// ConfigMap holding the full create-index payload under `mapping.json`
    pub config_map: Option<String>,
    pub number_of_shards: Option<u32>,
    pub number_of_replicas: Option<u32>,
    /// e.g. "30s"
    pub refresh_interval: Option<String>,
    /// Default analyzer type, e.g. "standard"
    pub analyzers: Option<String>,
    #[serde(default)]
    pub source_enabled: bool,
    /// Mapping properties, either a JSON object or the bare fragment inside one
    pub properties: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum IndexPhase {
    Creating,
    Created,
    Ready,
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub index_status: Option<IndexPhase>,
    /// Last error detail, cleared on the next transition
    pub message: Option<String>,
    /// `metadata.generation` the status was written for
    pub observed_generation: Option<i64>,
}

impl Index {
    pub fn phase(&self) -> Option<IndexPhase> {
        self.status.as_ref().and_then(|s| s.index_status)
    }

    /// True once the spec was edited after the status was last written.
    pub fn spec_changed(&self) -> bool {
        let observed = self.status.as_ref().and_then(|s| s.observed_generation);
        observed.is_some() && observed != self.metadata.generation
    }
}
