use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EsError;

pub const DEFAULT_SHARDS: u32 = 4;
pub const DEFAULT_REFRESH_INTERVAL: &str = "30s";
pub const DEFAULT_ANALYZER: &str = "standard";

pub const ROLE_PRIVILEGES: [&str; 6] = [
    "create",
    "create_doc",
    "index",
    "read",
    "write",
    "view_index_metadata",
];

#[derive(Debug, Serialize, PartialEq)]
pub struct CreateIndexBody {
    pub settings: IndexSettings,
    pub mappings: IndexMappings,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IndexSettings {
    #[serde(rename = "index.number_of_shards")]
    pub number_of_shards: u32,
    #[serde(rename = "index.number_of_replicas")]
    pub number_of_replicas: u32,
    #[serde(rename = "index.refresh_interval")]
    pub refresh_interval: String,
    pub analysis: Analysis,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Analysis {
    pub analyzer: AnalyzerSet,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AnalyzerSet {
    pub default: AnalyzerType,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AnalyzerType {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IndexMappings {
    #[serde(rename = "_source")]
    pub source: SourceField,
    pub dynamic: &'static str,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SourceField {
    pub enabled: bool,
}

/// Parameters taken from the request; `None` falls back to the defaults above.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexParams {
    pub shards: Option<u32>,
    pub replicas: Option<u32>,
    pub refresh_interval: Option<String>,
    pub analyzer: Option<String>,
    pub source_enabled: bool,
    pub properties: Option<String>,
}

impl CreateIndexBody {
    pub fn from_params(p: &IndexParams) -> Result<Self, EsError> {
        Ok(Self {
            settings: IndexSettings {
                number_of_shards: p.shards.filter(|s| *s > 0).unwrap_or(DEFAULT_SHARDS),
                number_of_replicas: p.replicas.unwrap_or_default(),
                refresh_interval: p
                    .refresh_interval
                    .clone()
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| DEFAULT_REFRESH_INTERVAL.to_string()),
                analysis: Analysis {
                    analyzer: AnalyzerSet {
                        default: AnalyzerType {
                            kind: p
                                .analyzer
                                .clone()
                                .filter(|a| !a.is_empty())
                                .unwrap_or_else(|| DEFAULT_ANALYZER.to_string()),
                        },
                    },
                },
            },
            mappings: IndexMappings {
                source: SourceField {
                    enabled: p.source_enabled,
                },
                dynamic: "strict",
                properties: parse_properties(p.properties.as_deref())?,
            },
        })
    }
}

/// Accepts `{"title": {...}}` or the bare `"title": {...}` fragment.
pub fn parse_properties(raw: Option<&str>) -> Result<Map<String, Value>, EsError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    let text = if raw.starts_with('{') {
        raw.to_string()
    } else {
        format!("{{{raw}}}")
    };
    serde_json::from_str(&text).map_err(|source| EsError::InvalidJson {
        what: "mapping properties",
        source,
    })
}

/// Parses an externally supplied create-index body. Explicit shard, replica
/// and refresh values from the request replace those in the blob.
pub fn schema_body(schema: &str, p: &IndexParams) -> Result<Value, EsError> {
    let mut body: Value = serde_json::from_str(schema).map_err(|source| EsError::InvalidJson {
        what: "index schema",
        source,
    })?;
    let settings = body
        .as_object_mut()
        .ok_or_else(|| invalid_schema("expected a JSON object"))?
        .entry("settings")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| invalid_schema("settings must be a JSON object"))?;
    let overrides = [
        ("index.number_of_shards", p.shards.map(Value::from)),
        ("index.number_of_replicas", p.replicas.map(Value::from)),
        (
            "index.refresh_interval",
            p.refresh_interval.clone().map(Value::from),
        ),
    ];
    for (key, value) in overrides {
        if let Some(value) = value {
            settings.insert(key.to_string(), value);
        }
    }
    Ok(body)
}

fn invalid_schema(msg: &str) -> EsError {
    EsError::InvalidJson {
        what: "index schema",
        source: serde::de::Error::custom(msg),
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RoleBody {
    pub indices: Vec<IndexPrivileges>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IndexPrivileges {
    pub names: Vec<String>,
    pub privileges: Vec<&'static str>,
}

impl RoleBody {
    pub fn scoped_to(index: &str, alias: &str) -> Self {
        Self {
            indices: vec![IndexPrivileges {
                names: vec![index.to_string(), alias.to_string()],
                privileges: ROLE_PRIVILEGES.to_vec(),
            }],
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct UserBody {
    pub password: String,
    pub roles: Vec<String>,
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: Option<ErrorDetail>,
}

/// Elasticsearch reports `error` as an object, or as a plain string for a
/// few older endpoints.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Object {
        #[serde(rename = "type")]
        kind: Option<String>,
    },
    Text(String),
}

impl ErrorEnvelope {
    pub fn error_type(&self) -> Option<String> {
        match self.error.as_ref()? {
            ErrorDetail::Object { kind } => kind.clone(),
            ErrorDetail::Text(t) => Some(t.clone()),
        }
    }
}
