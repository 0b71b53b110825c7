//! Discovery documents.
//!
//! Parses the provider's service directory and per-service discovery
//! documents into [`ServiceHandle`]s, and caches both on disk under the
//! provider root:
//!
//! ```text
//! <root>/<provider>/v1/discovery.json
//! <root>/<provider>/v1/services/<service id>.json
//! ```
//!
//! A cached file older than the metadata TTL is fetched again unless the
//! store is offline. Parsed handles are immutable and shared.

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::OnceCell;

use crate::error::{CloudqlError, CloudqlResult};
use crate::metadata::{
    Method, Parameter, ParameterLocation, Resource, Service, ServiceHandle, TypeRef,
};
use crate::schema::{OUTPUT_ONLY_MARKER, Schema, SchemaHandle, SchemaRegistry};
use crate::transport::{HttpRequest, HttpTransport, process_response};

/// Google API directory listing.
pub const GOOGLE_DIRECTORY_URL: &str = "https://www.googleapis.com/discovery/v1/apis";

const PROVIDER_SERVICE_DELIMITER: &str = ":";
const SQL_SERVICE_DELIMITER: &str = "__";
const DOC_VERSION: &str = "v1";

/// `compute:v1` -> `compute__v1`
pub fn to_sql_service_id(id: &str) -> String {
    id.replace(PROVIDER_SERVICE_DELIMITER, SQL_SERVICE_DELIMITER)
}

/// `compute__v1` -> `compute:v1`
pub fn to_provider_service_id(id: &str) -> String {
    id.replace(SQL_SERVICE_DELIMITER, PROVIDER_SERVICE_DELIMITER)
}

#[derive(Debug, Deserialize)]
struct RawDirectory {
    #[serde(default)]
    items: Vec<RawDirectoryItem>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawDirectoryItem {
    id: String,
    name: String,
    title: String,
    description: String,
    version: String,
    preferred: bool,
    discovery_rest_url: String,
    documentation_link: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawServiceDoc {
    id: String,
    name: String,
    version: String,
    title: String,
    description: String,
    base_url: String,
    root_url: String,
    service_path: String,
    documentation_link: String,
    resources: BTreeMap<String, RawResource>,
    schemas: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawResource {
    methods: BTreeMap<String, RawMethod>,
    resources: BTreeMap<String, RawResource>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawMethod {
    id: String,
    path: String,
    http_method: String,
    description: String,
    parameters: BTreeMap<String, RawParameter>,
    parameter_order: Vec<String>,
    request: Option<RawRef>,
    response: Option<RawRef>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawParameter {
    #[serde(rename = "type")]
    param_type: String,
    format: String,
    location: String,
    required: bool,
    description: String,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    #[serde(rename = "$ref")]
    reference: String,
}

/// Parse the provider's service directory.
pub fn parse_directory(bytes: &[u8]) -> CloudqlResult<Vec<Service>> {
    let raw: RawDirectory = serde_json::from_slice(bytes)
        .map_err(|e| CloudqlError::Discovery(format!("invalid service directory: {}", e)))?;
    Ok(raw
        .items
        .into_iter()
        .map(|item| Service {
            id: to_sql_service_id(&item.id),
            name: item.name,
            title: item.title,
            description: item.description,
            version: item.version,
            preferred: item.preferred,
            discovery_rest_url: item.discovery_rest_url,
            documentation_link: item.documentation_link,
        })
        .collect())
}

/// Parse a service discovery document.
///
/// `entry` is the service's directory entry when known; otherwise one is
/// derived from the document itself.
pub fn parse_service_document(bytes: &[u8], entry: Option<&Service>) -> CloudqlResult<ServiceHandle> {
    let raw: RawServiceDoc = serde_json::from_slice(bytes)
        .map_err(|e| CloudqlError::Discovery(format!("invalid discovery document: {}", e)))?;

    let mut registry = SchemaRegistry::new();
    for (name, value) in &raw.schemas {
        registry.insert(name.clone(), parse_schema(name, value));
    }

    let service_id = to_sql_service_id(&raw.id);
    let mut resources = BTreeMap::new();
    flatten_resources("", &raw.resources, &service_id, &registry, &mut resources);

    let base_url = if raw.base_url.is_empty() {
        format!("{}{}", raw.root_url, raw.service_path)
    } else {
        raw.base_url.clone()
    };

    let service = match entry {
        Some(s) => s.clone(),
        None => Service {
            id: service_id,
            name: raw.name,
            title: raw.title,
            description: raw.description,
            version: raw.version,
            preferred: true,
            discovery_rest_url: String::new(),
            documentation_link: raw.documentation_link,
        },
    };
    tracing::debug!(
        "Parsed discovery document for {} ({} resources, {} schemas)",
        service.id,
        resources.len(),
        registry.len()
    );

    Ok(ServiceHandle {
        service,
        base_url,
        resources,
        schemas: Arc::new(registry),
    })
}

fn flatten_resources(
    prefix: &str,
    raw: &BTreeMap<String, RawResource>,
    service_id: &str,
    registry: &SchemaRegistry,
    out: &mut BTreeMap<String, Resource>,
) {
    for (key, resource) in raw {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        if !resource.methods.is_empty() {
            let methods: BTreeMap<String, Method> = resource
                .methods
                .iter()
                .map(|(k, m)| (k.clone(), convert_method(k, m)))
                .collect();
            out.insert(name.clone(), build_resource(&name, service_id, methods, registry));
        }
        flatten_resources(&name, &resource.resources, service_id, registry, out);
    }
}

/// Title and description come from the schema the resource returns.
fn build_resource(
    name: &str,
    service_id: &str,
    methods: BTreeMap<String, Method>,
    registry: &SchemaRegistry,
) -> Resource {
    let described_by = ["get", "list"]
        .iter()
        .filter_map(|m| methods.get(*m))
        .chain(methods.values())
        .find_map(|m| m.response_type().or_else(|| m.request_type()))
        .map(str::to_string);

    let (title, description) = match &described_by {
        Some(type_name) => (
            type_name.clone(),
            registry
                .get(type_name)
                .map(|s| s.description.clone())
                .unwrap_or_default(),
        ),
        None => (name.to_string(), String::new()),
    };

    Resource {
        id: format!("{}.{}", service_id, name),
        name: name.to_string(),
        title,
        description,
        methods,
    }
}

fn convert_method(name: &str, raw: &RawMethod) -> Method {
    let parameters = raw
        .parameters
        .iter()
        .map(|(k, p)| {
            let location = if p.location == "path" {
                ParameterLocation::Path
            } else {
                ParameterLocation::Query
            };
            (
                k.clone(),
                Parameter {
                    name: k.clone(),
                    param_type: p.param_type.clone(),
                    format: p.format.clone(),
                    location,
                    required: p.required,
                    description: p.description.clone(),
                },
            )
        })
        .collect();

    Method {
        id: raw.id.clone(),
        name: name.to_string(),
        path: raw.path.clone(),
        http_method: raw.http_method.to_ascii_uppercase(),
        description: raw.description.clone(),
        protocol: "http".to_string(),
        parameters,
        parameter_order: raw.parameter_order.clone(),
        request: raw.request.as_ref().map(|r| TypeRef::new(&r.reference)),
        response: raw.response.as_ref().map(|r| TypeRef::new(&r.reference)),
    }
}

fn describes_output_only(value: &Value) -> bool {
    value
        .get("description")
        .and_then(Value::as_str)
        .is_some_and(|d| d.contains(OUTPUT_ONLY_MARKER))
}

fn parse_handle(value: &Value) -> SchemaHandle {
    match value.get("$ref").and_then(Value::as_str) {
        Some(name) => SchemaHandle::Named {
            name: name.to_string(),
            output_only: describes_output_only(value),
        },
        None => SchemaHandle::inline(parse_schema("", value)),
    }
}

/// Build a schema node from its discovery JSON.
pub fn parse_schema(id: &str, value: &Value) -> Schema {
    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let required = value
        .pointer("/annotations/required")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(|m| (m.to_string(), true))
                .collect()
        })
        .unwrap_or_default();

    let properties = value
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.clone(), parse_handle(v)))
                .collect()
        })
        .unwrap_or_default();

    Schema {
        id: id.to_string(),
        schema_type: text("type"),
        format: text("format"),
        description: text("description"),
        properties,
        items: value.get("items").map(parse_handle),
        additional_properties: value
            .get("additionalProperties")
            .filter(|v| v.is_object())
            .map(parse_handle),
        output_only: describes_output_only(value),
        required,
    }
}

/// Source of service directories and service handles for one provider.
pub struct DiscoveryStore {
    provider: String,
    directory_url: String,
    cache_dir: Option<PathBuf>,
    ttl: Duration,
    offline: bool,
    transport: Option<Arc<dyn HttpTransport>>,
    directory: OnceCell<Arc<Vec<Service>>>,
    handles: DashMap<String, Arc<ServiceHandle>>,
}

impl DiscoveryStore {
    /// Store backed by the on-disk cache, fetching through `transport`.
    pub fn new(
        provider: impl Into<String>,
        directory_url: impl Into<String>,
        root: &Path,
        ttl: Duration,
        offline: bool,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let provider = provider.into();
        let cache_dir = root.join(&provider).join(DOC_VERSION);
        Self {
            provider,
            directory_url: directory_url.into(),
            cache_dir: Some(cache_dir),
            ttl,
            offline,
            transport: Some(transport),
            directory: OnceCell::new(),
            handles: DashMap::new(),
        }
    }

    /// Store over documents already in memory; never touches disk or network.
    pub fn in_memory(
        provider: impl Into<String>,
        directory: Vec<Service>,
        handles: Vec<ServiceHandle>,
    ) -> Self {
        let store = Self {
            provider: provider.into(),
            directory_url: String::new(),
            cache_dir: None,
            ttl: Duration::MAX,
            offline: true,
            transport: None,
            directory: OnceCell::from(Arc::new(directory)),
            handles: DashMap::new(),
        };
        for handle in handles {
            store
                .handles
                .insert(handle.service.id.clone(), Arc::new(handle));
        }
        store
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Every service in the directory.
    pub async fn services(&self) -> CloudqlResult<Arc<Vec<Service>>> {
        self.directory
            .get_or_try_init(|| async {
                let bytes = self
                    .load_document(&self.directory_url, "discovery.json")
                    .await?;
                Ok::<_, CloudqlError>(Arc::new(parse_directory(&bytes)?))
            })
            .await
            .cloned()
    }

    /// Loaded handle for a directory entry.
    pub async fn service_handle(&self, service: &Service) -> CloudqlResult<Arc<ServiceHandle>> {
        if let Some(handle) = self.handles.get(&service.id) {
            return Ok(Arc::clone(handle.value()));
        }
        let file_name = format!("services/{}.json", service.id);
        let bytes = self
            .load_document(&service.discovery_rest_url, &file_name)
            .await?;
        let handle = Arc::new(parse_service_document(&bytes, Some(service))?);
        self.handles
            .insert(service.id.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    async fn load_document(&self, url: &str, file_name: &str) -> CloudqlResult<Vec<u8>> {
        let path = self.cache_dir.as_ref().map(|dir| dir.join(file_name));

        if let Some(path) = &path {
            if path.exists() && (self.offline || self.is_fresh(path)) {
                tracing::debug!("Reading cached discovery document {}", path.display());
                return Ok(std::fs::read(path)?);
            }
        }
        if self.offline {
            return Err(CloudqlError::Discovery(format!(
                "discovery document '{}' is not cached and offline mode is set",
                file_name
            )));
        }
        let Some(transport) = &self.transport else {
            return Err(CloudqlError::Discovery(format!(
                "no transport available to fetch '{}'",
                url
            )));
        };

        tracing::info!("Fetching discovery document {}", url);
        let response = transport.execute(&HttpRequest::get(url)).await?;
        if response.status >= 400 {
            process_response(&response).map_err(|e| {
                CloudqlError::Discovery(format!("discovery doc download for '{}' failed: {}", url, e))
            })?;
        }

        if let Some(path) = &path {
            if let Err(e) = write_cache_file(path, &response.body) {
                tracing::warn!("Could not cache {}: {}", path.display(), e);
            }
        }
        Ok(response.body)
    }

    fn is_fresh(&self, path: &Path) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age < self.ttl)
    }
}

fn write_cache_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}
