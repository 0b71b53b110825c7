//! Provider metadata: services, resources, methods and parameters.
//!
//! These are the objects the taxonomy resolver binds a SQL table name to,
//! and the rows SHOW statements list.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::schema::SchemaRegistry;

/// Column names of metadata listings.
pub mod columns {
    pub const METHOD_NAME: &str = "MethodName";
    pub const REQUIRED_PARAMS: &str = "RequiredParams";
    pub const METHOD_DESCRIPTION: &str = "MethodDescription";
}

/// Where a method parameter travels in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterLocation {
    Path,
    Query,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub param_type: String,
    pub format: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub description: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, location: ParameterLocation, required: bool) -> Self {
        Self {
            name: name.into(),
            param_type: "string".to_string(),
            format: String::new(),
            location,
            required,
            description: String::new(),
        }
    }
}

/// Reference to a request or response schema by name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeRef {
    pub type_name: String,
    /// Payload encoding, `json` unless stated otherwise.
    pub format: String,
}

impl TypeRef {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            format: "json".to_string(),
        }
    }
}

/// A single REST operation of a resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Method {
    /// Provider id, e.g. `compute.instances.list`.
    pub id: String,
    /// Key within the resource, e.g. `list`.
    pub name: String,
    /// URL template relative to the service base URL.
    pub path: String,
    pub http_method: String,
    pub description: String,
    pub protocol: String,
    pub parameters: BTreeMap<String, Parameter>,
    pub parameter_order: Vec<String>,
    pub request: Option<TypeRef>,
    pub response: Option<TypeRef>,
}

impl Method {
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    /// Required parameters, keyed by name.
    pub fn required_parameters(&self) -> BTreeMap<&str, &Parameter> {
        self.parameters
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(k, p)| (k.as_str(), p))
            .collect()
    }

    pub fn request_type(&self) -> Option<&str> {
        self.request.as_ref().map(|t| t.type_name.as_str())
    }

    pub fn response_type(&self) -> Option<&str> {
        self.response.as_ref().map(|t| t.type_name.as_str())
    }

    /// Row for SHOW METHODS.
    pub fn to_row(&self, extended: bool) -> Map<String, Value> {
        let required: Vec<&str> = self.required_parameters().into_keys().collect();
        let mut row = Map::new();
        row.insert(columns::METHOD_NAME.into(), Value::from(self.name.clone()));
        row.insert(columns::REQUIRED_PARAMS.into(), Value::from(required.join(", ")));
        if extended {
            row.insert(
                columns::METHOD_DESCRIPTION.into(),
                Value::from(self.description.clone()),
            );
        }
        row
    }

    pub fn row_columns(extended: bool) -> Vec<String> {
        let mut cols = vec![
            columns::METHOD_NAME.to_string(),
            columns::REQUIRED_PARAMS.to_string(),
        ];
        if extended {
            cols.push(columns::METHOD_DESCRIPTION.to_string());
        }
        cols
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    /// Fully qualified id, e.g. `compute.instances`.
    pub id: String,
    /// Name as used in SQL, dotted for nested resources.
    pub name: String,
    pub title: String,
    pub description: String,
    pub methods: BTreeMap<String, Method>,
}

impl Resource {
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    /// Row for SHOW RESOURCES.
    pub fn to_row(&self, extended: bool) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("name".into(), Value::from(self.name.clone()));
        row.insert("id".into(), Value::from(self.id.clone()));
        row.insert("title".into(), Value::from(self.title.clone()));
        if extended {
            row.insert("description".into(), Value::from(self.description.clone()));
        }
        row
    }

    pub fn row_columns(extended: bool) -> Vec<String> {
        let mut cols: Vec<String> = ["name", "id", "title"].map(String::from).to_vec();
        if extended {
            cols.push("description".to_string());
        }
        cols
    }
}

/// Directory entry for a provider service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Service {
    /// Id as exposed to SQL, e.g. `compute__v1`.
    pub id: String,
    pub name: String,
    pub title: String,
    pub description: String,
    pub version: String,
    pub preferred: bool,
    pub discovery_rest_url: String,
    pub documentation_link: String,
}

impl Service {
    /// Row for SHOW SERVICES.
    pub fn to_row(&self, extended: bool) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("id".into(), Value::from(self.id.clone()));
        row.insert("name".into(), Value::from(self.name.clone()));
        row.insert("title".into(), Value::from(self.title.clone()));
        if extended {
            row.insert("description".into(), Value::from(self.description.clone()));
            row.insert("version".into(), Value::from(self.version.clone()));
            row.insert("preferred".into(), Value::from(self.preferred));
        }
        row
    }

    pub fn row_columns(extended: bool) -> Vec<String> {
        let mut cols: Vec<String> = ["id", "name", "title"].map(String::from).to_vec();
        if extended {
            cols.extend(["description", "version", "preferred"].map(String::from));
        }
        cols
    }
}

/// A loaded service: its directory entry, resources and schemas.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    pub service: Service,
    /// Root URL every method path is relative to.
    pub base_url: String,
    pub resources: BTreeMap<String, Resource>,
    pub schemas: Arc<SchemaRegistry>,
}

impl ServiceHandle {
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }
}

/// Result of SHOW AUTH.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthMetadata {
    pub principal: String,
    pub auth_type: String,
    pub source: String,
}

impl AuthMetadata {
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("principal".into(), Value::from(self.principal.clone()));
        row.insert("type".into(), Value::from(self.auth_type.clone()));
        row.insert("source".into(), Value::from(self.source.clone()));
        row
    }

    pub fn row_columns() -> Vec<String> {
        ["principal", "type", "source"].map(String::from).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method() -> Method {
        let mut m = Method {
            id: "compute.instances.list".into(),
            name: "list".into(),
            description: "Retrieves the list of instances".into(),
            ..Default::default()
        };
        for (name, required) in [("project", true), ("zone", true), ("filter", false)] {
            m.parameters.insert(
                name.into(),
                Parameter::new(name, ParameterLocation::Path, required),
            );
        }
        m
    }

    #[test]
    fn test_required_parameters_sorted() {
        let m = method();
        let required: Vec<&str> = m.required_parameters().into_keys().collect();
        assert_eq!(required, vec!["project", "zone"]);
    }

    #[test]
    fn test_method_row() {
        let row = method().to_row(true);
        assert_eq!(row[columns::REQUIRED_PARAMS], "project, zone");
        assert_eq!(row[columns::METHOD_NAME], "list");
        assert!(row.contains_key(columns::METHOD_DESCRIPTION));
        assert!(!method().to_row(false).contains_key(columns::METHOD_DESCRIPTION));
    }

    #[test]
    fn test_service_row_columns() {
        assert_eq!(Service::row_columns(false), vec!["id", "name", "title"]);
        assert_eq!(Service::row_columns(true).len(), 6);
    }
}
