//! Parameter classification.
//!
//! SQL-level parameters (WHERE equalities, INSERT columns, EXEC variables)
//! are split into the places they travel in an HTTP request.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::metadata::{Method, ParameterLocation};
use crate::schema::{Schema, SchemaRegistry};

/// Column prefix marking a request body field, e.g. `data__name`.
pub const BODY_PREFIX: &str = "data__";

/// Classified parameters. Every input key lands in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HttpParameters {
    pub path_params: BTreeMap<String, Value>,
    pub query_params: BTreeMap<String, Value>,
    /// Keys with [`BODY_PREFIX`] removed.
    pub request_body: BTreeMap<String, Value>,
    /// Fields only meaningful on the response, used to filter rows.
    pub response_body: BTreeMap<String, Value>,
    /// Keys with no provider meaning; dropped.
    pub unassigned: BTreeMap<String, Value>,
}

impl HttpParameters {
    /// The request body as a JSON object, if any field was supplied.
    pub fn body(&self) -> Option<Value> {
        if self.request_body.is_empty() {
            return None;
        }
        Some(Value::Object(
            self.request_body
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        ))
    }

    /// Number of classified keys across all buckets.
    pub fn len(&self) -> usize {
        self.path_params.len()
            + self.query_params.len()
            + self.request_body.len()
            + self.response_body.len()
            + self.unassigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interpret a body value: strings holding a JSON object or array are embedded.
fn body_value(value: &Value) -> Value {
    if let Value::String(s) = value {
        let trimmed = s.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) =
                serde_json::from_str::<Value>(s)
            {
                return parsed;
            }
        }
    }
    value.clone()
}

/// Split raw parameters against a method and its schemas.
pub fn split(
    raw: &BTreeMap<String, Value>,
    method: &Method,
    registry: &SchemaRegistry,
    request_schema: Option<&Schema>,
    response_schema: Option<&Schema>,
) -> HttpParameters {
    let mut params = HttpParameters::default();

    for (key, value) in raw {
        if let Some(param) = method.parameter(key) {
            match param.location {
                ParameterLocation::Path => params.path_params.insert(key.clone(), value.clone()),
                ParameterLocation::Query => params.query_params.insert(key.clone(), value.clone()),
            };
            continue;
        }

        if request_schema.is_some() {
            if let Some(field) = key.strip_prefix(BODY_PREFIX) {
                params
                    .request_body
                    .insert(field.to_string(), body_value(value));
                continue;
            }
        }

        if response_schema.is_some_and(|s| registry.find_by_path(s, key).is_some()) {
            params.response_body.insert(key.clone(), value.clone());
            continue;
        }

        tracing::debug!("Parameter '{}' has no provider meaning; dropping it", key);
        params.unassigned.insert(key.clone(), value.clone());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Parameter;
    use crate::schema::SchemaHandle;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn method() -> Method {
        let mut m = Method {
            id: "compute.networks.insert".into(),
            name: "insert".into(),
            ..Default::default()
        };
        m.parameters.insert(
            "project".into(),
            Parameter::new("project", ParameterLocation::Path, true),
        );
        m.parameters.insert(
            "requestId".into(),
            Parameter::new("requestId", ParameterLocation::Query, false),
        );
        m
    }

    fn registry() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        reg.insert(
            "Operation",
            Schema::new("Operation", "object")
                .with_property("status", SchemaHandle::inline(Schema::new("", "string"))),
        );
        reg.insert("Network", Schema::new("Network", "object"));
        reg
    }

    #[test]
    fn test_split_partitions_keys() {
        let reg = registry();
        let raw: BTreeMap<String, Value> = [
            ("project", json!("infraql-demo")),
            ("requestId", json!("r-1")),
            ("data__name", json!("vpc-1")),
            ("data__routingConfig", json!("{\"routingMode\":\"REGIONAL\"}")),
            ("status", json!("DONE")),
            ("bogus", json!(1)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let params = split(
            &raw,
            &method(),
            &reg,
            reg.get("Network"),
            reg.get("Operation"),
        );
        assert_eq!(params.path_params["project"], json!("infraql-demo"));
        assert_eq!(params.query_params["requestId"], json!("r-1"));
        assert_eq!(params.request_body["name"], json!("vpc-1"));
        assert_eq!(
            params.request_body["routingConfig"],
            json!({"routingMode": "REGIONAL"})
        );
        assert_eq!(params.response_body["status"], json!("DONE"));
        assert!(params.unassigned.contains_key("bogus"));
        assert_eq!(params.len(), raw.len());
    }

    #[test]
    fn test_body_prefix_needs_request_schema() {
        let reg = registry();
        let raw = BTreeMap::from([("data__name".to_string(), json!("x"))]);
        let params = split(&raw, &method(), &reg, None, None);
        assert!(params.request_body.is_empty());
        assert!(params.unassigned.contains_key("data__name"));
        assert!(params.body().is_none());
    }

    #[test]
    fn test_embedded_json_only_for_objects_and_arrays() {
        assert_eq!(body_value(&json!("[1, 2]")), json!([1, 2]));
        assert_eq!(body_value(&json!("{bad")), json!("{bad"));
        assert_eq!(body_value(&json!("plain")), json!("plain"));
        assert_eq!(body_value(&json!(false)), json!(false));
    }
}
