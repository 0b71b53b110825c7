//! Schema graph for provider resources.
//!
//! Schemas live in a [`SchemaRegistry`] arena keyed by name. Properties and
//! array items point at other schemas through a [`SchemaHandle`], which is
//! either a named reference into the registry or an inline sub-schema. Named
//! references may form cycles, so every traversal carries a visited set and
//! skips a named reference it has already entered.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CloudqlError, CloudqlResult};

/// Marker in property descriptions flagging fields the provider populates.
pub const OUTPUT_ONLY_MARKER: &str = "[Output Only]";

/// Reference from a property or array to its schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaHandle {
    /// Shared schema, looked up by name in the registry.
    Named { name: String, output_only: bool },
    /// Anonymous schema defined in place.
    Inline(Box<Schema>),
}

impl SchemaHandle {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            output_only: false,
        }
    }

    pub fn inline(schema: Schema) -> Self {
        Self::Inline(Box::new(schema))
    }

    /// Name of the referenced registry entry, if any.
    pub fn ref_name(&self) -> Option<&str> {
        match self {
            Self::Named { name, .. } => Some(name),
            Self::Inline(_) => None,
        }
    }
}

/// A node in the schema graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub id: String,
    /// `object`, `array`, `string`, `integer`, `number`, `boolean`, `any`.
    pub schema_type: String,
    pub format: String,
    pub description: String,
    pub properties: BTreeMap<String, SchemaHandle>,
    pub items: Option<SchemaHandle>,
    /// Value schema of a map-typed object.
    pub additional_properties: Option<SchemaHandle>,
    pub output_only: bool,
    /// Method ids for which this field must be supplied.
    pub required: BTreeMap<String, bool>,
}

impl Schema {
    pub fn new(id: impl Into<String>, schema_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            schema_type: schema_type.into(),
            ..Default::default()
        }
    }

    /// Add a property (builder style).
    pub fn with_property(mut self, name: impl Into<String>, handle: SchemaHandle) -> Self {
        self.properties.insert(name.into(), handle);
        self
    }

    /// Set the array item schema (builder style).
    pub fn with_items(mut self, handle: SchemaHandle) -> Self {
        self.items = Some(handle);
        self
    }

    /// Set the map value schema (builder style).
    pub fn with_additional_properties(mut self, handle: SchemaHandle) -> Self {
        self.additional_properties = Some(handle);
        self
    }

    pub fn is_array(&self) -> bool {
        self.schema_type == "array"
    }

    pub fn is_object(&self) -> bool {
        self.schema_type == "object" || !self.properties.is_empty()
    }

    pub fn is_integral(&self) -> bool {
        self.schema_type == "integer"
    }

    pub fn is_float(&self) -> bool {
        self.schema_type == "number"
    }

    pub fn is_boolean(&self) -> bool {
        self.schema_type == "boolean"
    }

    /// Whether the field is required by the given method id.
    pub fn is_required(&self, method_id: &str) -> bool {
        self.required.get(method_id).copied().unwrap_or(false)
    }
}

/// Column description produced for DESCRIBE.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: String,
    pub description: String,
}

/// Arena of named schemas for one service.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, schema: Schema) {
        self.schemas.insert(name.into(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&Schema> {
        self.schemas.get(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Every named schema, sorted by name.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve a handle to its schema.
    pub fn resolve<'a>(&'a self, handle: &'a SchemaHandle) -> Option<&'a Schema> {
        match handle {
            SchemaHandle::Named { name, .. } => self.schemas.get(name),
            SchemaHandle::Inline(schema) => Some(schema),
        }
    }

    /// Whether a property is provider-populated, judged on the handle and its target.
    pub fn is_output_only(&self, handle: &SchemaHandle) -> bool {
        match handle {
            SchemaHandle::Named { output_only, .. } => {
                *output_only || self.resolve(handle).is_some_and(|s| s.output_only)
            }
            SchemaHandle::Inline(schema) => schema.output_only,
        }
    }

    /// Resolve a property schema by name.
    pub fn property<'a>(&'a self, schema: &'a Schema, name: &str) -> Option<&'a Schema> {
        schema.properties.get(name).and_then(|h| self.resolve(h))
    }

    /// Item schema of an array.
    pub fn items<'a>(&'a self, schema: &'a Schema) -> Option<&'a Schema> {
        schema.items.as_ref().and_then(|h| self.resolve(h))
    }

    /// Enter a handle unless it names an already-visited schema.
    fn enter<'a>(
        &'a self,
        handle: &'a SchemaHandle,
        visited: &mut BTreeSet<String>,
    ) -> Option<&'a Schema> {
        if let Some(name) = handle.ref_name() {
            if !visited.insert(name.to_string()) {
                return None;
            }
        }
        self.resolve(handle)
    }

    /// Find the schema at a dotted path below `root`.
    ///
    /// Path segments are property names; `[]` after a segment steps into the
    /// items of an array. A path that does not match from `root` is also
    /// searched for below each property, so `name` is found under
    /// `items[].name`. The first match in sorted property order wins.
    pub fn find_by_path<'a>(&'a self, root: &'a Schema, path: &str) -> Option<&'a Schema> {
        self.find_field(root, path).map(|(schema, _)| schema)
    }

    /// Like [`find_by_path`](Self::find_by_path), also reporting whether the
    /// matched property is output-only on its handle or its target.
    pub fn find_field<'a>(&'a self, root: &'a Schema, path: &str) -> Option<(&'a Schema, bool)> {
        let mut visited = BTreeSet::new();
        if !root.id.is_empty() {
            visited.insert(root.id.clone());
        }
        self.find_inner(root, path, &mut visited)
    }

    fn find_inner<'a>(
        &'a self,
        schema: &'a Schema,
        path: &str,
        visited: &mut BTreeSet<String>,
    ) -> Option<(&'a Schema, bool)> {
        if path.is_empty() {
            return Some((schema, schema.output_only));
        }

        if schema.is_array() {
            let rest = path
                .strip_prefix("[].")
                .or_else(|| path.strip_prefix("[]"))
                .unwrap_or(path);
            let items = schema.items.as_ref()?;
            let items = self.enter(items, visited)?;
            return self.find_inner(items, rest, visited);
        }

        for (key, handle) in &schema.properties {
            if key == path {
                return self
                    .resolve(handle)
                    .map(|found| (found, self.is_output_only(handle)));
            }
        }

        for (key, handle) in &schema.properties {
            let Some(tail) = path.strip_prefix(key.as_str()) else {
                continue;
            };
            let rest = if let Some(rest) = tail.strip_prefix('.') {
                rest
            } else if tail.starts_with("[]") {
                tail
            } else {
                continue;
            };
            if let Some(child) = self.enter(handle, visited) {
                if let Some(found) = self.find_inner(child, rest, visited) {
                    return Some(found);
                }
            }
        }

        for handle in schema.properties.values() {
            if let Some(child) = self.enter(handle, visited) {
                if let Some(found) = self.find_inner(child, path, visited) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Locate the array property holding a list response's rows.
    ///
    /// `key` is tried first; otherwise the first array-typed property in
    /// sorted key order is used. Returns the array schema and its key.
    pub fn select_list_items<'a>(
        &'a self,
        root: &'a Schema,
        key: &str,
    ) -> Option<(&'a Schema, String)> {
        if let Some(schema) = self.property(root, key) {
            if schema.is_array() {
                return Some((schema, key.to_string()));
            }
        }
        root.properties.iter().find_map(|(k, h)| {
            self.resolve(h)
                .filter(|s| s.is_array())
                .map(|s| (s, k.clone()))
        })
    }

    /// Non-output-only property names, sorted. Arrays report their items' columns.
    pub fn all_columns(&self, schema: &Schema) -> Vec<String> {
        let mut visited = BTreeSet::new();
        self.columns_inner(schema, &mut visited)
    }

    fn columns_inner(&self, schema: &Schema, visited: &mut BTreeSet<String>) -> Vec<String> {
        if schema.is_array() {
            return match schema.items.as_ref().and_then(|h| self.enter(h, visited)) {
                Some(items) => self.columns_inner(items, visited),
                None => Vec::new(),
            };
        }
        schema
            .properties
            .iter()
            .filter(|(_, h)| !self.is_output_only(h))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Column rows for DESCRIBE: every property with its type and description.
    pub fn describe(&self, schema: &Schema) -> Vec<ColumnDescriptor> {
        let target = if schema.is_array() {
            self.items(schema).unwrap_or(schema)
        } else {
            schema
        };
        target
            .properties
            .iter()
            .map(|(name, handle)| {
                let resolved = self.resolve(handle);
                ColumnDescriptor {
                    name: name.clone(),
                    column_type: resolved
                        .map(|s| s.schema_type.clone())
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| "object".to_string()),
                    description: resolved.map(|s| s.description.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Check a request payload against a schema for the given method.
    pub fn validate_payload(
        &self,
        schema: &Schema,
        payload: &serde_json::Map<String, Value>,
        method_id: &str,
    ) -> CloudqlResult<()> {
        let mut required: BTreeSet<&str> = schema
            .properties
            .iter()
            .filter(|(_, h)| self.resolve(h).is_some_and(|s| s.is_required(method_id)))
            .map(|(k, _)| k.as_str())
            .collect();

        for (key, value) in payload {
            let sub = match self.property(schema, key) {
                Some(sub) => sub,
                None => match schema.additional_properties.as_ref().and_then(|h| self.resolve(h)) {
                    Some(values) => values,
                    None => {
                        return Err(CloudqlError::validation(format!(
                            "schema does not possess payload key '{}'",
                            key
                        )));
                    }
                },
            };
            required.remove(key.as_str());
            self.validate_value(key, sub, value, method_id)?;
        }

        if !required.is_empty() {
            let missing: Vec<&str> = required.into_iter().collect();
            return Err(CloudqlError::validation(format!(
                "required elements not included in supplied object; the following keys are missing: {}.",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_value(
        &self,
        key: &str,
        sub: &Schema,
        value: &Value,
        method_id: &str,
    ) -> CloudqlResult<()> {
        match value {
            Value::Object(map) => self.validate_payload(sub, map, method_id),
            Value::Array(values) => {
                let Some(items) = self.items(sub) else {
                    return Err(CloudqlError::validation(format!(
                        "key '{}' expected to contain element of type '{}' but instead it is type 'array'",
                        key, sub.schema_type
                    )));
                };
                match values.first() {
                    Some(Value::Object(item)) => self.validate_payload(items, item, method_id),
                    Some(Value::String(_)) if items.schema_type != "string" => {
                        Err(CloudqlError::validation(format!(
                            "array at key '{}' expected to contain elements of type '{}' but instead they are type 'string'",
                            key, items.schema_type
                        )))
                    }
                    _ => Ok(()),
                }
            }
            Value::String(_) => expect_type(key, sub.schema_type == "string", "string"),
            Value::Bool(_) => expect_type(key, sub.is_boolean(), "boolean"),
            Value::Number(n) if n.is_f64() => expect_type(key, sub.is_float(), "number"),
            Value::Number(_) => expect_type(key, sub.is_integral() || sub.is_float(), "integer"),
            Value::Null => Ok(()),
        }
    }
}

fn expect_type(key: &str, ok: bool, actual: &str) -> CloudqlResult<()> {
    if ok {
        Ok(())
    } else {
        Err(CloudqlError::validation(format!(
            "key '{}' does not accept element of type '{}'",
            key, actual
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scalar(t: &str) -> SchemaHandle {
        SchemaHandle::inline(Schema::new("", t))
    }

    /// Instance list with a self-referencing `Instance.parent` field.
    fn registry() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        let mut zone = Schema::new("", "string");
        zone.description = "[Output Only] URL of the zone".into();
        zone.output_only = true;
        reg.insert(
            "Instance",
            Schema::new("Instance", "object")
                .with_property("name", scalar("string"))
                .with_property("zone", SchemaHandle::inline(zone))
                .with_property("parent", SchemaHandle::named("Instance"))
                .with_property(
                    "disks",
                    SchemaHandle::inline(
                        Schema::new("", "array").with_items(SchemaHandle::named("AttachedDisk")),
                    ),
                ),
        );
        reg.insert(
            "AttachedDisk",
            Schema::new("AttachedDisk", "object")
                .with_property("deviceName", scalar("string"))
                .with_property("owner", SchemaHandle::named("Instance")),
        );
        reg.insert(
            "InstanceList",
            Schema::new("InstanceList", "object")
                .with_property("kind", scalar("string"))
                .with_property("nextPageToken", scalar("string"))
                .with_property(
                    "items",
                    SchemaHandle::inline(
                        Schema::new("", "array").with_items(SchemaHandle::named("Instance")),
                    ),
                ),
        );
        reg
    }

    #[test]
    fn test_find_by_path_prefixed_and_deep() {
        let reg = registry();
        let root = reg.get("InstanceList").unwrap();
        assert_eq!(reg.find_by_path(root, "items[].name").unwrap().schema_type, "string");
        assert!(reg.find_by_path(root, "name").is_some());
        assert!(reg.find_by_path(root, "deviceName").is_some());
        assert!(reg.find_by_path(root, "nonexistent").is_none());
    }

    #[test]
    fn test_find_by_path_terminates_on_cycles() {
        let reg = registry();
        let instance = reg.get("Instance").unwrap();
        assert!(reg.find_by_path(instance, "parent.parent.missing").is_none());
        assert!(reg.find_by_path(instance, "disks[].owner").is_some());
    }

    #[test]
    fn test_find_field_reports_reference_output_only() {
        let mut reg = registry();
        let instance = reg.get("Instance").cloned().unwrap();
        reg.insert(
            "Instance",
            instance.with_property(
                "host",
                SchemaHandle::Named {
                    name: "AttachedDisk".into(),
                    output_only: true,
                },
            ),
        );
        let root = reg.get("InstanceList").unwrap();
        let (host, output_only) = reg.find_field(root, "host").unwrap();
        assert_eq!(host.id, "AttachedDisk");
        assert!(output_only);
        assert!(!host.output_only);

        let (_, output_only) = reg.find_field(root, "zone").unwrap();
        assert!(output_only);
        let (_, output_only) = reg.find_field(root, "name").unwrap();
        assert!(!output_only);
    }

    #[test]
    fn test_select_list_items() {
        let reg = registry();
        let root = reg.get("InstanceList").unwrap();
        let (schema, key) = reg.select_list_items(root, "items").unwrap();
        assert_eq!(key, "items");
        assert!(schema.is_array());

        let (_, fallback) = reg.select_list_items(root, "resources").unwrap();
        assert_eq!(fallback, "items");
    }

    #[test]
    fn test_all_columns_skip_output_only() {
        let reg = registry();
        let list = reg.get("InstanceList").unwrap();
        let items = reg.property(list, "items").unwrap();
        assert_eq!(reg.all_columns(items), vec!["disks", "name", "parent"]);
    }

    #[test]
    fn test_validate_payload() {
        let mut reg = SchemaRegistry::new();
        let mut name = Schema::new("", "string");
        name.required.insert("compute.networks.insert".into(), true);
        reg.insert(
            "Network",
            Schema::new("Network", "object")
                .with_property("name", SchemaHandle::inline(name))
                .with_property("autoCreateSubnetworks", scalar("boolean"))
                .with_property("mtu", scalar("integer")),
        );
        let net = reg.get("Network").unwrap();
        let ok = serde_json::json!({"name": "vpc", "autoCreateSubnetworks": false, "mtu": 1460});
        reg.validate_payload(net, ok.as_object().unwrap(), "compute.networks.insert")
            .unwrap();

        let unknown = serde_json::json!({"name": "vpc", "colour": "red"});
        let err = reg
            .validate_payload(net, unknown.as_object().unwrap(), "compute.networks.insert")
            .unwrap_err();
        assert_eq!(err.to_string(), "schema does not possess payload key 'colour'");

        let missing = serde_json::json!({"mtu": 1460});
        let err = reg
            .validate_payload(net, missing.as_object().unwrap(), "compute.networks.insert")
            .unwrap_err();
        assert!(err.to_string().ends_with("keys are missing: name."));

        let wrong = serde_json::json!({"name": "vpc", "mtu": "big"});
        assert!(reg
            .validate_payload(net, wrong.as_object().unwrap(), "compute.networks.insert")
            .is_err());
    }

    #[test]
    fn test_validate_payload_map_values() {
        let mut reg = SchemaRegistry::new();
        reg.insert(
            "InstancesSetLabelsRequest",
            Schema::new("InstancesSetLabelsRequest", "object")
                .with_property(
                    "labels",
                    SchemaHandle::inline(
                        Schema::new("", "object").with_additional_properties(scalar("string")),
                    ),
                )
                .with_property("labelFingerprint", scalar("string")),
        );
        let request = reg.get("InstancesSetLabelsRequest").unwrap();
        let ok = serde_json::json!({"labels": {"env": "dev", "team": "core"}, "labelFingerprint": "abc="});
        reg.validate_payload(request, ok.as_object().unwrap(), "compute.instances.setLabels")
            .unwrap();

        let wrong = serde_json::json!({"labels": {"env": 7}});
        let err = reg
            .validate_payload(request, wrong.as_object().unwrap(), "compute.instances.setLabels")
            .unwrap_err();
        assert_eq!(err.to_string(), "key 'env' does not accept element of type 'integer'");

        let unknown = serde_json::json!({"labels": {}, "bogus": "x"});
        assert!(reg
            .validate_payload(request, unknown.as_object().unwrap(), "compute.instances.setLabels")
            .is_err());
    }
}
