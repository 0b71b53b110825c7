//! INSERT statement templates for `SHOW INSERT INTO`.
//!
//! Values are rendered as `{{ .values.<column> }}` placeholders; string
//! values are quoted. Request body fields become `data__<field>` columns
//! whose object and array values are rendered as JSON templates.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CloudqlError, CloudqlResult};
use crate::metadata::Method;
use crate::params::BODY_PREFIX;
use crate::schema::{Schema, SchemaHandle, SchemaRegistry};

/// Levels of nested objects rendered inside a body field.
const MAX_OBJECT_DEPTH: usize = 2;

fn placeholder(path: &str) -> String {
    format!("{{{{ .values.{} }}}}", path)
}

fn not_present(column: &str) -> CloudqlError {
    CloudqlError::validation(format!(
        "cannot generate insert statement: column '{}' not present",
        column
    ))
}

struct TemplateBuilder<'a> {
    registry: &'a SchemaRegistry,
    method_id: &'a str,
    required_only: bool,
    visited: BTreeSet<String>,
}

impl<'a> TemplateBuilder<'a> {
    fn include(&self, handle: &'a SchemaHandle) -> Option<&'a Schema> {
        if self.registry.is_output_only(handle) {
            return None;
        }
        let schema = self.registry.resolve(handle)?;
        if self.required_only && !schema.is_required(self.method_id) {
            return None;
        }
        Some(schema)
    }

    /// JSON fragment for a nested value; `None` when nothing renders.
    fn fragment(&mut self, handle: &'a SchemaHandle, path: &str, depth: usize) -> Option<String> {
        let name = handle.ref_name().map(str::to_string);
        if let Some(name) = &name {
            if !self.visited.insert(name.clone()) {
                return None;
            }
        }
        let rendered = self.registry.resolve(handle).and_then(|schema| {
            if schema.is_object() {
                self.object(schema, path, depth)
            } else if schema.is_array() {
                let items = schema.items.as_ref()?;
                self.fragment(items, &format!("{}[0]", path), depth)
                    .map(|item| format!("[ {} ]", item))
            } else if schema.schema_type == "string" {
                Some(format!("\"{}\"", placeholder(path)))
            } else {
                Some(placeholder(path))
            }
        });
        if let Some(name) = &name {
            self.visited.remove(name);
        }
        rendered
    }

    fn object(&mut self, schema: &'a Schema, path: &str, depth: usize) -> Option<String> {
        if depth > MAX_OBJECT_DEPTH {
            return None;
        }
        let mut parts = Vec::new();
        for (key, handle) in &schema.properties {
            if self.registry.is_output_only(handle) {
                continue;
            }
            if let Some(v) = self.fragment(handle, &format!("{}.{}", path, key), depth + 1) {
                parts.push(format!("\"{}\": {}", key, v));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(format!("{{ {} }}", parts.join(", ")))
        }
    }

    /// SELECT expression per top-level body field, keyed by field name.
    fn body(&mut self, request: &'a Schema) -> CloudqlResult<BTreeMap<String, String>> {
        if !request.is_object() {
            return Err(CloudqlError::validation(
                "templating of request body only supported for object type payload",
            ));
        }
        if !request.id.is_empty() {
            self.visited.insert(request.id.clone());
        }
        let mut out = BTreeMap::new();
        for (key, handle) in &request.properties {
            let Some(schema) = self.include(handle) else {
                continue;
            };
            let column = format!("{}{}", BODY_PREFIX, key);
            let expr = if schema.is_object() || schema.is_array() {
                self.fragment(handle, &column, 1).map(|f| format!("'{}'", f))
            } else if schema.schema_type == "string" {
                Some(format!("'{}'", placeholder(&column)))
            } else {
                Some(placeholder(&column))
            };
            if let Some(expr) = expr {
                out.insert(key.clone(), expr);
            }
        }
        Ok(out)
    }
}

fn parameter_expr(method: &Method, name: &str) -> String {
    match method.parameter(name) {
        Some(p) if p.param_type != "string" => placeholder(name),
        _ => format!("'{}'", placeholder(name)),
    }
}

/// Render an INSERT template for `method`.
///
/// With explicit `columns` only those are rendered. Otherwise parameters are
/// the required ones, or all of them when `extended`; `required_only` limits
/// parameters and body fields to required ones.
pub fn insert_statement(
    table: &str,
    method: &Method,
    registry: &SchemaRegistry,
    request: Option<&Schema>,
    columns: &[String],
    extended: bool,
    required_only: bool,
) -> CloudqlResult<String> {
    let params: Vec<String> = if !columns.is_empty() {
        let mut params = Vec::new();
        for col in columns.iter().filter(|c| !c.starts_with(BODY_PREFIX)) {
            if method.parameter(col).is_none() {
                return Err(not_present(col));
            }
            params.push(col.clone());
        }
        params.sort();
        params
    } else if extended && !required_only {
        method.parameters.keys().cloned().collect()
    } else {
        method
            .required_parameters()
            .into_keys()
            .map(str::to_string)
            .collect()
    };

    let mut column_list: Vec<String> = params.clone();
    let mut exprs: Vec<String> = params.iter().map(|p| parameter_expr(method, p)).collect();

    let body = match request {
        Some(schema) => TemplateBuilder {
            registry,
            method_id: &method.id,
            required_only,
            visited: BTreeSet::new(),
        }
        .body(schema)?,
        None => BTreeMap::new(),
    };

    if columns.is_empty() {
        for (key, expr) in body {
            column_list.push(format!("{}{}", BODY_PREFIX, key));
            exprs.push(expr);
        }
    } else {
        for col in columns {
            let Some(field) = col.strip_prefix(BODY_PREFIX) else {
                continue;
            };
            let expr = body.get(field).ok_or_else(|| not_present(col))?;
            column_list.push(col.clone());
            exprs.push(expr.clone());
        }
    }

    let indent = |items: Vec<String>| {
        items
            .into_iter()
            .map(|i| format!("  {}", i))
            .collect::<Vec<_>>()
            .join(",\n")
    };
    Ok(format!(
        "INSERT INTO {}(\n{}\n)\nSELECT\n{}\n;\n",
        table,
        indent(column_list),
        indent(exprs)
    ))
}
