//! Taxonomy resolution.
//!
//! A SQL table reference such as `google.compute.instances` or an EXEC target
//! such as `google.compute.networks.insert` addresses a provider, service,
//! resource and method by position. This module binds those names to live
//! metadata.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::TableName;
use crate::error::{CloudqlError, CloudqlResult};
use crate::metadata::{Method, Resource, ServiceHandle};
use crate::provider::Provider;
use crate::schema::{Schema, SchemaRegistry};

/// Providers available to a session, by name.
pub type ProviderMap = BTreeMap<String, Arc<dyn Provider>>;

/// Names extracted from a table reference. Any part may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeirarchyIdentifiers {
    pub provider_name: String,
    pub service_name: String,
    pub resource_name: String,
    pub method_name: String,
}

impl HeirarchyIdentifiers {
    /// `[provider.]service.resource`; the method is inferred later.
    pub fn resource_terminal(table: &TableName, default_provider: &str) -> Self {
        Self {
            provider_name: non_empty_or(table.qualifier_second(), default_provider),
            service_name: table.qualifier().to_string(),
            resource_name: table.name().to_string(),
            method_name: String::new(),
        }
    }

    /// `[provider.]service.resource.method`.
    pub fn method_terminal(table: &TableName, default_provider: &str) -> Self {
        Self {
            provider_name: non_empty_or(table.qualifier_third(), default_provider),
            service_name: table.qualifier_second().to_string(),
            resource_name: table.qualifier().to_string(),
            method_name: table.name().to_string(),
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

impl fmt::Display for HeirarchyIdentifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [
            self.provider_name.as_str(),
            self.service_name.as_str(),
            self.resource_name.as_str(),
            self.method_name.as_str(),
        ]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
        write!(f, "{}", parts.join("."))
    }
}

/// A fully resolved binding. Only ever constructed complete.
#[derive(Clone)]
pub struct HeirarchyObjects {
    pub identifiers: HeirarchyIdentifiers,
    pub provider: Arc<dyn Provider>,
    pub service: Arc<ServiceHandle>,
    pub resource: Resource,
    pub method: Method,
}

impl fmt::Debug for HeirarchyObjects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeirarchyObjects")
            .field("identifiers", &self.identifiers)
            .field("service", &self.service.service.id)
            .field("resource", &self.resource.id)
            .field("method", &self.method.id)
            .finish()
    }
}

impl HeirarchyObjects {
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.service.schemas
    }

    /// Request schema of the bound method, if it declares one that exists.
    pub fn request_schema(&self) -> Option<&Schema> {
        let name = self.method.request_type()?;
        let schema = self.service.schemas.get(name);
        if schema.is_none() {
            tracing::debug!("Request schema '{}' not found for {}", name, self.method.id);
        }
        schema
    }

    /// Response schema of the bound method, if it declares one that exists.
    pub fn response_schema(&self) -> Option<&Schema> {
        let name = self.method.response_type()?;
        let schema = self.service.schemas.get(name);
        if schema.is_none() {
            tracing::debug!("Response schema '{}' not found for {}", name, self.method.id);
        }
        schema
    }

    /// Whether the method returns the provider's long-running operation type.
    pub fn returns_operation(&self) -> bool {
        self.method.response_type() == Some(self.provider.operation_type())
    }

    /// Fully qualified table name, as used in messages and templates.
    pub fn table_name(&self) -> String {
        format!(
            "{}.{}.{}",
            self.identifiers.provider_name, self.service.service.name, self.resource.name
        )
    }
}

/// Look up a provider by name.
pub fn provider(providers: &ProviderMap, name: &str) -> CloudqlResult<Arc<dyn Provider>> {
    providers
        .get(name)
        .cloned()
        .ok_or_else(|| CloudqlError::resolution(format!("provider {} not supported", name)))
}

/// Bind identifiers to metadata.
///
/// `action` is the SQL verb used to infer the method when the identifiers do
/// not name one.
pub async fn resolve(
    providers: &ProviderMap,
    identifiers: HeirarchyIdentifiers,
    action: &str,
) -> CloudqlResult<HeirarchyObjects> {
    if identifiers.service_name.is_empty() || identifiers.resource_name.is_empty() {
        return Err(CloudqlError::resolution(format!(
            "could not locate a service and resource in '{}'",
            identifiers
        )));
    }
    let provider = provider(providers, &identifiers.provider_name)?;
    let (service, resource) = provider
        .resource(&identifiers.service_name, &identifiers.resource_name)
        .await?;

    let method = if identifiers.method_name.is_empty() {
        provider.method_for_action(&resource, action)?.clone()
    } else {
        resource
            .method(&identifiers.method_name)
            .cloned()
            .ok_or_else(|| {
                CloudqlError::resolution(format!(
                    "no method = '{}' for resource = '{}'",
                    identifiers.method_name, resource.name
                ))
            })?
    };
    tracing::debug!("Resolved '{}' to method {}", identifiers, method.id);

    Ok(HeirarchyObjects {
        identifiers,
        provider,
        service,
        resource,
        method,
    })
}
