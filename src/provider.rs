//! Cloud providers.
//!
//! A [`Provider`] answers metadata questions (which services, resources and
//! methods exist), turns a method plus parameters into a URL, and supplies
//! credentials. [`GoogleProvider`] implements it over Google discovery
//! documents.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::auth::{AUTH_SERVICE_ACCOUNT, AuthCtx, Authenticator};
use crate::discovery::{DiscoveryStore, to_sql_service_id};
use crate::error::{CloudqlError, CloudqlResult};
use crate::metadata::{AuthMetadata, Method, Resource, Service, ServiceHandle, columns};
use crate::params::HttpParameters;

/// Provider-specific behaviour the engine depends on.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Services from the directory; non-preferred versions only when enabled.
    async fn services(&self) -> CloudqlResult<Vec<Service>>;

    /// Load a service by id or name.
    async fn service_handle(&self, service_key: &str) -> CloudqlResult<Arc<ServiceHandle>>;

    /// Load a service and look up one of its resources.
    async fn resource(
        &self,
        service_key: &str,
        resource_key: &str,
    ) -> CloudqlResult<(Arc<ServiceHandle>, Resource)> {
        let handle = self.service_handle(service_key).await?;
        let resource = handle.resource(resource_key).cloned().ok_or_else(|| {
            CloudqlError::resolution(format!(
                "Could not obtain resource '{}' from service '{}'",
                resource_key, service_key
            ))
        })?;
        Ok((handle, resource))
    }

    /// Method implied by a SQL verb.
    fn method_for_action<'a>(
        &self,
        resource: &'a Resource,
        action: &str,
    ) -> CloudqlResult<&'a Method> {
        let method_name = match action.to_ascii_lowercase().as_str() {
            "select" => "list",
            "delete" => "delete",
            "insert" => "insert",
            other => {
                return Err(CloudqlError::resolution(format!(
                    "iql action = '{}' currently not supported, there is no method mapping possible for any resource",
                    other
                )));
            }
        };
        resource.method(method_name).ok_or_else(|| {
            CloudqlError::resolution(format!(
                "no method = '{}' for resource = '{}'",
                method_name, resource.name
            ))
        })
    }

    /// Method used to describe a resource's columns.
    fn infer_describe_method<'a>(&self, resource: &'a Resource) -> CloudqlResult<&'a Method>;

    /// Columns a bare `LIKE` matches against, per SHOW kind.
    fn likeable_columns(&self, kind: &str) -> Vec<String>;

    /// Response key holding the rows of a list call.
    fn default_select_items_key(&self) -> &str {
        "items"
    }

    /// Response type name of long-running operations.
    fn operation_type(&self) -> &str {
        "Operation"
    }

    /// Full URL for a method call with its path and query parameters applied.
    fn parameterise(
        &self,
        base_url: &str,
        method: &Method,
        params: &HttpParameters,
    ) -> CloudqlResult<String>;

    /// Request headers carrying credentials.
    async fn authenticate(&self, ctx: &AuthCtx) -> CloudqlResult<BTreeMap<String, String>>;

    /// Establish credentials of the requested type and mark the context active.
    async fn auth(&self, ctx: &mut AuthCtx, auth_type: &str) -> CloudqlResult<()>;

    async fn show_auth(&self, ctx: &mut AuthCtx) -> CloudqlResult<AuthMetadata>;

    async fn auth_revoke(&self, ctx: &mut AuthCtx) -> CloudqlResult<()>;
}

/// Render a parameter value as it appears in a URL.
pub fn url_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{name}` and `{+name}` placeholders in a path template.
///
/// `{+name}` is inserted verbatim; `{name}` has `/` escaped.
pub fn expand_path(template: &str, path_params: &BTreeMap<String, Value>) -> CloudqlResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let Some(len) = rest[start..].find('}') else {
            return Err(CloudqlError::validation(format!(
                "unterminated placeholder in path '{}'",
                template
            )));
        };
        let token = &rest[start + 1..start + len];
        let (reserved, name) = match token.strip_prefix('+') {
            Some(name) => (true, name),
            None => (false, token),
        };
        let Some(value) = path_params.get(name) else {
            return Err(CloudqlError::validation(format!(
                "missing path parameter '{}' for '{}'",
                name, template
            )));
        };
        let value = url_value(value);
        if reserved {
            out.push_str(&value);
        } else {
            out.push_str(&value.replace('/', "%2F"));
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Google Cloud over discovery documents.
pub struct GoogleProvider {
    store: DiscoveryStore,
    authenticator: Arc<dyn Authenticator>,
    use_non_preferred_apis: bool,
}

impl GoogleProvider {
    pub const NAME: &'static str = "google";

    pub fn new(
        store: DiscoveryStore,
        authenticator: Arc<dyn Authenticator>,
        use_non_preferred_apis: bool,
    ) -> Self {
        Self {
            store,
            authenticator,
            use_non_preferred_apis,
        }
    }

    /// Pick a directory entry by id (preferred) or by name.
    fn select_service<'a>(&self, services: &'a [Service], key: &str) -> CloudqlResult<&'a Service> {
        let id = to_sql_service_id(key);
        let by_id: Vec<&Service> = services.iter().filter(|s| s.id == id).collect();
        let by_name: Vec<&Service> = services
            .iter()
            .filter(|s| s.name == key && (s.preferred || self.use_non_preferred_apis))
            .collect();

        if let [service] = by_id.as_slice() {
            return Ok(service);
        }
        match by_name.as_slice() {
            [service] => Ok(service),
            [] => Err(CloudqlError::resolution(format!(
                "Could not find Service: '{}' from Provider: '{}'",
                key,
                Self::NAME
            ))),
            many => {
                let ids: Vec<&str> = many.iter().map(|s| s.id.as_str()).collect();
                Err(CloudqlError::resolution(format!(
                    "ambiguous service '{}' from Provider: '{}'; candidates are: {}",
                    key,
                    Self::NAME,
                    ids.join(", ")
                )))
            }
        }
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        "v1"
    }

    async fn services(&self) -> CloudqlResult<Vec<Service>> {
        let services = self.store.services().await?;
        Ok(services
            .iter()
            .filter(|s| s.preferred || self.use_non_preferred_apis)
            .cloned()
            .collect())
    }

    async fn service_handle(&self, service_key: &str) -> CloudqlResult<Arc<ServiceHandle>> {
        let services = self.store.services().await?;
        let service = self.select_service(&services, service_key)?;
        tracing::debug!("Service '{}' resolved to {}", service_key, service.id);
        self.store.service_handle(service).await
    }

    fn infer_describe_method<'a>(&self, resource: &'a Resource) -> CloudqlResult<&'a Method> {
        for name in ["get", "aggregatedList", "list"] {
            if let Some(method) = resource.method(name) {
                return Ok(method);
            }
        }
        resource
            .methods
            .iter()
            .find(|(k, _)| k.starts_with("get") || k.starts_with("list"))
            .map(|(_, m)| m)
            .ok_or_else(|| {
                CloudqlError::resolution(
                    "SELECT not supported for this resource, use SHOW METHODS to view available operations for the resource and then invoke a supported method using the EXEC command",
                )
            })
    }

    fn likeable_columns(&self, kind: &str) -> Vec<String> {
        let cols: &[&str] = match kind.to_ascii_uppercase().as_str() {
            "SERVICES" | "RESOURCES" => &["id", "name"],
            "METHODS" => &[columns::METHOD_NAME],
            "PROVIDERS" => &["name"],
            _ => &[],
        };
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn parameterise(
        &self,
        base_url: &str,
        method: &Method,
        params: &HttpParameters,
    ) -> CloudqlResult<String> {
        let path = expand_path(&method.path, &params.path_params)?;
        let joined = format!("{}{}", base_url, path);
        let mut url = url::Url::parse(&joined).map_err(|e| {
            CloudqlError::validation(format!("invalid request URL '{}': {}", joined, e))
        })?;
        if !params.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params.query_params {
                pairs.append_pair(key, &url_value(value));
            }
        }
        Ok(url.to_string())
    }

    async fn authenticate(&self, ctx: &AuthCtx) -> CloudqlResult<BTreeMap<String, String>> {
        let token = self.authenticator.access_token(ctx).await?;
        Ok(BTreeMap::from([(
            "Authorization".to_string(),
            format!("Bearer {}", token.token),
        )]))
    }

    async fn auth(&self, ctx: &mut AuthCtx, auth_type: &str) -> CloudqlResult<()> {
        let auth_type = ctx.infer_auth_type(auth_type);
        ctx.auth_type = auth_type.to_string();
        self.authenticator.access_token(ctx).await?;
        let principal = self.authenticator.principal(ctx).await.unwrap_or_default();
        ctx.activate(&principal, auth_type);
        tracing::info!("Authenticated to {} as {} ({})", Self::NAME, ctx.id, auth_type);
        Ok(())
    }

    async fn show_auth(&self, ctx: &mut AuthCtx) -> CloudqlResult<AuthMetadata> {
        let auth_type = ctx.infer_auth_type(&ctx.auth_type);
        let principal = self.authenticator.principal(ctx).await.map_err(|e| {
            tracing::info!("{}", e);
            CloudqlError::Auth(format!("not authenticated to provider '{}'", Self::NAME))
        })?;
        let source = if auth_type == AUTH_SERVICE_ACCOUNT {
            ctx.key_file_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        } else {
            "OAuth".to_string()
        };
        ctx.activate(&principal, auth_type);
        Ok(AuthMetadata {
            principal,
            auth_type: auth_type.to_ascii_uppercase(),
            source,
        })
    }

    async fn auth_revoke(&self, ctx: &mut AuthCtx) -> CloudqlResult<()> {
        self.authenticator.revoke(ctx).await?;
        ctx.deactivate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use crate::metadata::{Parameter, ParameterLocation};
    use serde_json::json;

    fn service(id: &str, name: &str, preferred: bool) -> Service {
        Service {
            id: id.into(),
            name: name.into(),
            preferred,
            ..Default::default()
        }
    }

    fn provider(use_non_preferred: bool) -> GoogleProvider {
        let store = DiscoveryStore::in_memory("google", vec![], vec![]);
        GoogleProvider::new(
            store,
            Arc::new(StaticAuthenticator::new("t", "me@example.com")),
            use_non_preferred,
        )
    }

    #[test]
    fn test_select_service_rules() {
        let services = vec![
            service("compute__v1", "compute", true),
            service("compute__beta", "compute", false),
            service("compute__alpha", "compute", false),
        ];
        let p = provider(false);
        assert_eq!(p.select_service(&services, "compute").unwrap().id, "compute__v1");
        assert_eq!(p.select_service(&services, "compute__beta").unwrap().id, "compute__beta");
        assert_eq!(p.select_service(&services, "compute:alpha").unwrap().id, "compute__alpha");
        let err = p.select_service(&services, "storage").unwrap_err();
        assert_eq!(err.to_string(), "Could not find Service: 'storage' from Provider: 'google'");

        let p = provider(true);
        let err = p.select_service(&services, "compute").unwrap_err();
        assert!(err.to_string().starts_with("ambiguous service 'compute'"));
    }

    #[test]
    fn test_expand_path() {
        let params = BTreeMap::from([
            ("project".to_string(), json!("p")),
            ("parent".to_string(), json!("projects/p")),
        ]);
        assert_eq!(
            expand_path("projects/{project}/global/networks", &params).unwrap(),
            "projects/p/global/networks"
        );
        assert_eq!(
            expand_path("v1/{+parent}/aggregated", &params).unwrap(),
            "v1/projects/p/aggregated"
        );
        assert_eq!(expand_path("x/{parent}", &params).unwrap(), "x/projects%2Fp");
        assert!(expand_path("x/{zone}", &params).is_err());
    }

    #[test]
    fn test_parameterise_appends_query() {
        let mut method = Method {
            path: "projects/{project}/zones/{zone}/instances".into(),
            ..Default::default()
        };
        for name in ["project", "zone"] {
            method
                .parameters
                .insert(name.into(), Parameter::new(name, ParameterLocation::Path, true));
        }
        let mut params = HttpParameters::default();
        params.path_params.insert("project".into(), json!("testing-project"));
        params.path_params.insert("zone".into(), json!("australia-southeast1-b"));
        params.query_params.insert("filter".into(), json!("name = a b"));
        params.query_params.insert("maxResults".into(), json!(5));

        let url = provider(false)
            .parameterise("https://compute.googleapis.com/compute/v1/", &method, &params)
            .unwrap();
        assert_eq!(
            url,
            "https://compute.googleapis.com/compute/v1/projects/testing-project/zones/australia-southeast1-b/instances?filter=name+%3D+a+b&maxResults=5"
        );
    }

    #[test]
    fn test_describe_method_preference() {
        let mut rsc = Resource::default();
        rsc.methods.insert("listByZone".into(), Method { name: "listByZone".into(), ..Default::default() });
        assert_eq!(provider(false).infer_describe_method(&rsc).unwrap().name, "listByZone");
        rsc.methods.insert("aggregatedList".into(), Method { name: "aggregatedList".into(), ..Default::default() });
        assert_eq!(provider(false).infer_describe_method(&rsc).unwrap().name, "aggregatedList");
        assert!(provider(false).infer_describe_method(&Resource::default()).is_err());
    }

    #[tokio::test]
    async fn test_show_auth_interactive() {
        let p = provider(false);
        let mut ctx = AuthCtx::new(vec![], None);
        let meta = p.show_auth(&mut ctx).await.unwrap();
        assert_eq!(meta.auth_type, "INTERACTIVE");
        assert_eq!(meta.source, "OAuth");
        assert!(ctx.active);
        p.auth_revoke(&mut ctx).await.unwrap();
        assert!(!ctx.active);
    }
}
