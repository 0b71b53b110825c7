//! Executable plan units.
//!
//! A [`Primitive`] is the compiled form of one statement. Variants carry all
//! the state they need; executing one only reads from the plan and writes to
//! the [`ExecContext`].

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthCtx;
use crate::error::{CloudqlError, CloudqlResult};
use crate::filter::{Predicate, sort_order};
use crate::metadata::{AuthMetadata, Method, Resource, Service};
use crate::monitor::AsyncMonitorPrimitive;
use crate::output::{ExecutorOutput, ResultSet, lookup};
use crate::provider::Provider;
use crate::request::HttpArmoury;
use crate::transport::{HttpRequest, HttpTransport, process_response};

/// Message returned by a mutating call without SHOWRESULTS.
pub const SUCCESS_MESSAGE: &str = "The operation completed successfully";

const SELECT_HINT: &str = ", consider using a SELECT statement if you are performing an operation that returns data";

/// Response key carrying the continuation token of a list call.
const NEXT_PAGE_TOKEN: &str = "nextPageToken";

/// Receives progress lines as they happen.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Mutable per-session state primitives execute against.
pub struct ExecContext {
    pub transport: Arc<dyn HttpTransport>,
    /// Credentials state per provider name.
    pub auth: BTreeMap<String, AuthCtx>,
    /// Key file for contexts created on first use.
    pub key_file_path: Option<PathBuf>,
    pub current_provider: String,
    pub poll_interval: Duration,
    pub dry_run: bool,
    /// Maximum pages fetched per SELECT; 0 fetches every page.
    pub page_limit: u64,
    pub progress: Option<ProgressFn>,
}

impl ExecContext {
    pub fn new(transport: Arc<dyn HttpTransport>, current_provider: impl Into<String>) -> Self {
        Self {
            transport,
            auth: BTreeMap::new(),
            key_file_path: None,
            current_provider: current_provider.into(),
            poll_interval: Duration::from_secs(10),
            dry_run: false,
            page_limit: 0,
            progress: None,
        }
    }

    /// Credentials state for a provider, created on first use.
    pub fn auth_ctx(&mut self, provider: &str) -> &mut AuthCtx {
        let key_file = self.key_file_path.clone();
        self.auth
            .entry(provider.to_string())
            .or_insert_with(|| AuthCtx::new(Vec::new(), key_file))
    }

    /// Emit a progress line.
    pub fn report(&self, line: &str) {
        tracing::info!("{}", line);
        if let Some(progress) = &self.progress {
            progress(line);
        }
    }

    /// Send a request with the provider's credentials and decode the response.
    pub async fn send(
        &mut self,
        provider: &dyn Provider,
        request: &HttpRequest,
    ) -> CloudqlResult<Value> {
        let headers = provider
            .authenticate(self.auth_ctx(provider.name()))
            .await?;
        let mut request = request.clone();
        request.headers.extend(headers);
        let response = self.transport.execute(&request).await?;
        process_response(&response)
    }
}

/// Where an output column's values come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// A (possibly dotted) field of each row.
    Field(String),
    /// The same value on every row.
    Value(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub header: String,
    pub source: ColumnSource,
}

impl OutputColumn {
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            header: name.clone(),
            source: ColumnSource::Field(name),
        }
    }
}

/// Output columns of a SELECT, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection(pub Vec<OutputColumn>);

impl Projection {
    fn field_for<'a>(&'a self, name: &'a str) -> &'a str {
        match self.0.iter().find(|c| c.header == name).map(|c| &c.source) {
            Some(ColumnSource::Field(f)) => f,
            _ => name,
        }
    }

    fn apply(&self, rows: Vec<Map<String, Value>>) -> ResultSet {
        let projected = rows
            .iter()
            .map(|row| {
                self.0
                    .iter()
                    .map(|c| {
                        let value = match &c.source {
                            ColumnSource::Field(f) => lookup(row, f).cloned().unwrap_or(Value::Null),
                            ColumnSource::Value(v) => v.clone(),
                        };
                        (c.header.clone(), value)
                    })
                    .collect()
            })
            .collect();
        ResultSet::new(self.0.iter().map(|c| c.header.clone()).collect(), projected)
    }
}

/// Row post-processing of a SELECT.
#[derive(Debug, Clone)]
pub struct SelectShape {
    pub projection: Projection,
    /// Residual filter on returned rows.
    pub filter: Option<Predicate>,
    /// `(column, descending)` pairs.
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<u64>,
}

/// What an HTTP call's response becomes.
#[derive(Debug, Clone)]
pub enum ResponseHandling {
    Select(SelectShape),
    /// INSERT, DELETE and EXEC.
    Mutation { show_results: bool },
}

/// Extract rows: the array under `key`, or the body itself as one row.
pub fn extract_rows(body: &Value, key: Option<&str>) -> Vec<Map<String, Value>> {
    let items = key.and_then(|k| body.get(k));
    match (items, body) {
        (Some(Value::Array(items)), _) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => map.clone(),
                other => Map::from_iter([("value".to_string(), other.clone())]),
            })
            .collect(),
        (Some(_), _) => Vec::new(),
        (None, Value::Object(map)) if key.is_none() => vec![map.clone()],
        _ => Vec::new(),
    }
}

/// A REST call against a resolved method.
#[derive(Clone)]
pub struct HttpRestPrimitive {
    pub provider: Arc<dyn Provider>,
    pub method: Method,
    pub armoury: HttpArmoury,
    /// Response key holding list rows, if the response has one.
    pub select_items_key: Option<String>,
    pub handling: ResponseHandling,
}

impl std::fmt::Debug for HttpRestPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRestPrimitive")
            .field("method", &self.method.id)
            .field("request", &self.armoury.request)
            .field("select_items_key", &self.select_items_key)
            .finish()
    }
}

impl HttpRestPrimitive {
    /// Send the request once and decode the body.
    pub async fn send(&self, ctx: &mut ExecContext) -> CloudqlResult<Value> {
        ctx.send(self.provider.as_ref(), &self.armoury.request).await
    }

    /// Rendition of the request instead of sending it.
    pub fn dry_run(&self) -> ExecutorOutput {
        let request = &self.armoury.request;
        let body = request
            .body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let row = Map::from_iter([
            ("method".to_string(), Value::from(request.method.clone())),
            ("url".to_string(), Value::from(request.url.clone())),
            ("body".to_string(), Value::from(body)),
        ]);
        ExecutorOutput::rows(ResultSet::new(
            vec!["method".into(), "url".into(), "body".into()],
            vec![row],
        ))
    }

    /// Every page of a list call, concatenated.
    async fn fetch_rows(&self, ctx: &mut ExecContext) -> CloudqlResult<Vec<Map<String, Value>>> {
        let key = self.select_items_key.as_deref();
        let mut body = self.send(ctx).await?;
        let mut rows = extract_rows(&body, key);
        let mut pages = 1u64;

        while let Some(token) = body.get(NEXT_PAGE_TOKEN).and_then(Value::as_str) {
            if token.is_empty() || (ctx.page_limit > 0 && pages >= ctx.page_limit) {
                break;
            }
            tracing::debug!("Fetching page {} of {}", pages + 1, self.method.id);
            let request = self.armoury.page(token)?;
            body = ctx.send(self.provider.as_ref(), &request).await?;
            rows.extend(extract_rows(&body, key));
            pages += 1;
        }
        Ok(rows)
    }

    fn success_message(&self) -> String {
        match self.method.name.as_str() {
            "get" | "list" | "aggregatedList" => format!("{}{}", SUCCESS_MESSAGE, SELECT_HINT),
            _ => SUCCESS_MESSAGE.to_string(),
        }
    }

    /// Output of a finished mutating call.
    pub fn mutation_output(&self, body: Value, show_results: bool) -> ExecutorOutput {
        if show_results {
            let rows = extract_rows(&body, self.select_items_key.as_deref());
            let rows = if rows.is_empty() {
                extract_rows(&body, None)
            } else {
                rows
            };
            return ExecutorOutput::rows(ResultSet::from_rows(rows)).with_body(body);
        }
        ExecutorOutput::message(self.success_message()).with_body(body)
    }

    pub async fn execute(&self, ctx: &mut ExecContext) -> CloudqlResult<ExecutorOutput> {
        if ctx.dry_run {
            return Ok(self.dry_run());
        }
        match &self.handling {
            ResponseHandling::Select(shape) => {
                let mut rows = self.fetch_rows(ctx).await?;
                if let Some(filter) = &shape.filter {
                    rows.retain(|r| filter.matches(r));
                }
                if !shape.order_by.is_empty() {
                    rows.sort_by(|a, b| {
                        shape
                            .order_by
                            .iter()
                            .map(|(col, desc)| {
                                let field = shape.projection.field_for(col);
                                let o = sort_order(lookup(a, field), lookup(b, field));
                                if *desc { o.reverse() } else { o }
                            })
                            .find(|o| o.is_ne())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
                if let Some(limit) = shape.limit {
                    rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                }
                Ok(ExecutorOutput::rows(shape.projection.apply(rows)))
            }
            ResponseHandling::Mutation { show_results } => {
                let body = self.send(ctx).await?;
                Ok(self.mutation_output(body, *show_results))
            }
        }
    }
}

/// Listings answered from provider metadata.
#[derive(Clone)]
pub enum MetaDataQuery {
    Providers(Vec<String>),
    Services {
        provider: Arc<dyn Provider>,
        extended: bool,
    },
    Resources {
        provider: Arc<dyn Provider>,
        service: String,
        extended: bool,
    },
    Methods {
        provider: Arc<dyn Provider>,
        service: String,
        resource: String,
        extended: bool,
    },
    ShowAuth(Arc<dyn Provider>),
    Auth {
        provider: Arc<dyn Provider>,
        auth_type: String,
        key_file: Option<PathBuf>,
    },
    AuthRevoke(Arc<dyn Provider>),
    /// Result computed while planning (DESCRIBE, SHOW INSERT).
    Fixed(ResultSet),
}

#[derive(Clone)]
pub struct MetaDataPrimitive {
    pub query: MetaDataQuery,
    pub filter: Option<Predicate>,
}

impl std::fmt::Debug for MetaDataPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaDataPrimitive")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl MetaDataPrimitive {
    pub fn new(query: MetaDataQuery) -> Self {
        Self {
            query,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<Predicate>) -> Self {
        self.filter = filter;
        self
    }

    fn filtered(&self, columns: Vec<String>, rows: Vec<Map<String, Value>>) -> ExecutorOutput {
        let rows = match &self.filter {
            Some(f) => rows.into_iter().filter(|r| f.matches(r)).collect(),
            None => rows,
        };
        ExecutorOutput::rows(ResultSet::new(columns, rows))
    }

    pub async fn execute(&self, ctx: &mut ExecContext) -> CloudqlResult<ExecutorOutput> {
        match &self.query {
            MetaDataQuery::Providers(names) => {
                let rows = names
                    .iter()
                    .map(|n| Map::from_iter([("name".to_string(), Value::from(n.clone()))]))
                    .collect();
                Ok(self.filtered(vec!["name".into()], rows))
            }
            MetaDataQuery::Services { provider, extended } => {
                let rows = provider
                    .services()
                    .await?
                    .iter()
                    .map(|s| s.to_row(*extended))
                    .collect();
                Ok(self.filtered(Service::row_columns(*extended), rows))
            }
            MetaDataQuery::Resources {
                provider,
                service,
                extended,
            } => {
                let handle = provider.service_handle(service).await?;
                let rows = handle
                    .resources
                    .values()
                    .map(|r| r.to_row(*extended))
                    .collect();
                Ok(self.filtered(Resource::row_columns(*extended), rows))
            }
            MetaDataQuery::Methods {
                provider,
                service,
                resource,
                extended,
            } => {
                let (_, resource) = provider.resource(service, resource).await?;
                let rows = resource
                    .methods
                    .values()
                    .map(|m| m.to_row(*extended))
                    .collect();
                Ok(self.filtered(Method::row_columns(*extended), rows))
            }
            MetaDataQuery::ShowAuth(provider) => {
                let meta = provider.show_auth(ctx.auth_ctx(provider.name())).await?;
                Ok(self.filtered(AuthMetadata::row_columns(), vec![meta.to_row()]))
            }
            MetaDataQuery::Auth {
                provider,
                auth_type,
                key_file,
            } => {
                let auth_ctx = ctx.auth_ctx(provider.name());
                if let Some(path) = key_file {
                    auth_ctx.key_file_path = Some(path.clone());
                }
                provider.auth(auth_ctx, auth_type).await?;
                let principal = if auth_ctx.id.is_empty() {
                    auth_ctx.auth_type.clone()
                } else {
                    auth_ctx.id.clone()
                };
                Ok(ExecutorOutput::message(format!(
                    "Authenticated to provider '{}' as '{}'",
                    provider.name(),
                    principal
                )))
            }
            MetaDataQuery::AuthRevoke(provider) => {
                provider.auth_revoke(ctx.auth_ctx(provider.name())).await?;
                Ok(ExecutorOutput::message(format!(
                    "Revoked credentials for provider '{}'",
                    provider.name()
                )))
            }
            MetaDataQuery::Fixed(result) => Ok(self.filtered(result.columns.clone(), result.rows.clone())),
        }
    }
}

/// Work done without I/O to a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalPrimitive {
    /// A table-less SELECT, evaluated while planning.
    Values(ResultSet),
    /// Milliseconds to sleep.
    Sleep(u64),
    /// Switch the current provider.
    Use(String),
}

impl LocalPrimitive {
    pub async fn execute(&self, ctx: &mut ExecContext) -> CloudqlResult<ExecutorOutput> {
        match self {
            LocalPrimitive::Values(result) => Ok(ExecutorOutput::rows(result.clone())),
            LocalPrimitive::Sleep(millis) => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                Ok(ExecutorOutput::message(format!(
                    "Success: slept for {} milliseconds",
                    millis
                )))
            }
            LocalPrimitive::Use(provider) => {
                ctx.current_provider = provider.clone();
                Ok(ExecutorOutput::message(format!("Using provider '{}'", provider)))
            }
        }
    }
}

/// Placeholder for multi-table SELECT; never executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPrimitive {
    pub tables: Vec<String>,
}

/// Compiled statement.
#[derive(Clone)]
pub enum Primitive {
    HttpRest(HttpRestPrimitive),
    MetaData(MetaDataPrimitive),
    Local(LocalPrimitive),
    AsyncMonitor(AsyncMonitorPrimitive),
    Join(JoinPrimitive),
}

impl Primitive {
    /// Run the primitive. Failures are reported in the output.
    pub async fn execute(&self, ctx: &mut ExecContext, txn_id: u64) -> ExecutorOutput {
        let result = match self {
            Primitive::HttpRest(p) => p.execute(ctx).await,
            Primitive::MetaData(p) => p.execute(ctx).await,
            Primitive::Local(p) => p.execute(ctx).await,
            Primitive::AsyncMonitor(p) => p.execute(ctx).await,
            Primitive::Join(_) => Err(CloudqlError::unsupported("joins not yet supported")),
        };
        let mut output = result.unwrap_or_else(ExecutorOutput::error);
        output.txn_id = txn_id;
        output
    }

    /// The prepared request, for primitives that send one.
    pub fn prepared_request(&self) -> Option<&HttpRequest> {
        match self {
            Primitive::HttpRest(p) => Some(&p.armoury.request),
            Primitive::AsyncMonitor(p) => Some(&p.precursor.armoury.request),
            _ => None,
        }
    }

    /// One-line summary for EXPLAIN.
    pub fn describe(&self) -> String {
        match self {
            Primitive::HttpRest(p) => format!(
                "HttpRest {} {} ({})",
                p.armoury.request.method, p.armoury.request.url, p.method.id
            ),
            Primitive::AsyncMonitor(p) => format!(
                "AsyncMonitor over HttpRest {} {} ({})",
                p.precursor.armoury.request.method,
                p.precursor.armoury.request.url,
                p.precursor.method.id
            ),
            Primitive::MetaData(p) => {
                let what = match &p.query {
                    MetaDataQuery::Providers(_) => "providers",
                    MetaDataQuery::Services { .. } => "services",
                    MetaDataQuery::Resources { .. } => "resources",
                    MetaDataQuery::Methods { .. } => "methods",
                    MetaDataQuery::ShowAuth(_) => "auth status",
                    MetaDataQuery::Auth { .. } => "authenticate",
                    MetaDataQuery::AuthRevoke(_) => "revoke credentials",
                    MetaDataQuery::Fixed(_) => "precomputed rows",
                };
                format!("MetaData {}", what)
            }
            Primitive::Local(LocalPrimitive::Values(rs)) => format!("Local values ({} columns)", rs.columns.len()),
            Primitive::Local(LocalPrimitive::Sleep(ms)) => format!("Local sleep {}ms", ms),
            Primitive::Local(LocalPrimitive::Use(p)) => format!("Local use {}", p),
            Primitive::Join(j) => format!("Join {}", j.tables.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use serde_json::json;

    #[test]
    fn test_extract_rows() {
        let body = json!({"items": [{"name": "a"}, {"name": "b"}], "kind": "compute#instanceList"});
        assert_eq!(extract_rows(&body, Some("items")).len(), 2);
        assert!(extract_rows(&json!({"kind": "x"}), Some("items")).is_empty());
        assert_eq!(extract_rows(&json!({"name": "a"}), None)[0]["name"], "a");
        assert_eq!(extract_rows(&json!({"items": ["x"]}), Some("items"))[0]["value"], "x");
    }

    #[test]
    fn test_projection_and_aliases() {
        let projection = Projection(vec![
            OutputColumn {
                header: "n".into(),
                source: ColumnSource::Field("name".into()),
            },
            OutputColumn {
                header: "k".into(),
                source: ColumnSource::Value(json!(1)),
            },
        ]);
        assert_eq!(projection.field_for("n"), "name");
        assert_eq!(projection.field_for("zone"), "zone");
        let rs = projection.apply(vec![json!({"name": "a"}).as_object().cloned().unwrap()]);
        assert_eq!(rs.columns, vec!["n", "k"]);
        assert_eq!(rs.cell(0, "k"), "1");
    }

    #[tokio::test]
    async fn test_local_primitives() {
        let mut ctx = ExecContext::new(Arc::new(ScriptedTransport::new()), "google");
        let out = Primitive::Local(LocalPrimitive::Sleep(1)).execute(&mut ctx, 7).await;
        assert_eq!(out.messages, vec!["Success: slept for 1 milliseconds"]);
        assert_eq!(out.txn_id, 7);

        Primitive::Local(LocalPrimitive::Use("other".into())).execute(&mut ctx, 8).await;
        assert_eq!(ctx.current_provider, "other");

        let out = Primitive::Join(JoinPrimitive { tables: vec![] }).execute(&mut ctx, 9).await;
        assert_eq!(out.error.unwrap().to_string(), "joins not yet supported");
    }

    #[tokio::test]
    async fn test_providers_listing_filters() {
        let mut ctx = ExecContext::new(Arc::new(ScriptedTransport::new()), "google");
        let prim = MetaDataPrimitive::new(MetaDataQuery::Providers(vec!["google".into(), "okta".into()]))
            .with_filter(Some(Predicate::like(vec!["name".into()], "goo%").unwrap()));
        let out = prim.execute(&mut ctx).await.unwrap();
        assert_eq!(out.result.unwrap().column_values("name"), vec!["google"]);
    }
}
