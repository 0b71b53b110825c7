//! Statement analysis.
//!
//! One entry point per statement kind. Each binds table references through
//! the taxonomy, validates columns and parameters against the bound method
//! and its schemas, and produces an [`Analysis`] ready to become a primitive.
//! Analysis stops at the first error.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::ast::{
    CommentDirectives, Delete, Describe, Exec, Expr, Insert, Literal, Select, SelectItem, Show,
    ShowFilter, Statement, TableName, TableRef, CompareOp, directives,
};
use crate::error::{CloudqlError, CloudqlResult};
use crate::filter::Predicate;
use crate::metadata::{AuthMetadata, Method, Resource, Service};
use crate::output::ResultSet;
use crate::params::BODY_PREFIX;
use crate::primitive::{
    ColumnSource, LocalPrimitive, MetaDataPrimitive, MetaDataQuery, OutputColumn, Projection,
    SelectShape,
};
use crate::provider::Provider;
use crate::request::{self, HttpArmoury};
use crate::schema::Schema;
use crate::taxonomy::{self, HeirarchyIdentifiers, HeirarchyObjects, ProviderMap};
use crate::template;

/// Per-table build state.
#[derive(Debug, Clone)]
pub struct ExtendedTableMetadata {
    pub heirarchy: HeirarchyObjects,
    pub armoury: HttpArmoury,
    /// Response key holding list rows, if the response has one.
    pub select_items_key: Option<String>,
}

/// Kind of mutating statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Insert,
    Delete,
    Exec,
}

/// Validated statement, ready to become a primitive.
#[derive(Debug, Clone)]
pub enum Analysis {
    Select {
        table: ExtendedTableMetadata,
        shape: SelectShape,
    },
    Mutation {
        kind: MutationKind,
        table: ExtendedTableMetadata,
        directives: CommentDirectives,
    },
    /// Multi-table SELECT, by table name.
    Join(Vec<String>),
    MetaData(MetaDataPrimitive),
    Local(LocalPrimitive),
}

/// Session state analysis reads.
pub struct Analyzer<'a> {
    pub providers: &'a ProviderMap,
    pub current_provider: &'a str,
    /// `maxResults` hint for list calls; 0 leaves it unset.
    pub max_results: u64,
}

fn literal_value(expr: &Expr, context: &str) -> CloudqlResult<Value> {
    match expr {
        Expr::Literal(l) => Ok(l.to_json()),
        other => Err(CloudqlError::validation(format!(
            "{} only supports literal values; got '{}'",
            context, other
        ))),
    }
}

/// `column = literal` conjuncts of a WHERE clause, keyed by column.
fn equalities(expr: &Expr, out: &mut BTreeMap<String, Value>) {
    match expr {
        Expr::And(l, r) => {
            equalities(l, out);
            equalities(r, out);
        }
        Expr::Comparison {
            left,
            op: CompareOp::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), Expr::Literal(l)) | (Expr::Literal(l), Expr::Column(c)) => {
                out.insert(c.name.clone(), l.to_json());
            }
            _ => {}
        },
        _ => {}
    }
}

/// Whether a WHERE clause is only `column = literal` joined by AND.
fn is_equality_conjunction(expr: &Expr) -> bool {
    match expr {
        Expr::And(l, r) => is_equality_conjunction(l) && is_equality_conjunction(r),
        Expr::Comparison {
            left,
            op: CompareOp::Eq,
            right,
        } => matches!(
            (left.as_ref(), right.as_ref()),
            (Expr::Column(_), Expr::Literal(_)) | (Expr::Literal(_), Expr::Column(_))
        ),
        _ => false,
    }
}

/// Fail unless every required parameter of `method` is supplied.
pub fn check_required<'s>(
    method: &Method,
    supplied: impl IntoIterator<Item = &'s String>,
) -> CloudqlResult<()> {
    let mut missing: BTreeSet<&str> = method.required_parameters().into_keys().collect();
    for key in supplied {
        missing.remove(key.as_str());
    }
    if missing.is_empty() {
        return Ok(());
    }
    let missing: Vec<&str> = missing.into_iter().collect();
    Err(CloudqlError::validation(format!(
        "Query cannot be executed, missing required parameters: {{ {} }}",
        missing.join(", ")
    )))
}

fn column_not_present(column: &str) -> CloudqlError {
    CloudqlError::validation(format!(
        "column = '{}' is NOT present in either the provider data or the method parameters",
        column
    ))
}

/// Fail unless `column` names a method parameter or a field of the
/// response, but not both.
fn check_response_column(
    heirarchy: &HeirarchyObjects,
    row_schema: &Schema,
    response: &Schema,
    column: &str,
) -> CloudqlResult<()> {
    let registry = heirarchy.schemas();
    let is_param = heirarchy.method.parameter(column).is_some();
    let field = registry
        .find_field(row_schema, column)
        .or_else(|| registry.find_field(response, column));
    match (is_param, field) {
        (true, Some((_, output_only))) if !output_only => Err(CloudqlError::validation(format!(
            "column = '{}' is ambiguous: it is both a parameter of method '{}' and a field of its response",
            column, heirarchy.method.name
        ))),
        (false, None) => Err(column_not_present(column)),
        _ => Ok(()),
    }
}

/// Fail unless `column` names a method parameter or a field of the response.
fn check_delete_column(heirarchy: &HeirarchyObjects, column: &str) -> CloudqlResult<()> {
    if heirarchy.method.parameter(column).is_some() {
        return Ok(());
    }
    let in_response = heirarchy
        .response_schema()
        .is_some_and(|s| heirarchy.schemas().find_by_path(s, column).is_some());
    if in_response {
        Ok(())
    } else {
        Err(CloudqlError::validation(format!(
            "DELETE WHERE column = '{}' is NOT present in data returned from provider",
            column
        )))
    }
}

/// Fail unless `column` names a method parameter or a `data__` field of the request.
fn check_request_column(heirarchy: &HeirarchyObjects, column: &str) -> CloudqlResult<()> {
    if heirarchy.method.parameter(column).is_some() {
        return Ok(());
    }
    let in_body = column.strip_prefix(BODY_PREFIX).is_some_and(|field| {
        heirarchy
            .request_schema()
            .is_some_and(|s| s.properties.contains_key(field))
    });
    if in_body {
        Ok(())
    } else {
        Err(column_not_present(column))
    }
}

/// Validate a request body assembled from `data__` parameters.
fn validate_body(heirarchy: &HeirarchyObjects, armoury: &HttpArmoury) -> CloudqlResult<()> {
    let (Some(schema), Some(Value::Object(body))) =
        (heirarchy.request_schema(), armoury.parameters.body())
    else {
        return Ok(());
    };
    heirarchy
        .schemas()
        .validate_payload(schema, &body, &heirarchy.method.id)
}

fn items_key(heirarchy: &HeirarchyObjects) -> Option<String> {
    let response = heirarchy.response_schema()?;
    heirarchy
        .schemas()
        .select_list_items(response, heirarchy.provider.default_select_items_key())
        .map(|(_, key)| key)
}

impl<'a> Analyzer<'a> {
    pub fn new(providers: &'a ProviderMap, current_provider: &'a str) -> Self {
        Self {
            providers,
            current_provider,
            max_results: 0,
        }
    }

    pub fn with_max_results(mut self, max_results: u64) -> Self {
        self.max_results = max_results;
        self
    }

    fn provider(&self, name: &str) -> CloudqlResult<Arc<dyn Provider>> {
        let name = if name.is_empty() {
            self.current_provider
        } else {
            name
        };
        taxonomy::provider(self.providers, name)
    }

    async fn resolve_resource(
        &self,
        table: &TableName,
        action: &str,
    ) -> CloudqlResult<HeirarchyObjects> {
        let ids = HeirarchyIdentifiers::resource_terminal(table, self.current_provider);
        taxonomy::resolve(self.providers, ids, action).await
    }

    /// Analyze one statement.
    pub async fn analyze(&self, statement: &Statement) -> CloudqlResult<Analysis> {
        match statement {
            Statement::Select(s) => self.analyze_select(s).await,
            Statement::Insert(s) => self.analyze_insert(s).await,
            Statement::Delete(s) => self.analyze_delete(s).await,
            Statement::Exec(s) => self.analyze_exec(s).await,
            Statement::Show(s) => self.analyze_show(s).await,
            Statement::Describe(s) => self.analyze_describe(s).await,
            Statement::Auth(a) => {
                let provider = self.provider(&a.provider)?;
                Ok(Analysis::MetaData(MetaDataPrimitive::new(MetaDataQuery::Auth {
                    provider,
                    auth_type: a.auth_type.clone().unwrap_or_default(),
                    key_file: a.key_file.as_ref().map(PathBuf::from),
                })))
            }
            Statement::AuthRevoke(a) => {
                let provider = self.provider(&a.provider)?;
                Ok(Analysis::MetaData(MetaDataPrimitive::new(
                    MetaDataQuery::AuthRevoke(provider),
                )))
            }
            Statement::Use(u) => {
                self.provider(&u.provider)?;
                Ok(Analysis::Local(LocalPrimitive::Use(u.provider.clone())))
            }
            Statement::Sleep(s) => {
                let millis = match &s.duration {
                    Expr::Literal(Literal::Integer(n)) => *n,
                    other => {
                        return Err(CloudqlError::validation(format!(
                            "sleep duration must be an integer; got '{}'",
                            other
                        )));
                    }
                };
                if millis <= 0 {
                    return Err(CloudqlError::validation(format!(
                        "sleep duration {} not allowed, must be > 0",
                        millis
                    )));
                }
                Ok(Analysis::Local(LocalPrimitive::Sleep(millis.unsigned_abs())))
            }
            Statement::Unsupported(kind) => Err(CloudqlError::unsupported(format!(
                "statement type = '{}' not yet supported",
                kind
            ))),
        }
    }

    /// Table-less SELECT of literal values.
    fn analyze_values(&self, select: &Select) -> CloudqlResult<Analysis> {
        let mut row = Map::new();
        let mut columns = Vec::with_capacity(select.items.len());
        for (idx, item) in select.items.iter().enumerate() {
            let SelectItem::Expr { expr, alias } = item else {
                return Err(CloudqlError::validation("SELECT * requires a FROM clause"));
            };
            let value = literal_value(expr, "SELECT without FROM")?;
            let header = alias.clone().unwrap_or_else(|| format!("val_{}", idx));
            row.insert(header.clone(), value);
            columns.push(header);
        }
        Ok(Analysis::Local(LocalPrimitive::Values(ResultSet::new(
            columns,
            vec![row],
        ))))
    }

    async fn analyze_select(&self, select: &Select) -> CloudqlResult<Analysis> {
        let table = match &select.from {
            None => return self.analyze_values(select),
            Some(TableRef::Table { name, .. }) => name,
            Some(join @ TableRef::Join { .. }) => {
                let names = join.table_names().iter().map(|t| t.to_string()).collect();
                return Ok(Analysis::Join(names));
            }
        };

        let heirarchy = self.resolve_resource(table, "select").await?;
        let registry = heirarchy.schemas();
        let unsuitable = || CloudqlError::validation("schema unsuitable for select query");
        let response = heirarchy.response_schema().ok_or_else(unsuitable)?;
        let (row_schema, select_items_key) = match registry
            .select_list_items(response, heirarchy.provider.default_select_items_key())
        {
            Some((array, key)) => (registry.items(array).ok_or_else(unsuitable)?, Some(key)),
            None => (response, None),
        };

        let mut star = false;
        let mut columns = Vec::new();
        for (idx, item) in select.items.iter().enumerate() {
            match item {
                SelectItem::Star => star = true,
                SelectItem::Expr {
                    expr: Expr::Column(c),
                    alias,
                } => {
                    check_response_column(&heirarchy, row_schema, response, &c.name)?;
                    columns.push(OutputColumn {
                        header: alias.clone().unwrap_or_else(|| c.name.clone()),
                        source: ColumnSource::Field(c.name.clone()),
                    });
                }
                SelectItem::Expr {
                    expr: Expr::Literal(l),
                    alias,
                } => columns.push(OutputColumn {
                    header: alias.clone().unwrap_or_else(|| format!("val_{}", idx)),
                    source: ColumnSource::Value(l.to_json()),
                }),
                SelectItem::Expr { expr, .. } => {
                    return Err(CloudqlError::unsupported(format!(
                        "select item '{}' not supported",
                        expr
                    )));
                }
            }
        }
        if star {
            if !columns.is_empty() {
                return Err(CloudqlError::validation(
                    "'*' cannot be combined with other select items",
                ));
            }
            columns = registry
                .all_columns(row_schema)
                .into_iter()
                .map(OutputColumn::field)
                .collect();
        }

        let mut params = BTreeMap::new();
        let mut filter = None;
        if let Some(where_clause) = &select.where_clause {
            for column in where_clause.column_names() {
                check_response_column(&heirarchy, row_schema, response, &column)?;
            }
            equalities(where_clause, &mut params);
            let method = &heirarchy.method;
            filter = Some(Predicate::rows(where_clause, &|c: &str| {
                method.parameter(c).is_some()
            })?);
        }
        check_required(&heirarchy.method, params.keys())?;
        if self.max_results > 0
            && heirarchy.method.parameter("maxResults").is_some()
            && !params.contains_key("maxResults")
        {
            params.insert("maxResults".to_string(), Value::from(self.max_results));
        }

        for order in &select.order_by {
            let is_header = columns.iter().any(|c| c.header == order.column);
            if !is_header {
                check_response_column(&heirarchy, row_schema, response, &order.column)?;
            }
        }

        let armoury = request::build(&heirarchy, &params, None)?;
        let shape = SelectShape {
            projection: Projection(columns),
            filter,
            order_by: select
                .order_by
                .iter()
                .map(|o| (o.column.clone(), o.descending))
                .collect(),
            limit: select.limit,
        };
        Ok(Analysis::Select {
            table: ExtendedTableMetadata {
                heirarchy,
                armoury,
                select_items_key,
            },
            shape,
        })
    }

    async fn analyze_insert(&self, insert: &Insert) -> CloudqlResult<Analysis> {
        let heirarchy = self.resolve_resource(&insert.table, "insert").await?;
        let [values] = insert.rows.as_slice() else {
            return Err(CloudqlError::validation(format!(
                "INSERT supports exactly one row of values; got {}",
                insert.rows.len()
            )));
        };
        if insert.columns.len() != values.len() {
            return Err(CloudqlError::validation(format!(
                "number of columns = {} does not match number of values = {}",
                insert.columns.len(),
                values.len()
            )));
        }

        let mut params = BTreeMap::new();
        for (column, expr) in insert.columns.iter().zip(values) {
            check_request_column(&heirarchy, column)?;
            params.insert(column.clone(), literal_value(expr, "INSERT")?);
        }
        check_required(&heirarchy.method, params.keys())?;

        let armoury = request::build(&heirarchy, &params, None)?;
        validate_body(&heirarchy, &armoury)?;
        Ok(self.mutation(MutationKind::Insert, heirarchy, armoury, &insert.directives))
    }

    async fn analyze_delete(&self, delete: &Delete) -> CloudqlResult<Analysis> {
        let heirarchy = self.resolve_resource(&delete.table, "delete").await?;
        let mut params = BTreeMap::new();
        if let Some(where_clause) = &delete.where_clause {
            if !is_equality_conjunction(where_clause) {
                return Err(CloudqlError::validation(
                    "DELETE supports only equality comparisons joined by AND",
                ));
            }
            equalities(where_clause, &mut params);
        }
        for column in params.keys() {
            check_delete_column(&heirarchy, column)?;
        }
        check_required(&heirarchy.method, params.keys())?;

        let armoury = request::build(&heirarchy, &params, None)?;
        Ok(self.mutation(MutationKind::Delete, heirarchy, armoury, &delete.directives))
    }

    async fn analyze_exec(&self, exec: &Exec) -> CloudqlResult<Analysis> {
        if exec.method.parts.len() < 3 {
            return Err(CloudqlError::resolution(format!(
                "EXEC requires a method qualified by service and resource; got '{}'",
                exec.method
            )));
        }
        let ids = HeirarchyIdentifiers::method_terminal(&exec.method, self.current_provider);
        let heirarchy = taxonomy::resolve(self.providers, ids, "exec").await?;

        let mut params = BTreeMap::new();
        for var in &exec.vars {
            check_request_column(&heirarchy, &var.name)?;
            params.insert(var.name.clone(), literal_value(&var.value, "EXEC")?);
        }
        check_required(&heirarchy.method, params.keys())?;

        let payload = match &exec.payload {
            None => None,
            Some(payload) => {
                if !payload.format.eq_ignore_ascii_case("json") {
                    return Err(CloudqlError::unsupported(format!(
                        "payload format '{}' not supported",
                        payload.format
                    )));
                }
                let Value::Object(body) = serde_json::from_str::<Value>(&payload.content)? else {
                    return Err(CloudqlError::validation("EXEC payload must be a JSON object"));
                };
                let Some(schema) = heirarchy.request_schema() else {
                    return Err(CloudqlError::validation(format!(
                        "method '{}' does not accept a request body",
                        heirarchy.method.id
                    )));
                };
                heirarchy
                    .schemas()
                    .validate_payload(schema, &body, &heirarchy.method.id)?;
                Some(body)
            }
        };

        let armoury = request::build(&heirarchy, &params, payload.as_ref())?;
        if payload.is_none() {
            validate_body(&heirarchy, &armoury)?;
        }
        Ok(self.mutation(MutationKind::Exec, heirarchy, armoury, &exec.directives))
    }

    fn mutation(
        &self,
        kind: MutationKind,
        heirarchy: HeirarchyObjects,
        armoury: HttpArmoury,
        directives: &CommentDirectives,
    ) -> Analysis {
        let select_items_key = items_key(&heirarchy);
        Analysis::Mutation {
            kind,
            table: ExtendedTableMetadata {
                heirarchy,
                armoury,
                select_items_key,
            },
            directives: directives.clone(),
        }
    }

    async fn analyze_describe(&self, describe: &Describe) -> CloudqlResult<Analysis> {
        let ids = HeirarchyIdentifiers::resource_terminal(&describe.table, self.current_provider);
        let provider = self.provider(&ids.provider_name)?;
        let (service, resource) = provider
            .resource(&ids.service_name, &ids.resource_name)
            .await?;
        let method = provider.infer_describe_method(&resource)?;
        let registry = &service.schemas;
        let response = method
            .response_type()
            .and_then(|t| registry.get(t))
            .ok_or_else(|| CloudqlError::validation("schema unsuitable for select query"))?;
        let row_schema = registry
            .select_list_items(response, provider.default_select_items_key())
            .and_then(|(array, _)| registry.items(array))
            .unwrap_or(response);

        let mut columns = vec!["name".to_string(), "type".to_string()];
        if describe.extended {
            columns.push("description".to_string());
        }
        let rows = registry
            .describe(row_schema)
            .into_iter()
            .map(|c| {
                let mut row = Map::new();
                row.insert("name".into(), Value::from(c.name));
                row.insert("type".into(), Value::from(c.column_type));
                if describe.extended {
                    row.insert("description".into(), Value::from(c.description));
                }
                row
            })
            .collect();
        Ok(Analysis::MetaData(MetaDataPrimitive::new(MetaDataQuery::Fixed(
            ResultSet::new(columns, rows),
        ))))
    }

    async fn analyze_show(&self, show: &Show) -> CloudqlResult<Analysis> {
        let target = show.target.clone().unwrap_or_default();
        let kind = show.kind.as_str();
        let (query, columns, provider) = match kind {
            "PROVIDERS" => {
                let provider = self.provider("")?;
                let names = self.providers.keys().cloned().collect();
                (MetaDataQuery::Providers(names), vec!["name".to_string()], provider)
            }
            "SERVICES" => {
                let provider = self.provider(target.name())?;
                let query = MetaDataQuery::Services {
                    provider: Arc::clone(&provider),
                    extended: show.extended,
                };
                (query, Service::row_columns(show.extended), provider)
            }
            "RESOURCES" => {
                if target.name().is_empty() {
                    return Err(CloudqlError::resolution(
                        "no service designated from which to resolve resources",
                    ));
                }
                let provider = self.provider(target.qualifier())?;
                let query = MetaDataQuery::Resources {
                    provider: Arc::clone(&provider),
                    service: target.name().to_string(),
                    extended: show.extended,
                };
                (query, Resource::row_columns(show.extended), provider)
            }
            "METHODS" => {
                if target.qualifier().is_empty() {
                    return Err(CloudqlError::resolution(
                        "no resource designated from which to resolve methods",
                    ));
                }
                let provider = self.provider(target.qualifier_second())?;
                let query = MetaDataQuery::Methods {
                    provider: Arc::clone(&provider),
                    service: target.qualifier().to_string(),
                    resource: target.name().to_string(),
                    extended: show.extended,
                };
                (query, Method::row_columns(show.extended), provider)
            }
            "AUTH" => {
                let provider = self.provider(target.name())?;
                (
                    MetaDataQuery::ShowAuth(Arc::clone(&provider)),
                    AuthMetadata::row_columns(),
                    provider,
                )
            }
            "INSERT" => return self.analyze_show_insert(show, &target).await,
            other => {
                return Err(CloudqlError::unsupported(format!(
                    "SHOW {} not supported",
                    other
                )));
            }
        };

        let filter = match &show.filter {
            None => None,
            Some(ShowFilter::Like(pattern)) => {
                Some(Predicate::like(provider.likeable_columns(kind), pattern)?)
            }
            Some(ShowFilter::Where(expr)) => {
                let predicate = Predicate::metadata(expr)?;
                if let Some(unknown) = predicate.columns().into_iter().find(|c| !columns.contains(c)) {
                    return Err(CloudqlError::validation(format!(
                        "SHOW key = '{}' does NOT exist",
                        unknown
                    )));
                }
                Some(predicate)
            }
        };
        Ok(Analysis::MetaData(MetaDataPrimitive::new(query).with_filter(filter)))
    }

    async fn analyze_show_insert(&self, show: &Show, target: &TableName) -> CloudqlResult<Analysis> {
        let heirarchy = self.resolve_resource(target, "insert").await?;
        let statement = template::insert_statement(
            &heirarchy.table_name(),
            &heirarchy.method,
            heirarchy.schemas(),
            heirarchy.request_schema(),
            &show.columns,
            show.extended,
            show.directives.is_set(directives::REQUIRED),
        )?;
        let row = Map::from_iter([("insert_statement".to_string(), Value::from(statement))]);
        Ok(Analysis::MetaData(MetaDataPrimitive::new(MetaDataQuery::Fixed(
            ResultSet::new(vec!["insert_statement".to_string()], vec![row]),
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Parameter, ParameterLocation};

    #[test]
    fn test_check_required_names_all_missing() {
        let mut m = Method::default();
        for name in ["zone", "project", "instance"] {
            m.parameters.insert(name.into(), Parameter::new(name, ParameterLocation::Path, true));
        }
        m.parameters.insert("filter".into(), Parameter::new("filter", ParameterLocation::Query, false));

        let supplied = vec!["zone".to_string(), "filter".to_string()];
        let err = check_required(&m, &supplied).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query cannot be executed, missing required parameters: { instance, project }"
        );
        let all = vec!["zone".to_string(), "project".to_string(), "instance".to_string()];
        assert!(check_required(&m, &all).is_ok());
    }

    #[test]
    fn test_equalities_from_conjunction() {
        let expr = crate::parser::parse_expr("zone = 'z' and 'p' = project and status != 'DONE'")
            .unwrap()
            .1;
        let mut params = BTreeMap::new();
        equalities(&expr, &mut params);
        assert_eq!(params.len(), 2);
        assert_eq!(params["project"], "p");
        assert!(!is_equality_conjunction(&expr));
    }
}
