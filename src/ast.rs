//! Abstract syntax tree for the cloudql SQL dialect.

use std::collections::BTreeSet;
use std::fmt;

/// Directive names recognised inside `/*+ ... */` comments.
pub mod directives {
    pub const AWAIT: &str = "AWAIT";
    pub const NOSTATUS: &str = "NOSTATUS";
    pub const SHOWRESULTS: &str = "SHOWRESULTS";
    pub const REQUIRED: &str = "REQUIRED";
}

/// Flags carried by a statement's `/*+ ... */` comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentDirectives(BTreeSet<String>);

impl CommentDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a directive; names are case-insensitive.
    pub fn insert(&mut self, name: &str) {
        self.0.insert(name.to_ascii_uppercase());
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_uppercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A dot-qualified table or method reference, e.g. `google.compute.instances`.
///
/// Parts are stored left to right; accessors count from the right, so
/// `name()` is the last part and `qualifier_third()` the fourth from last.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableName {
    pub parts: Vec<String>,
}

impl TableName {
    pub fn new<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    fn from_right(&self, offset: usize) -> &str {
        self.parts
            .len()
            .checked_sub(offset + 1)
            .and_then(|i| self.parts.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.from_right(0)
    }

    pub fn qualifier(&self) -> &str {
        self.from_right(1)
    }

    pub fn qualifier_second(&self) -> &str {
        self.from_right(2)
    }

    pub fn qualifier_third(&self) -> &str {
        self.from_right(3)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .parts
            .iter()
            .map(|p| {
                if p.contains('.') {
                    format!("`{}`", p)
                } else {
                    p.clone()
                }
            })
            .collect();
        write!(f, "{}", rendered.join("."))
    }
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Literal {
    /// JSON rendition used when the value is sent to a provider.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::String(s) => serde_json::Value::String(s.clone()),
            Literal::Integer(n) => serde_json::Value::from(*n),
            Literal::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Literal::Bool(b) => serde_json::Value::Bool(*b),
            Literal::Null => serde_json::Value::Null,
        }
    }

    /// The raw text of the value, as sent in URLs.
    pub fn raw(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Integer(n) => n.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Bool(b) => b.to_string(),
            Literal::Null => "null".to_string(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            other => write!(f, "{}", other.raw()),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Like => "like",
            CompareOp::NotLike => "not like",
        };
        write!(f, "{}", s)
    }
}

/// A column reference, optionally qualified by a table alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub qualifier: Option<String>,
    pub name: String,
}

/// Scalar and boolean expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    Literal(Literal),
    Comparison {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef {
            qualifier: None,
            name: name.into(),
        })
    }

    pub fn literal(value: Literal) -> Self {
        Expr::Literal(value)
    }

    pub fn compare(left: Expr, op: CompareOp, right: Expr) -> Self {
        Expr::Comparison {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Names of every column referenced, in order of appearance.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_columns(&mut names);
        names
    }

    fn collect_columns(&self, names: &mut Vec<String>) {
        match self {
            Expr::Column(c) => names.push(c.name.clone()),
            Expr::Literal(_) => {}
            Expr::Comparison { left, right, .. } => {
                left.collect_columns(names);
                right.collect_columns(names);
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_columns(names);
                r.collect_columns(names);
            }
            Expr::Not(e) => e.collect_columns(names),
            Expr::IsNull { expr, .. } => expr.collect_columns(names),
            Expr::Function { args, .. } => args.iter().for_each(|a| a.collect_columns(names)),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => match &c.qualifier {
                Some(q) => write!(f, "{}.{}", q, c.name),
                None => write!(f, "{}", c.name),
            },
            Expr::Literal(l) => write!(f, "{}", l),
            Expr::Comparison { left, op, right } => write!(f, "{} {} {}", left, op, right),
            Expr::And(l, r) => write!(f, "{} and {}", l, r),
            Expr::Or(l, r) => write!(f, "({} or {})", l, r),
            Expr::Not(e) => write!(f, "not {}", e),
            Expr::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{} is not null", expr)
                } else {
                    write!(f, "{} is null", expr)
                }
            }
            Expr::Function { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", name, args.join(", "))
            }
        }
    }
}

/// An item in a SELECT list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Star,
    Expr { expr: Expr, alias: Option<String> },
}

/// Join flavours; all of them are rejected at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

/// A FROM clause source.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    Table {
        name: TableName,
        alias: Option<String>,
    },
    Join {
        left: Box<TableRef>,
        right: Box<TableRef>,
        kind: JoinKind,
        on: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub directives: CommentDirectives,
    pub items: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub directives: CommentDirectives,
    pub table: TableName,
    pub columns: Vec<String>,
    /// One entry per row of values, from `SELECT ...` or `VALUES (...)`.
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub directives: CommentDirectives,
    pub table: TableName,
    pub where_clause: Option<Expr>,
}

/// An `@name = value` argument to EXEC.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecVar {
    pub name: String,
    pub value: Expr,
}

/// The `@@json = '...'` request payload of EXEC.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecPayload {
    pub format: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exec {
    pub directives: CommentDirectives,
    pub method: TableName,
    pub vars: Vec<ExecVar>,
    pub payload: Option<ExecPayload>,
}

/// Filter trailing a SHOW statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ShowFilter {
    Like(String),
    Where(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Show {
    pub directives: CommentDirectives,
    /// Upper-cased kind: SERVICES, RESOURCES, METHODS, PROVIDERS, AUTH, INSERT, ...
    pub kind: String,
    pub extended: bool,
    pub target: Option<TableName>,
    /// Column list of `SHOW INSERT INTO t (cols)`.
    pub columns: Vec<String>,
    pub filter: Option<ShowFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Describe {
    pub extended: bool,
    pub full: bool,
    pub table: TableName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Auth {
    pub provider: String,
    pub auth_type: Option<String>,
    pub key_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthRevoke {
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Use {
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sleep {
    pub duration: Expr,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Delete(Delete),
    Exec(Exec),
    Show(Show),
    Describe(Describe),
    Auth(Auth),
    AuthRevoke(AuthRevoke),
    Use(Use),
    Sleep(Sleep),
    /// Recognised SQL that the engine does not execute, by leading keyword.
    Unsupported(String),
}

impl Statement {
    /// Short upper-case name of the statement kind.
    pub fn kind(&self) -> &str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Insert(_) => "INSERT",
            Statement::Delete(_) => "DELETE",
            Statement::Exec(_) => "EXEC",
            Statement::Show(_) => "SHOW",
            Statement::Describe(_) => "DESCRIBE",
            Statement::Auth(_) => "AUTH",
            Statement::AuthRevoke(_) => "AUTH REVOKE",
            Statement::Use(_) => "USE",
            Statement::Sleep(_) => "SLEEP",
            Statement::Unsupported(kind) => kind,
        }
    }

    /// Comment directives attached to the statement, if it can carry any.
    pub fn directives(&self) -> Option<&CommentDirectives> {
        match self {
            Statement::Select(s) => Some(&s.directives),
            Statement::Insert(s) => Some(&s.directives),
            Statement::Delete(s) => Some(&s.directives),
            Statement::Exec(s) => Some(&s.directives),
            Statement::Show(s) => Some(&s.directives),
            _ => None,
        }
    }

    /// Provider names explicitly referenced by the statement.
    pub fn provider_strings(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut push = |s: &str| {
            if !s.is_empty() && !out.iter().any(|p: &String| p == s) {
                out.push(s.to_string());
            }
        };
        match self {
            Statement::Select(s) => {
                if let Some(from) = &s.from {
                    for name in from.table_names() {
                        if name.parts.len() >= 3 {
                            push(name.qualifier_second());
                        }
                    }
                }
            }
            Statement::Insert(s) if s.table.parts.len() >= 3 => push(s.table.qualifier_second()),
            Statement::Delete(s) if s.table.parts.len() >= 3 => push(s.table.qualifier_second()),
            Statement::Exec(s) if s.method.parts.len() >= 4 => push(s.method.qualifier_third()),
            Statement::Describe(s) if s.table.parts.len() >= 3 => {
                push(s.table.qualifier_second())
            }
            Statement::Auth(a) => push(&a.provider),
            Statement::AuthRevoke(a) => push(&a.provider),
            Statement::Use(u) => push(&u.provider),
            _ => {}
        }
        out
    }
}

impl TableRef {
    /// Every table named in this source, left to right.
    pub fn table_names(&self) -> Vec<&TableName> {
        match self {
            TableRef::Table { name, .. } => vec![name],
            TableRef::Join { left, right, .. } => {
                let mut names = left.table_names();
                names.extend(right.table_names());
                names
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_qualifiers() {
        let t = TableName::new(["google", "compute", "instances", "insert"]);
        assert_eq!(t.name(), "insert");
        assert_eq!(t.qualifier(), "instances");
        assert_eq!(t.qualifier_second(), "compute");
        assert_eq!(t.qualifier_third(), "google");

        let short = TableName::new(["compute", "networks"]);
        assert_eq!(short.qualifier_second(), "");
    }

    #[test]
    fn test_directives_case_insensitive() {
        let mut d = CommentDirectives::new();
        d.insert("await");
        assert!(d.is_set(directives::AWAIT));
        assert!(!d.is_set(directives::NOSTATUS));
    }

    #[test]
    fn test_provider_strings() {
        let stmt = Statement::Exec(Exec {
            directives: CommentDirectives::new(),
            method: TableName::new(["google", "compute", "networks", "insert"]),
            vars: vec![],
            payload: None,
        });
        assert_eq!(stmt.provider_strings(), vec!["google".to_string()]);
    }
}
