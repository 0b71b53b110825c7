//! Row predicates.
//!
//! WHERE and LIKE clauses are compiled into a [`Predicate`] tree evaluated
//! against JSON rows. Metadata listings (SHOW) accept only comparisons joined
//! by AND/OR; SELECT residual filters also accept NOT and IS NULL.

use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::ast::{CompareOp, Expr};
use crate::error::{CloudqlError, CloudqlResult};
use crate::output::{lookup, stringify};

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches every row.
    Always,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    /// Matches when any of `columns` matches the anchored pattern.
    Like {
        columns: Vec<String>,
        pattern: Regex,
        negated: bool,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

/// Translate a SQL LIKE pattern into an anchored regex.
pub fn like_regex(pattern: &str) -> CloudqlResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 2);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re)
        .map_err(|e| CloudqlError::validation(format!("invalid LIKE pattern '{}': {}", pattern, e)))
}

fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::LtEq => CompareOp::GtEq,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::GtEq => CompareOp::LtEq,
        other => other,
    }
}

fn unsupported(expr: &Expr) -> CloudqlError {
    CloudqlError::validation(format!("unsupported constraint: {}", expr))
}

impl Predicate {
    /// A bare `LIKE 'pattern'` over several columns.
    pub fn like(columns: Vec<String>, pattern: &str) -> CloudqlResult<Self> {
        Ok(Predicate::Like {
            columns,
            pattern: like_regex(pattern)?,
            negated: false,
        })
    }

    /// Compile a SHOW filter.
    pub fn metadata(expr: &Expr) -> CloudqlResult<Self> {
        Self::build(expr, true, &|_| false)
    }

    /// Compile a SELECT filter; columns for which `skip` holds always match.
    pub fn rows(expr: &Expr, skip: &dyn Fn(&str) -> bool) -> CloudqlResult<Self> {
        Self::build(expr, false, skip)
    }

    fn build(expr: &Expr, strict: bool, skip: &dyn Fn(&str) -> bool) -> CloudqlResult<Self> {
        match expr {
            Expr::And(l, r) => Ok(Predicate::And(
                Box::new(Self::build(l, strict, skip)?),
                Box::new(Self::build(r, strict, skip)?),
            )),
            Expr::Or(l, r) => Ok(Predicate::Or(
                Box::new(Self::build(l, strict, skip)?),
                Box::new(Self::build(r, strict, skip)?),
            )),
            Expr::Not(inner) if !strict => {
                Ok(Predicate::Not(Box::new(Self::build(inner, strict, skip)?)))
            }
            Expr::IsNull { expr: inner, negated } if !strict => match inner.as_ref() {
                Expr::Column(c) if skip(&c.name) => Ok(Predicate::Always),
                Expr::Column(c) => Ok(Predicate::IsNull {
                    column: c.name.clone(),
                    negated: *negated,
                }),
                _ => Err(unsupported(expr)),
            },
            Expr::Comparison { left, op, right } => {
                let (column, op, literal) = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), Expr::Literal(l)) => (c, *op, l),
                    (Expr::Literal(l), Expr::Column(c)) => (c, flip(*op), l),
                    _ => return Err(unsupported(expr)),
                };
                if skip(&column.name) {
                    return Ok(Predicate::Always);
                }
                match op {
                    CompareOp::Like | CompareOp::NotLike => Ok(Predicate::Like {
                        columns: vec![column.name.clone()],
                        pattern: like_regex(&literal.raw())?,
                        negated: op == CompareOp::NotLike,
                    }),
                    _ => Ok(Predicate::Compare {
                        column: column.name.clone(),
                        op,
                        value: literal.to_json(),
                    }),
                }
            }
            _ => Err(unsupported(expr)),
        }
    }

    /// Columns the predicate reads.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<String>) {
        match self {
            Predicate::Always => {}
            Predicate::Compare { column, .. } | Predicate::IsNull { column, .. } => {
                out.push(column.clone())
            }
            Predicate::Like { columns, .. } => out.extend(columns.iter().cloned()),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect(out);
                r.collect(out);
            }
            Predicate::Not(p) => p.collect(out),
        }
    }

    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Compare { column, op, value } => match lookup(row, column) {
                None | Some(Value::Null) => false,
                Some(actual) => compare(actual, *op, value),
            },
            Predicate::Like {
                columns,
                pattern,
                negated,
            } => {
                let hit = columns.iter().any(|c| {
                    lookup(row, c).is_some_and(|v| !v.is_null() && pattern.is_match(&stringify(v)))
                });
                hit != *negated
            }
            Predicate::IsNull { column, negated } => {
                let is_null = lookup(row, column).map_or(true, Value::is_null);
                is_null != *negated
            }
            Predicate::And(l, r) => l.matches(row) && r.matches(row),
            Predicate::Or(l, r) => l.matches(row) || r.matches(row),
            Predicate::Not(p) => !p.matches(row),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn ordering(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => as_number(actual)?.partial_cmp(&as_number(expected)?),
    }
}

/// Sort order of two optional cells: missing and null first, then by value.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            ordering(a, b).unwrap_or_else(|| stringify(a).cmp(&stringify(b)))
        }
    }
}

fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    let equal = match ordering(actual, expected) {
        Some(o) => o == Ordering::Equal,
        None => stringify(actual) == stringify(expected),
    };
    match op {
        CompareOp::Eq => equal,
        CompareOp::NotEq => !equal,
        CompareOp::Lt => ordering(actual, expected) == Some(Ordering::Less),
        CompareOp::LtEq => matches!(
            ordering(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => ordering(actual, expected) == Some(Ordering::Greater),
        CompareOp::GtEq => matches!(
            ordering(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Like | CompareOp::NotLike => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expr;
    use serde_json::json;

    fn expr(text: &str) -> Expr {
        parse_expr(text).unwrap().1
    }

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_like_regex_is_anchored_and_escaped() {
        let re = like_regex("compute%").unwrap();
        assert!(re.is_match("compute__v1"));
        assert!(!re.is_match("xcompute"));
        assert!(like_regex("a.c").unwrap().is_match("a.c"));
        assert!(!like_regex("a.c").unwrap().is_match("abc"));
        assert!(like_regex("in_tances").unwrap().is_match("instances"));
    }

    #[test]
    fn test_bare_like_widens_over_columns() {
        let p = Predicate::like(vec!["id".into(), "name".into()], "%compute%").unwrap();
        assert!(p.matches(&row(json!({"id": "x", "name": "compute"}))));
        assert!(p.matches(&row(json!({"id": "compute__v1", "name": "c"}))));
        assert!(!p.matches(&row(json!({"id": "storage", "name": "storage"}))));
    }

    #[test]
    fn test_metadata_filter() {
        let p = Predicate::metadata(&expr("name = 'compute' or id like 'dns%'")).unwrap();
        assert!(p.matches(&row(json!({"id": "compute__v1", "name": "compute"}))));
        assert!(p.matches(&row(json!({"id": "dns__v1", "name": "dns"}))));
        assert!(!p.matches(&row(json!({"id": "bigquery__v2", "name": "bigquery"}))));
        assert_eq!(p.columns(), vec!["name", "id"]);
    }

    #[test]
    fn test_metadata_filter_rejects_other_constraints() {
        let err = Predicate::metadata(&expr("not name = 'x'")).unwrap_err();
        assert!(err.to_string().starts_with("unsupported constraint"));
        assert!(Predicate::metadata(&expr("name = id")).is_err());
    }

    #[test]
    fn test_row_filter_skips_parameters() {
        let p = Predicate::rows(&expr("project = 'p' and status = 'RUNNING'"), &|c| c == "project").unwrap();
        assert!(p.matches(&row(json!({"status": "RUNNING"}))));
        assert!(!p.matches(&row(json!({"status": "TERMINATED"}))));
    }

    #[test]
    fn test_row_filter_comparisons() {
        let r = row(json!({"cpus": 4, "name": "a", "labels": null}));
        assert!(Predicate::rows(&expr("cpus >= 4"), &|_| false).unwrap().matches(&r));
        assert!(Predicate::rows(&expr("2 < cpus"), &|_| false).unwrap().matches(&r));
        assert!(Predicate::rows(&expr("cpus = '4'"), &|_| false).unwrap().matches(&r));
        assert!(Predicate::rows(&expr("labels is null"), &|_| false).unwrap().matches(&r));
        assert!(Predicate::rows(&expr("missing is null"), &|_| false).unwrap().matches(&r));
        assert!(!Predicate::rows(&expr("name is null"), &|_| false).unwrap().matches(&r));
        assert!(Predicate::rows(&expr("name not like 'b%'"), &|_| false).unwrap().matches(&r));
        assert!(!Predicate::rows(&expr("missing = 1"), &|_| false).unwrap().matches(&r));
    }

    #[test]
    fn test_sort_order() {
        assert_eq!(sort_order(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(sort_order(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
        assert_eq!(sort_order(None, Some(&json!("a"))), Ordering::Less);
        assert_eq!(sort_order(Some(&Value::Null), None), Ordering::Equal);
    }
}
