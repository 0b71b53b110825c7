//! Execution results and their plain-text renditions.

use serde_json::{Map, Value};

use crate::config::OutputFormat;
use crate::error::CloudqlError;

/// Columns listed first, in this order, when present.
const LEADING_COLUMNS: [&str; 3] = ["id", "name", "description"];

/// Cell text of a JSON value.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) => "[array]".to_string(),
        Value::Object(_) => "{object}".to_string(),
    }
}

/// Value of a column; dotted names reach into nested objects.
pub fn lookup<'a>(row: &'a Map<String, Value>, column: &str) -> Option<&'a Value> {
    if let Some(v) = row.get(column) {
        return Some(v);
    }
    let mut parts = column.split('.');
    let mut current = row.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// `id`, `name`, `description` first, then every other key in sorted order.
pub fn default_column_order<'a>(keys: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    let mut rest: Vec<String> = keys.into_iter().cloned().collect();
    rest.sort();
    rest.dedup();
    let mut ordered: Vec<String> = LEADING_COLUMNS
        .iter()
        .filter(|c| rest.iter().any(|k| k == *c))
        .map(|c| c.to_string())
        .collect();
    rest.retain(|k| !LEADING_COLUMNS.contains(&k.as_str()));
    ordered.extend(rest);
    ordered
}

/// Ordered rows with their column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Map<String, Value>>) -> Self {
        Self { columns, rows }
    }

    /// Columns taken from the union of the rows' keys, in default order.
    pub fn from_rows(rows: Vec<Map<String, Value>>) -> Self {
        let columns = default_column_order(rows.iter().flat_map(|r| r.keys()));
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: &str) -> String {
        self.rows
            .get(row)
            .and_then(|r| lookup(r, column))
            .map(stringify)
            .unwrap_or_default()
    }

    /// Values of one column, as cell text.
    pub fn column_values(&self, column: &str) -> Vec<String> {
        (0..self.rows.len()).map(|i| self.cell(i, column)).collect()
    }
}

/// What executing a primitive produced.
#[derive(Debug, Default)]
pub struct ExecutorOutput {
    pub result: Option<ResultSet>,
    /// Raw response body of a mutating call.
    pub body: Option<Value>,
    /// Human-readable status lines.
    pub messages: Vec<String>,
    pub error: Option<CloudqlError>,
    /// Transaction id the plan ran under.
    pub txn_id: u64,
}

impl ExecutorOutput {
    pub fn rows(result: ResultSet) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            ..Default::default()
        }
    }

    pub fn error(error: CloudqlError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn row_count(&self) -> usize {
        self.result.as_ref().map_or(0, ResultSet::len)
    }
}

/// Rendering switches.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub format: OutputFormat,
    pub delimiter: char,
    pub hide_headers: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Table,
            delimiter: ',',
            hide_headers: false,
        }
    }
}

/// Table lines: header, separator, then one line per row.
///
/// Without headers only the row lines are returned.
pub fn table_lines(result: &ResultSet, hide_headers: bool) -> Vec<String> {
    let cells: Vec<Vec<String>> = (0..result.len())
        .map(|i| result.columns.iter().map(|c| result.cell(i, c)).collect())
        .collect();
    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain([c.chars().count()])
                .max()
                .unwrap_or(0)
        })
        .collect();
    let pad = |s: &str, w: usize| format!("{}{}", s, " ".repeat(w.saturating_sub(s.chars().count())));

    let mut lines = Vec::with_capacity(cells.len() + 2);
    if !hide_headers {
        let header: Vec<String> = result
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| pad(c, *w))
            .collect();
        lines.push(header.join(" │ "));
        let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
        lines.push(sep.join("─┼─"));
    }
    for row in &cells {
        let padded: Vec<String> = row.iter().zip(&widths).map(|(c, w)| pad(c, *w)).collect();
        lines.push(padded.join(" │ "));
    }
    lines
}

fn csv_field(value: &str, delimiter: char) -> String {
    if value.contains(delimiter) || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render a result set in a non-table format.
pub fn render(result: &ResultSet, options: &RenderOptions) -> String {
    match options.format {
        OutputFormat::Table => table_lines(result, options.hide_headers).join("\n"),
        OutputFormat::Json => {
            let rows: Vec<Value> = result
                .rows
                .iter()
                .map(|r| {
                    Value::Object(
                        result
                            .columns
                            .iter()
                            .map(|c| (c.clone(), lookup(r, c).cloned().unwrap_or(Value::Null)))
                            .collect(),
                    )
                })
                .collect();
            serde_json::to_string_pretty(&rows).unwrap_or_default()
        }
        OutputFormat::Csv => {
            let delim = options.delimiter.to_string();
            let mut lines = Vec::with_capacity(result.len() + 1);
            if !options.hide_headers {
                let header: Vec<String> = result
                    .columns
                    .iter()
                    .map(|c| csv_field(c, options.delimiter))
                    .collect();
                lines.push(header.join(&delim));
            }
            for i in 0..result.len() {
                let row: Vec<String> = result
                    .columns
                    .iter()
                    .map(|c| csv_field(&result.cell(i, c), options.delimiter))
                    .collect();
                lines.push(row.join(&delim));
            }
            lines.join("\n")
        }
        OutputFormat::Text => {
            let mut lines = Vec::with_capacity(result.len() + 1);
            if !options.hide_headers {
                lines.push(result.columns.join("\t"));
            }
            for i in 0..result.len() {
                let row: Vec<String> = result.columns.iter().map(|c| result.cell(i, c)).collect();
                lines.push(row.join("\t"));
            }
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn rows() -> Vec<Map<String, Value>> {
        vec![
            json!({"zone": "z1", "name": "a", "id": "1", "disks": [1], "labels": {"k": "v"}}),
            json!({"zone": "z2", "name": "b, c", "id": "2", "status": null}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    #[test]
    fn test_default_column_order() {
        let rs = ResultSet::from_rows(rows());
        assert_eq!(rs.columns, vec!["id", "name", "disks", "labels", "status", "zone"]);
        assert_eq!(rs.cell(0, "disks"), "[array]");
        assert_eq!(rs.cell(0, "labels"), "{object}");
        assert_eq!(rs.cell(1, "status"), "null");
        assert_eq!(rs.cell(1, "disks"), "");
    }

    #[test]
    fn test_lookup_dotted() {
        let row = rows().remove(0);
        assert_eq!(lookup(&row, "labels.k"), Some(&json!("v")));
        assert_eq!(lookup(&row, "labels.x"), None);
    }

    #[test]
    fn test_table_lines() {
        let rs = ResultSet::new(vec!["name".into(), "zone".into()], rows());
        let lines = table_lines(&rs, false);
        assert_eq!(lines[0], "name │ zone");
        assert_eq!(lines[1], "─────┼─────");
        assert_eq!(lines[2], "a    │ z1  ");
        assert_eq!(table_lines(&rs, true).len(), 2);
    }

    #[test]
    fn test_csv_quotes_delimiter() {
        let rs = ResultSet::new(vec!["name".into(), "zone".into()], rows());
        let opts = RenderOptions {
            format: OutputFormat::Csv,
            ..Default::default()
        };
        assert_eq!(render(&rs, &opts), "name,zone\na,z1\n\"b, c\",z2");
    }

    #[test]
    fn test_json_keeps_values() {
        let rs = ResultSet::new(vec!["id".into(), "disks".into()], rows());
        let opts = RenderOptions {
            format: OutputFormat::Json,
            ..Default::default()
        };
        let parsed: Value = serde_json::from_str(&render(&rs, &opts)).unwrap();
        assert_eq!(parsed[0]["disks"], json!([1]));
        assert_eq!(parsed[1]["disks"], Value::Null);
    }
}
