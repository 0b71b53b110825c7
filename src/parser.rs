//! SQL dialect parser using nom.
//!
//! Parses cloudql statements into the [`ast`](crate::ast) tree.
//!
//! # Syntax Overview
//!
//! ```text
//! SELECT name, zone FROM google.compute.instances WHERE project = 'p' AND zone = 'z';
//! INSERT /*+ AWAIT */ INTO compute.networks (project, data__name) SELECT 'p', 'vpc';
//! EXEC /*+ AWAIT */ compute.networks.insert @project = 'p' @@json = '{"name": "vpc"}';
//! SHOW EXTENDED RESOURCES IN google.compute LIKE 'inst%';
//! ```
//!
//! Comments are removed before parsing; `/*+ ... */` comments contribute
//! [`CommentDirectives`] to the statement they appear in.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{map, not, opt, recognize, rest, value, verify},
    error::{Error as NomError, ErrorKind},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
};

use crate::ast::*;
use crate::error::{CloudqlError, CloudqlResult};

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "LIKE", "IS", "NULL", "TRUE", "FALSE",
    "ORDER", "BY", "LIMIT", "JOIN", "INNER", "LEFT", "RIGHT", "CROSS", "ON", "AS", "INTO",
    "VALUES", "ASC", "DESC", "GROUP", "HAVING", "UNION", "IN",
];

const UNSUPPORTED_LEADERS: &[&str] = &[
    "BEGIN", "COMMIT", "ROLLBACK", "CREATE", "DROP", "ALTER", "UPDATE", "EXPLAIN", "SET",
    "TRUNCATE", "RENAME", "GRANT", "REPLACE",
];

/// Parse a single statement. A trailing `;` is allowed.
pub fn parse(input: &str) -> CloudqlResult<Statement> {
    let (text, directives) = strip_comments(input)?;
    let text = text.trim();
    let text = text.strip_suffix(';').unwrap_or(text).trim_end();
    if text.is_empty() {
        return Err(CloudqlError::parse(0, "empty statement"));
    }

    match terminated(parse_statement, multispace0)(text) {
        Ok(("", mut stmt)) => {
            attach_directives(&mut stmt, directives);
            Ok(stmt)
        }
        Ok((remaining, _)) => Err(CloudqlError::parse(
            text.len() - remaining.len(),
            format!("Unexpected trailing content: '{}'", remaining),
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(CloudqlError::parse(
            text.len() - e.input.len(),
            format!("Parse failed near '{}'", preview(e.input)),
        )),
        Err(nom::Err::Incomplete(_)) => {
            Err(CloudqlError::parse(text.len(), "Parse failed: incomplete input"))
        }
    }
}

/// Parse every `;`-separated statement in the input.
pub fn parse_statements(input: &str) -> CloudqlResult<Vec<Statement>> {
    split_statements(input)
        .iter()
        .map(|s| parse(s))
        .collect()
}

/// Split on `;` outside of quotes and comments, dropping empty pieces.
pub fn split_statements(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        current.push(c);
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '-' if chars.peek() == Some(&'-') => {
                    for n in chars.by_ref() {
                        current.push(n);
                        if n == '\n' {
                            break;
                        }
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    let mut prev = '\0';
                    for n in chars.by_ref() {
                        current.push(n);
                        if prev == '*' && n == '/' {
                            break;
                        }
                        prev = n;
                    }
                }
                ';' => {
                    current.pop();
                    if !is_blank(&current) {
                        out.push(current.trim().to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
        }
    }
    if !is_blank(&current) {
        out.push(current.trim().to_string());
    }
    out
}

fn is_blank(piece: &str) -> bool {
    match strip_comments(piece) {
        Ok((text, _)) => text.trim().is_empty(),
        Err(_) => piece.trim().is_empty(),
    }
}

/// Remove comments, collecting directives from `/*+ ... */` blocks.
pub fn strip_comments(input: &str) -> CloudqlResult<(String, CommentDirectives)> {
    let mut out = String::with_capacity(input.len());
    let mut directives = CommentDirectives::new();
    let mut quote: Option<char> = None;
    let mut i = 0;
    let bytes = input.as_bytes();

    while i < input.len() {
        let c = input[i..].chars().next().unwrap_or('\0');
        let width = c.len_utf8();
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += width;
            continue;
        }
        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
                i += width;
            }
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = input[i..].find('\n').map(|n| i + n).unwrap_or(input.len());
                out.push(' ');
                i = end;
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                let body_start = i + 2;
                let Some(len) = input[body_start..].find("*/") else {
                    return Err(CloudqlError::parse(i, "Unterminated comment"));
                };
                let body = &input[body_start..body_start + len];
                if let Some(flags) = body.strip_prefix('+') {
                    flags
                        .split(|ch: char| ch.is_whitespace() || ch == ',')
                        .filter(|f| !f.is_empty())
                        .for_each(|f| directives.insert(f));
                }
                out.push(' ');
                i = body_start + len + 2;
            }
            _ => {
                out.push(c);
                i += width;
            }
        }
    }
    Ok((out, directives))
}

fn attach_directives(stmt: &mut Statement, directives: CommentDirectives) {
    match stmt {
        Statement::Select(s) => s.directives = directives,
        Statement::Insert(s) => s.directives = directives,
        Statement::Delete(s) => s.directives = directives,
        Statement::Exec(s) => s.directives = directives,
        Statement::Show(s) => s.directives = directives,
        _ => {}
    }
}

fn preview(input: &str) -> String {
    input.chars().take(24).collect()
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

fn parse_statement(input: &str) -> IResult<&str, Statement> {
    alt((
        parse_select_statement,
        map(parse_insert, Statement::Insert),
        map(parse_delete, Statement::Delete),
        map(parse_exec, Statement::Exec),
        map(parse_show, Statement::Show),
        map(parse_describe, Statement::Describe),
        parse_auth,
        map(parse_use, Statement::Use),
        map(parse_sleep, Statement::Sleep),
        parse_unsupported,
    ))(input)
}

/// SELECT, turning set operations and aggregation tails into `Unsupported`.
fn parse_select_statement(input: &str) -> IResult<&str, Statement> {
    let (input, select) = parse_select(input)?;
    if let Ok((_, kw)) = alt((keyword("UNION"), keyword("GROUP"), keyword("HAVING")))(input) {
        let kind = match kw.to_ascii_uppercase().as_str() {
            "UNION" => "UNION".to_string(),
            other => format!("SELECT with {}", other),
        };
        let (input, _) = rest(input)?;
        return Ok((input, Statement::Unsupported(kind)));
    }
    Ok((input, Statement::Select(select)))
}

fn parse_select(input: &str) -> IResult<&str, Select> {
    let (input, _) = keyword("SELECT")(input)?;
    let (input, items) = separated_list1(comma, parse_select_item)(input)?;
    let (input, from) = opt(preceded(keyword("FROM"), parse_table_ref))(input)?;
    let (input, where_clause) = opt(preceded(keyword("WHERE"), parse_expr))(input)?;
    let (input, order_by) = opt(preceded(
        pair(keyword("ORDER"), keyword("BY")),
        separated_list1(comma, parse_order_by),
    ))(input)?;
    let (input, limit) = opt(preceded(keyword("LIMIT"), preceded(multispace0, digit1)))(input)?;

    Ok((
        input,
        Select {
            directives: CommentDirectives::new(),
            items,
            from,
            where_clause,
            order_by: order_by.unwrap_or_default(),
            limit: limit.and_then(|n| n.parse().ok()),
        },
    ))
}

fn parse_select_item(input: &str) -> IResult<&str, SelectItem> {
    alt((
        value(SelectItem::Star, preceded(multispace0, char('*'))),
        map(pair(parse_expr, opt(parse_alias)), |(expr, alias)| {
            SelectItem::Expr { expr, alias }
        }),
    ))(input)
}

fn parse_order_by(input: &str) -> IResult<&str, OrderBy> {
    let (input, column) = column_identifier(input)?;
    let (input, direction) = opt(alt((keyword("ASC"), keyword("DESC"))))(input)?;
    Ok((
        input,
        OrderBy {
            column,
            descending: direction.is_some_and(|d| d.eq_ignore_ascii_case("DESC")),
        },
    ))
}

fn parse_table_ref(input: &str) -> IResult<&str, TableRef> {
    let (input, first) = parse_base_table(input)?;
    let (input, joins) = many0(alt((parse_join_clause, parse_comma_join)))(input)?;
    let table = joins
        .into_iter()
        .fold(first, |left, (kind, right, on)| TableRef::Join {
            left: Box::new(left),
            right: Box::new(right),
            kind,
            on,
        });
    Ok((input, table))
}

fn parse_base_table(input: &str) -> IResult<&str, TableRef> {
    map(pair(parse_table_name, opt(parse_alias)), |(name, alias)| {
        TableRef::Table { name, alias }
    })(input)
}

fn parse_join_clause(input: &str) -> IResult<&str, (JoinKind, TableRef, Option<Expr>)> {
    let (input, kind) = opt(alt((
        value(JoinKind::Inner, keyword("INNER")),
        value(JoinKind::Left, keyword("LEFT")),
        value(JoinKind::Right, keyword("RIGHT")),
        value(JoinKind::Cross, keyword("CROSS")),
    )))(input)?;
    let (input, _) = keyword("JOIN")(input)?;
    let (input, table) = parse_base_table(input)?;
    let (input, on) = opt(preceded(keyword("ON"), parse_expr))(input)?;
    Ok((input, (kind.unwrap_or(JoinKind::Inner), table, on)))
}

fn parse_comma_join(input: &str) -> IResult<&str, (JoinKind, TableRef, Option<Expr>)> {
    map(preceded(comma, parse_base_table), |t| (JoinKind::Cross, t, None))(input)
}

fn parse_insert(input: &str) -> IResult<&str, Insert> {
    let (input, _) = keyword("INSERT")(input)?;
    let (input, _) = keyword("INTO")(input)?;
    let (input, table) = parse_table_name(input)?;
    let (input, columns) = opt(parse_column_list)(input)?;
    let (input, rows) = alt((
        preceded(
            keyword("VALUES"),
            separated_list1(
                comma,
                delimited(
                    preceded(multispace0, char('(')),
                    separated_list1(comma, parse_expr),
                    preceded(multispace0, char(')')),
                ),
            ),
        ),
        map(
            preceded(keyword("SELECT"), separated_list1(comma, parse_expr)),
            |row| vec![row],
        ),
    ))(input)?;

    Ok((
        input,
        Insert {
            directives: CommentDirectives::new(),
            table,
            columns: columns.unwrap_or_default(),
            rows,
        },
    ))
}

fn parse_delete(input: &str) -> IResult<&str, Delete> {
    let (input, _) = keyword("DELETE")(input)?;
    let (input, _) = keyword("FROM")(input)?;
    let (input, table) = parse_table_name(input)?;
    let (input, where_clause) = opt(preceded(keyword("WHERE"), parse_expr))(input)?;
    Ok((
        input,
        Delete {
            directives: CommentDirectives::new(),
            table,
            where_clause,
        },
    ))
}

enum ExecArg {
    Var(ExecVar),
    Payload(ExecPayload),
}

fn parse_exec(input: &str) -> IResult<&str, Exec> {
    let (input, _) = keyword("EXEC")(input)?;
    let (input, method) = parse_table_name(input)?;
    let (input, args) = many0(preceded(opt(comma), parse_exec_arg))(input)?;

    let mut vars = Vec::new();
    let mut payload = None;
    for arg in args {
        match arg {
            ExecArg::Var(v) => vars.push(v),
            ExecArg::Payload(p) => payload = Some(p),
        }
    }
    Ok((
        input,
        Exec {
            directives: CommentDirectives::new(),
            method,
            vars,
            payload,
        },
    ))
}

fn parse_exec_arg(input: &str) -> IResult<&str, ExecArg> {
    let (input, _) = multispace0(input)?;
    alt((
        map(
            tuple((
                tag("@@"),
                bare_identifier,
                preceded(multispace0, char('=')),
                preceded(multispace0, string_literal),
            )),
            |(_, format, _, content)| ExecArg::Payload(ExecPayload { format, content }),
        ),
        map(
            tuple((
                char('@'),
                bare_identifier,
                preceded(multispace0, char('=')),
                parse_operand,
            )),
            |(_, name, _, value)| ExecArg::Var(ExecVar { name, value }),
        ),
    ))(input)
}

fn parse_show(input: &str) -> IResult<&str, Show> {
    let (input, _) = keyword("SHOW")(input)?;
    let (input, extended) = opt(keyword("EXTENDED"))(input)?;
    let (input, kind) = preceded(multispace0, bare_identifier)(input)?;
    let kind = kind.to_ascii_uppercase();

    let (input, target, columns) = if kind == "INSERT" {
        let (input, _) = keyword("INTO")(input)?;
        let (input, table) = parse_table_name(input)?;
        let (input, columns) = opt(parse_column_list)(input)?;
        (input, Some(table), columns.unwrap_or_default())
    } else {
        let (input, target) = opt(preceded(
            alt((keyword("IN"), keyword("FROM"))),
            parse_table_name,
        ))(input)?;
        (input, target, Vec::new())
    };

    let (input, filter) = opt(alt((
        map(
            preceded(keyword("LIKE"), preceded(multispace0, string_literal)),
            ShowFilter::Like,
        ),
        map(preceded(keyword("WHERE"), parse_expr), ShowFilter::Where),
    )))(input)?;

    Ok((
        input,
        Show {
            directives: CommentDirectives::new(),
            kind,
            extended: extended.is_some(),
            target,
            columns,
            filter,
        },
    ))
}

fn parse_describe(input: &str) -> IResult<&str, Describe> {
    let (input, _) = alt((keyword("DESCRIBE"), keyword("DESC")))(input)?;
    let (input, extended) = opt(keyword("EXTENDED"))(input)?;
    let (input, full) = opt(keyword("FULL"))(input)?;
    let (input, table) = parse_table_name(input)?;
    Ok((
        input,
        Describe {
            extended: extended.is_some(),
            full: full.is_some(),
            table,
        },
    ))
}

fn parse_auth(input: &str) -> IResult<&str, Statement> {
    let (input, _) = keyword("AUTH")(input)?;
    if let Ok((input, _)) = keyword("REVOKE")(input) {
        let (input, provider) = identifier(input)?;
        return Ok((input, Statement::AuthRevoke(AuthRevoke { provider })));
    }
    let (input, provider) = identifier(input)?;
    let (input, auth_type) = opt(alt((
        keyword("INTERACTIVE"),
        keyword("SERVICEACCOUNT"),
        keyword("SA"),
    )))(input)?;
    let (input, key_file) = opt(preceded(
        keyword("KEYFILE"),
        preceded(multispace0, string_literal),
    ))(input)?;
    let auth_type = auth_type.map(|t| match t.to_ascii_lowercase().as_str() {
        "sa" => "serviceaccount".to_string(),
        other => other.to_string(),
    });
    Ok((
        input,
        Statement::Auth(Auth {
            provider,
            auth_type,
            key_file,
        }),
    ))
}

fn parse_use(input: &str) -> IResult<&str, Use> {
    map(preceded(keyword("USE"), identifier), |provider| Use { provider })(input)
}

fn parse_sleep(input: &str) -> IResult<&str, Sleep> {
    map(preceded(keyword("SLEEP"), parse_operand), |duration| Sleep {
        duration,
    })(input)
}

fn parse_unsupported(input: &str) -> IResult<&str, Statement> {
    let (after, word) = preceded(multispace0, bare_identifier)(input)?;
    let upper = word.to_ascii_uppercase();
    if !UNSUPPORTED_LEADERS.contains(&upper.as_str()) {
        return Err(nom::Err::Error(NomError::new(input, ErrorKind::Alt)));
    }
    let (after, _) = rest(after)?;
    Ok((after, Statement::Unsupported(upper)))
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Parse a boolean or scalar expression.
pub fn parse_expr(input: &str) -> IResult<&str, Expr> {
    parse_or(input)
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_and(input)?;
    let (input, rest) = many0(preceded(keyword("OR"), parse_and))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, e| Expr::Or(Box::new(acc), Box::new(e))),
    ))
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = parse_not(input)?;
    let (input, rest) = many0(preceded(keyword("AND"), parse_not))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, e| Expr::And(Box::new(acc), Box::new(e))),
    ))
}

fn parse_not(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(keyword("NOT"), parse_not), |e| Expr::Not(Box::new(e))),
        parse_predicate,
    ))(input)
}

fn parse_predicate(input: &str) -> IResult<&str, Expr> {
    let (input, left) = parse_operand(input)?;

    if let Ok((input, (_, not_kw, _))) =
        tuple((keyword("IS"), opt(keyword("NOT")), keyword("NULL")))(input)
    {
        return Ok((
            input,
            Expr::IsNull {
                expr: Box::new(left),
                negated: not_kw.is_some(),
            },
        ));
    }

    if let Ok((input, (not_kw, _, right))) =
        tuple((opt(keyword("NOT")), keyword("LIKE"), parse_operand))(input)
    {
        let op = if not_kw.is_some() {
            CompareOp::NotLike
        } else {
            CompareOp::Like
        };
        return Ok((input, Expr::compare(left, op, right)));
    }

    if let Ok((input, (op, right))) = pair(parse_compare_op, parse_operand)(input) {
        return Ok((input, Expr::compare(left, op, right)));
    }

    Ok((input, left))
}

fn parse_compare_op(input: &str) -> IResult<&str, CompareOp> {
    preceded(
        multispace0,
        alt((
            value(CompareOp::NotEq, tag("!=")),
            value(CompareOp::NotEq, tag("<>")),
            value(CompareOp::LtEq, tag("<=")),
            value(CompareOp::GtEq, tag(">=")),
            value(CompareOp::Lt, tag("<")),
            value(CompareOp::Gt, tag(">")),
            value(CompareOp::Eq, tag("=")),
        )),
    )(input)
}

fn parse_operand(input: &str) -> IResult<&str, Expr> {
    preceded(
        multispace0,
        alt((
            delimited(
                char('('),
                parse_expr,
                preceded(multispace0, char(')')),
            ),
            map(parse_literal, Expr::Literal),
            parse_function,
            parse_column_ref,
        )),
    )(input)
}

fn parse_function(input: &str) -> IResult<&str, Expr> {
    let (input, name) = bare_identifier(input)?;
    let (input, _) = preceded(multispace0, char('('))(input)?;
    let (input, args) = alt((
        map(preceded(multispace0, char('*')), |_| vec![Expr::column("*")]),
        map(opt(separated_list1(comma, parse_expr)), Option::unwrap_or_default),
    ))(input)?;
    let (input, _) = preceded(multispace0, char(')'))(input)?;
    Ok((input, Expr::Function { name, args }))
}

fn parse_column_ref(input: &str) -> IResult<&str, Expr> {
    let (input, first) = column_identifier(input)?;
    let (input, second) = opt(preceded(char('.'), alt((quoted_identifier, bare_identifier))))(input)?;
    let col = match second {
        Some(name) => ColumnRef {
            qualifier: Some(first),
            name,
        },
        None => ColumnRef {
            qualifier: None,
            name: first,
        },
    };
    Ok((input, Expr::Column(col)))
}

fn parse_literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(string_literal, Literal::String),
        parse_number,
        value(Literal::Bool(true), keyword("TRUE")),
        value(Literal::Bool(false), keyword("FALSE")),
        value(Literal::Null, keyword("NULL")),
    ))(input)
}

fn parse_number(input: &str) -> IResult<&str, Literal> {
    let (remaining, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    let (remaining, _) = not(satisfy(is_ident_char))(remaining)?;
    let literal = if text.contains('.') {
        text.parse().ok().map(Literal::Float)
    } else {
        text.parse().ok().map(Literal::Integer)
    };
    match literal {
        Some(l) => Ok((remaining, l)),
        None => Err(nom::Err::Error(NomError::new(input, ErrorKind::Digit))),
    }
}

/// Single or double quoted string; a doubled quote escapes itself.
fn string_literal(input: &str) -> IResult<&str, String> {
    let (mut rest, quote) = alt((char('\''), char('"')))(input)?;
    let mut out = String::new();
    loop {
        match rest.find(quote) {
            None => return Err(nom::Err::Error(NomError::new(rest, ErrorKind::Char))),
            Some(i) => {
                out.push_str(&rest[..i]);
                rest = &rest[i + quote.len_utf8()..];
                if rest.starts_with(quote) {
                    out.push(quote);
                    rest = &rest[quote.len_utf8()..];
                } else {
                    return Ok((rest, out));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// Case-insensitive keyword not followed by an identifier character.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        preceded(
            multispace0,
            terminated(tag_no_case(kw), not(satisfy(is_ident_char))),
        )(input)
    }
}

fn comma(input: &str) -> IResult<&str, char> {
    preceded(multispace0, char(','))(input)
}

fn bare_identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            satisfy(|c: char| c.is_alphabetic() || c == '_'),
            take_while(is_ident_char),
        )),
        String::from,
    )(input)
}

fn quoted_identifier(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('`'), take_while1(|c: char| c != '`'), char('`')),
        String::from,
    )(input)
}

/// Any identifier, quoted or bare.
fn identifier(input: &str) -> IResult<&str, String> {
    preceded(multispace0, alt((quoted_identifier, bare_identifier)))(input)
}

/// An identifier usable as a column: quoted, or bare and not reserved.
fn column_identifier(input: &str) -> IResult<&str, String> {
    preceded(
        multispace0,
        alt((
            quoted_identifier,
            verify(bare_identifier, |s: &String| !is_reserved(s)),
        )),
    )(input)
}

fn parse_alias(input: &str) -> IResult<&str, String> {
    preceded(opt(keyword("AS")), column_identifier)(input)
}

fn parse_column_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        preceded(multispace0, char('(')),
        separated_list1(comma, identifier),
        preceded(multispace0, char(')')),
    )(input)
}

fn parse_table_name(input: &str) -> IResult<&str, TableName> {
    map(
        verify(
            separated_list1(preceded(multispace0, char('.')), identifier),
            |parts: &Vec<String>| parts.len() <= 4,
        ),
        TableName::new,
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn select(sql: &str) -> Select {
        match parse(sql).unwrap() {
            Statement::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_select() {
        let s = select(
            "select name, zone from google.compute.instances where zone = 'australia-southeast1-b' AND /* */ project = 'testing-project';",
        );
        assert_eq!(s.items.len(), 2);
        let Some(TableRef::Table { name, .. }) = &s.from else {
            panic!("expected table");
        };
        assert_eq!(name.parts, vec!["google", "compute", "instances"]);
        assert_eq!(
            s.where_clause.unwrap().column_names(),
            vec!["zone".to_string(), "project".to_string()]
        );
    }

    #[test]
    fn test_backticked_resource() {
        let s = select(
            "select subnetwork, ipCidrRange from  google.container.`projects.aggregated.usableSubnetworks` where parent = 'projects/testing-project' ;",
        );
        let Some(TableRef::Table { name, .. }) = &s.from else {
            panic!("expected table");
        };
        assert_eq!(name.name(), "projects.aggregated.usableSubnetworks");
        assert_eq!(name.qualifier(), "container");
    }

    #[test]
    fn test_select_values_only() {
        let s = select("SELECT 1 AS one, 'x'");
        assert!(s.from.is_none());
        assert_eq!(
            s.items[0],
            SelectItem::Expr {
                expr: Expr::Literal(Literal::Integer(1)),
                alias: Some("one".to_string()),
            }
        );
    }

    #[test]
    fn test_select_order_limit() {
        let s = select("SELECT name FROM compute.disks WHERE project = 'p' ORDER BY name DESC LIMIT 5");
        assert_eq!(s.order_by, vec![OrderBy { column: "name".into(), descending: true }]);
        assert_eq!(s.limit, Some(5));
    }

    #[test]
    fn test_insert_with_await() {
        let sql = r#"
            --
            -- create VPC
            --
            INSERT /*+ AWAIT  */ INTO compute.networks
            (
              project,
              data__name,
              data__autoCreateSubnetworks,
              data__routingConfig
            )
            SELECT
              'infraql-demo',
              'kubernetes-the-hard-way-vpc',
              false,
              '{"routingMode":"REGIONAL"}';
        "#;
        let Statement::Insert(ins) = parse(sql).unwrap() else {
            panic!("expected insert");
        };
        assert!(ins.directives.is_set(directives::AWAIT));
        assert_eq!(ins.columns.len(), 4);
        assert_eq!(ins.rows.len(), 1);
        assert_eq!(ins.rows[0][2], Expr::Literal(Literal::Bool(false)));
    }

    #[test]
    fn test_insert_values() {
        let Statement::Insert(ins) =
            parse("INSERT INTO compute.networks (project) VALUES ('a'), ('b')").unwrap()
        else {
            panic!("expected insert");
        };
        assert_eq!(ins.rows.len(), 2);
    }

    #[test]
    fn test_exec_with_payload() {
        let sql = r#"EXEC /*+ AWAIT */ compute.networks.insert @project='infraql-demo' @@json='{
            "name": "kubernetes-the-hard-way-vpc",
            "autoCreateSubnetworks": false
        }';"#;
        let Statement::Exec(exec) = parse(sql).unwrap() else {
            panic!("expected exec");
        };
        assert_eq!(exec.method.name(), "insert");
        assert_eq!(exec.vars.len(), 1);
        assert_eq!(exec.vars[0].name, "project");
        let payload = exec.payload.unwrap();
        assert_eq!(payload.format, "json");
        assert!(payload.content.contains("autoCreateSubnetworks"));
    }

    #[test]
    fn test_exec_comma_separated_vars() {
        let Statement::Exec(exec) = parse(
            "EXEC compute.networks.delete @project = 'infraql-demo', @network = 'vpc'",
        )
        .unwrap() else {
            panic!("expected exec");
        };
        assert_eq!(exec.vars.len(), 2);
    }

    #[test]
    fn test_delete() {
        let Statement::Delete(del) = parse(
            "delete /*+ AWAIT  */ from compute.networks WHERE project = 'infraql-demo' and network = 'vpc';",
        )
        .unwrap() else {
            panic!("expected delete");
        };
        assert!(del.directives.is_set("await"));
        assert_eq!(del.table.name(), "networks");
    }

    #[test]
    fn test_show_variants() {
        let Statement::Show(show) = parse("SHOW EXTENDED SERVICES IN google LIKE 'comp%'").unwrap()
        else {
            panic!("expected show");
        };
        assert_eq!(show.kind, "SERVICES");
        assert!(show.extended);
        assert_eq!(show.filter, Some(ShowFilter::Like("comp%".into())));

        let Statement::Show(show) = parse("SHOW METHODS IN compute.instances WHERE MethodName = 'list'").unwrap()
        else {
            panic!("expected show");
        };
        assert_eq!(show.target.unwrap().parts, vec!["compute", "instances"]);
        assert!(matches!(show.filter, Some(ShowFilter::Where(_))));

        let Statement::Show(show) =
            parse("SHOW /*+ REQUIRED */ INSERT INTO compute.addresses").unwrap()
        else {
            panic!("expected show");
        };
        assert_eq!(show.kind, "INSERT");
        assert!(show.directives.is_set(directives::REQUIRED));
    }

    #[test]
    fn test_misc_statements() {
        assert!(matches!(parse("DESCRIBE EXTENDED compute.instances").unwrap(), Statement::Describe(d) if d.extended));
        assert!(matches!(parse("USE google").unwrap(), Statement::Use(u) if u.provider == "google"));
        assert!(matches!(parse("SLEEP 1000").unwrap(), Statement::Sleep(_)));
        assert!(matches!(parse("AUTH REVOKE google").unwrap(), Statement::AuthRevoke(_)));
        let Statement::Auth(auth) = parse("AUTH google SERVICEACCOUNT KEYFILE '/tmp/key.json'").unwrap() else {
            panic!("expected auth");
        };
        assert_eq!(auth.auth_type.as_deref(), Some("serviceaccount"));
        assert_eq!(auth.key_file.as_deref(), Some("/tmp/key.json"));
    }

    #[test]
    fn test_unsupported_statements() {
        assert_eq!(parse("BEGIN").unwrap(), Statement::Unsupported("BEGIN".into()));
        assert_eq!(
            parse("UPDATE compute.networks SET a = 1").unwrap(),
            Statement::Unsupported("UPDATE".into())
        );
        assert_eq!(
            parse("SELECT 1 UNION SELECT 2").unwrap(),
            Statement::Unsupported("UNION".into())
        );
    }

    #[test]
    fn test_join_parses() {
        let s = select("SELECT a.name FROM compute.instances a JOIN compute.disks b ON a.name = b.name WHERE a.project = 'p'");
        assert!(matches!(s.from, Some(TableRef::Join { .. })));
    }

    #[test]
    fn test_split_statements() {
        let parts = split_statements("SELECT 1; -- comment ; here\nSELECT ';';  ;");
        assert_eq!(parts.len(), 2);
        assert!(parts[1].ends_with("SELECT ';'"));
        assert!(matches!(parse(&parts[1]).unwrap(), Statement::Select(_)));
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse("SELECT name FROM").unwrap_err();
        assert!(matches!(err, CloudqlError::Parse { .. }));
    }

    #[test]
    fn test_escaped_quote() {
        let s = select("SELECT 'it''s'");
        assert_eq!(
            s.items[0],
            SelectItem::Expr {
                expr: Expr::Literal(Literal::String("it's".into())),
                alias: None,
            }
        );
    }
}
