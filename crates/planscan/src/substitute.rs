//! Placeholder substitution.
//!
//! Turns an issued statement (`... where p1_0.name=?`) into a literal one
//! (`... where p1_0.name = 'Kate'`) that can be handed to `EXPLAIN`.
//!
//! Issued statements carry no parameter names, only positional placeholders
//! (`?` or `$n`) next to column references. Each placeholder is resolved by
//! the column it is compared against: the column token is looked up in the
//! parameter map as written, then in camelCase (`person_id` -> `personId`).
//!
//! Six predicate shapes are recognised, one pass each, in this order:
//!
//! | pass | shape                          | rewritten as                     |
//! |------|--------------------------------|----------------------------------|
//! | 1    | `col = ?`, `col = fn(?)`       | `col = lit`, `col = fn(lit)`     |
//! | 2    | `col <op> ?`                   | `col <op> lit`                   |
//! | 3    | `col IN (?, ...)`              | `col IN (lit, lit, ...)`         |
//! | 4    | `col BETWEEN ? AND ?`          | `col BETWEEN lit AND lit`        |
//! | 5    | `col LIKE ?`                   | `col LIKE 'text'`                |
//! | 6    | `fn1(col) = fn2(?)`, `col = ?` | `fn1(col) = fn2(lit)`, `col = lit` |
//!
//! Every pass matches against the unmodified statement. A match overlapping a
//! span claimed by an earlier pass is skipped, and all claimed spans are
//! spliced in one go at the end, so substituted literals are never re-scanned.
//!
//! This is pattern matching, not parsing: it handles the statement shapes
//! query layers emit, not arbitrary hand-written SQL.

use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::{Error, Literal, Parameters, Result, Value};

/// A positional placeholder: JDBC-style `?` or Postgres-style `$n`.
const PH: &str = r"(?:\?|\$\d+)";

/// Optional `alias.` then the column token.
const COLUMN: &str = r"(\w+\.)?(\w+)";

fn pattern(template: &str) -> Regex {
    let src = template.replace("{col}", COLUMN).replace("{ph}", PH);
    Regex::new(&src).expect("valid regex")
}

static EQUAL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"{col}\s*=\s*(?:(\w+)\(\s*{ph}\s*\)|{ph})"));
static COMPARISON: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"{col}\s*(<=|>=|=|<|>)\s*{ph}"));
static IN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"{col}\s+(?i:(not\s+)?in)\s*\(\s*{ph}(?:\s*,\s*{ph})*\s*\)"));
static BETWEEN: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"{col}\s+(?i:(not\s+)?between)\s+{ph}\s+(?i:and)\s+{ph}"));
static LIKE: LazyLock<Regex> = LazyLock::new(|| pattern(r"{col}\s+(?i:(not\s+)?like)\s+{ph}"));
static FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(\w+)\s*\(\s*((?:\w+\.)?(\w+))\s*\)\s*=\s*(\w+)\s*\(\s*{ph}\s*\)")
});
static SIMPLE: LazyLock<Regex> = LazyLock::new(|| pattern(r"{col}\s*=\s*{ph}"));
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| pattern("{ph}"));

/// Predicate shapes with dedicated rewrite rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Equality,
    Comparison,
    In,
    Between,
    Like,
    FunctionEquality,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shape::Equality => "equality",
            Shape::Comparison => "comparison",
            Shape::In => "IN",
            Shape::Between => "BETWEEN",
            Shape::Like => "LIKE",
            Shape::FunctionEquality => "function equality",
        };
        f.write_str(name)
    }
}

/// Replace every recognised placeholder in `issued` with a literal.
///
/// Fails with [`Error::MissingParameter`] when a column has no value under
/// either naming convention, and with [`Error::UnsupportedValueShape`] when
/// an `IN`, `BETWEEN` or `LIKE` predicate gets the wrong kind of value.
/// Placeholders outside the six shapes (`LIMIT ?`, `VALUES (?)`) are left
/// in place.
pub fn substitute(issued: &str, parameters: &Parameters) -> Result<String> {
    let mut rewrite = Rewrite::new(issued);

    rewrite.pass(&EQUAL, |caps| {
        let (alias, column) = column_ref(caps);
        let lit = Literal(resolve(parameters, column)?);
        Ok(match caps.get(3) {
            Some(function) => format!("{alias}{column} = {}({lit})", function.as_str()),
            None => format!("{alias}{column} = {lit}"),
        })
    })?;

    rewrite.pass(&COMPARISON, |caps| {
        let (alias, column) = column_ref(caps);
        let op = &caps[3];
        let lit = Literal(resolve(parameters, column)?);
        Ok(format!("{alias}{column} {op} {lit}"))
    })?;

    rewrite.pass(&IN, |caps| {
        let (alias, column) = column_ref(caps);
        let items = match resolve(parameters, column)?.as_list() {
            Some(items) if !items.is_empty() => items,
            _ => return Err(shape_error(Shape::In, column, "a non-empty list of values")),
        };
        let joined = items
            .iter()
            .map(|item| Literal(item).to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(format!("{alias}{column} {}IN ({joined})", negation(caps)))
    })?;

    rewrite.pass(&BETWEEN, |caps| {
        let (alias, column) = column_ref(caps);
        let [from, to] = resolve(parameters, column)?
            .as_list()
            .and_then(|items| <&[Value; 2]>::try_from(items).ok())
            .ok_or_else(|| shape_error(Shape::Between, column, "a list of exactly two values"))?;
        Ok(format!(
            "{alias}{column} {}BETWEEN {} AND {}",
            negation(caps),
            Literal(from),
            Literal(to)
        ))
    })?;

    rewrite.pass(&LIKE, |caps| {
        let (alias, column) = column_ref(caps);
        let value = resolve(parameters, column)?;
        if value.as_str().is_none() {
            return Err(shape_error(Shape::Like, column, "a text value"));
        }
        Ok(format!(
            "{alias}{column} {}LIKE {}",
            negation(caps),
            Literal(value)
        ))
    })?;

    rewrite.pass(&FUNCTION, |caps| {
        let lit = Literal(resolve(parameters, &caps[3])?);
        Ok(format!("{}({}) = {}({lit})", &caps[1], &caps[2], &caps[4]))
    })?;

    rewrite.pass(&SIMPLE, |caps| {
        let (alias, column) = column_ref(caps);
        let lit = Literal(resolve(parameters, column)?);
        Ok(format!("{alias}{column} = {lit}"))
    })?;

    let leftover = rewrite.unclaimed_placeholders();
    if leftover > 0 {
        tracing::warn!(
            sql = %issued,
            leftover,
            "placeholders outside recognised predicates were left in place"
        );
    }

    let literal = rewrite.finish();
    tracing::debug!(sql = %literal, "substituted placeholders");
    Ok(literal)
}

/// Convert a snake_case identifier to camelCase.
///
/// ```
/// assert_eq!(planscan::to_camel_case("person_id"), "personId");
/// assert_eq!(planscan::to_camel_case("name"), "name");
/// ```
pub fn to_camel_case(input: &str) -> String {
    let mut parts = input.split('_');
    let mut out = parts.next().unwrap_or_default().to_owned();
    for part in parts {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Look a column up as written, then in camelCase.
fn resolve<'p>(parameters: &'p Parameters, column: &str) -> Result<&'p Value> {
    if let Some(value) = parameters.get(column) {
        return Ok(value);
    }
    parameters
        .get(to_camel_case(column).as_str())
        .ok_or_else(|| Error::MissingParameter {
            column: column.to_owned(),
        })
}

fn column_ref<'c>(caps: &'c Captures<'_>) -> (&'c str, &'c str) {
    let alias = caps.get(1).map_or("", |m| m.as_str());
    let column = caps.get(2).map_or("", |m| m.as_str());
    (alias, column)
}

/// `"NOT "` when the keyword group caught a negation.
fn negation(caps: &Captures<'_>) -> &'static str {
    if caps.get(3).is_some() { "NOT " } else { "" }
}

fn shape_error(shape: Shape, column: &str, expected: &'static str) -> Error {
    Error::UnsupportedValueShape {
        shape,
        column: column.to_owned(),
        expected,
    }
}

/// Pending replacements over one statement.
struct Rewrite<'s> {
    sql: &'s str,
    edits: Vec<(Range<usize>, String)>,
}

impl<'s> Rewrite<'s> {
    fn new(sql: &'s str) -> Self {
        Self {
            sql,
            edits: Vec::new(),
        }
    }

    fn claimed(&self, range: &Range<usize>) -> bool {
        self.edits
            .iter()
            .any(|(r, _)| r.start < range.end && range.start < r.end)
    }

    fn pass<F>(&mut self, re: &Regex, mut replace: F) -> Result<()>
    where
        F: FnMut(&Captures<'_>) -> Result<String>,
    {
        let sql = self.sql;
        for caps in re.captures_iter(sql) {
            let Some(whole) = caps.get(0) else { continue };
            let range = whole.range();
            if self.claimed(&range) || inside_string(sql, range.start) {
                continue;
            }
            let text = replace(&caps)?;
            self.edits.push((range, text));
        }
        Ok(())
    }

    fn unclaimed_placeholders(&self) -> usize {
        PLACEHOLDER
            .find_iter(self.sql)
            .filter(|m| !self.claimed(&m.range()))
            .filter(|m| !inside_string(self.sql, m.start()))
            .count()
    }

    fn finish(mut self) -> String {
        self.edits.sort_by_key(|(range, _)| range.start);
        let mut out = String::with_capacity(self.sql.len());
        let mut cursor = 0;
        for (range, text) in &self.edits {
            out.push_str(&self.sql[cursor..range.start]);
            out.push_str(text);
            cursor = range.end;
        }
        out.push_str(&self.sql[cursor..]);
        out
    }
}

/// Whether byte offset `at` sits inside a single-quoted literal.
fn inside_string(sql: &str, at: usize) -> bool {
    sql[..at].bytes().filter(|b| *b == b'\'').count() % 2 == 1
}
