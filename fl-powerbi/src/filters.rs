//! Filter context from the report surface and its translation into DAX predicates.

use crate::envelope::{Row, cell, value_as_f64};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const FACT_TABLE: &str = "flights";

/// A scalar filter value as it arrives from the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FilterValue {
    fn to_dax(&self) -> String {
        match self {
            Self::Bool(true) => "TRUE()".to_string(),
            Self::Bool(false) => "FALSE()".to_string(),
            Self::Number(n) => format_number(*n),
            Self::Text(s) => format!("\"{}\"", s.replace('"', "\"\"")),
        }
    }

    fn matches(&self, value: &serde_json::Value) -> bool {
        match (self, value) {
            (Self::Text(want), serde_json::Value::String(got)) => want == got,
            (Self::Text(want), other) => want == &other.to_string(),
            (Self::Number(want), other) => value_as_f64(other).is_some_and(|got| got == *want),
            (Self::Bool(want), serde_json::Value::Bool(got)) => want == got,
            (Self::Bool(want), other) => value_as_f64(other).is_some_and(|got| (got != 0.0) == *want),
        }
    }

    fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// One value means equality, several mean set membership.
    #[default]
    Basic,
    /// Exactly two timestamps, inclusive bounds.
    DateRange,
}

/// Case and separator insensitive; names other than a date range (Power BI's
/// own `Basic`, `Advanced`, ...) fall back to [`FilterKind::Basic`].
impl<'de> Deserialize<'de> for FilterKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let normalized: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Ok(match normalized.as_str() {
            "daterange" => Self::DateRange,
            _ => Self::Basic,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub values: Vec<FilterValue>,
    #[serde(default)]
    pub kind: FilterKind,
}

/// Column name to active filter. Keys are kept sorted so the serialized form,
/// and therefore the hash, does not depend on the order the report sent them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterContext {
    columns: BTreeMap<String, ColumnFilter>,
}

impl FilterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, filter: ColumnFilter) -> Self {
        self.columns.insert(column.into(), filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.active().next().is_none()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &ColumnFilter)> {
        self.columns.iter()
    }

    fn active(&self) -> impl Iterator<Item = (&String, &ColumnFilter)> {
        self.columns.iter().filter(|(_, f)| !f.values.is_empty())
    }

    /// Lowercase hex SHA-256 of the canonical JSON form.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        bytes_to_hex(&digest)
    }

    pub fn predicate(&self) -> Predicate {
        let clauses = self
            .active()
            .map(|(column, filter)| Clause::from_filter(column, filter))
            .collect();
        Predicate { clauses }
    }

    /// Short human-readable listing, at most three values per column.
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "no filters".to_string();
        }
        self.active()
            .map(|(column, filter)| {
                let shown: Vec<String> = filter.values.iter().take(3).map(display_value).collect();
                let extra = filter.values.len().saturating_sub(3);
                if extra > 0 {
                    format!("{column}: {}, +{extra} more", shown.join(", "))
                } else {
                    format!("{column}: {}", shown.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClauseTest {
    Equals(FilterValue),
    In(Vec<FilterValue>),
    Between(NaiveDateTime, NaiveDateTime),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub table: String,
    pub column: String,
    pub test: ClauseTest,
}

impl Clause {
    fn from_filter(column: &str, filter: &ColumnFilter) -> Self {
        let table = match filter.table.trim() {
            "" | "Unknown" => FACT_TABLE.to_string(),
            t => t.to_string(),
        };
        let test = match (filter.kind, filter.values.as_slice()) {
            (FilterKind::DateRange, [lo, hi]) => match (lo.as_timestamp(), hi.as_timestamp()) {
                (Some(lo), Some(hi)) => ClauseTest::Between(lo, hi),
                _ => {
                    tracing::warn!(column, "date range bounds are not timestamps; using membership");
                    ClauseTest::In(filter.values.clone())
                }
            },
            (_, [single]) => ClauseTest::Equals(single.clone()),
            (_, values) => ClauseTest::In(values.to_vec()),
        };
        Self {
            table,
            column: column.to_string(),
            test,
        }
    }

    /// Column reference usable inside `FILTER('flights', ...)`.
    fn column_ref(&self) -> String {
        let reference = format!("'{}'[{}]", self.table, self.column);
        if self.table == FACT_TABLE {
            reference
        } else {
            format!("RELATED({reference})")
        }
    }

    pub fn to_dax(&self) -> String {
        let col = self.column_ref();
        match &self.test {
            ClauseTest::Equals(v) => format!("{col} = {}", v.to_dax()),
            ClauseTest::In(values) => {
                let list: Vec<String> = values.iter().map(FilterValue::to_dax).collect();
                format!("{col} IN {{{}}}", list.join(", "))
            }
            ClauseTest::Between(lo, hi) => {
                format!("{col} >= {} && {col} <= {}", dax_datetime(lo), dax_datetime(hi))
            }
        }
    }

    /// Evaluates the clause against one in-memory row keyed by bare column name.
    pub fn matches(&self, row: &Row) -> bool {
        let Some(value) = cell(row, &self.column) else {
            return false;
        };
        match &self.test {
            ClauseTest::Equals(want) => want.matches(value),
            ClauseTest::In(values) => values.iter().any(|want| want.matches(value)),
            ClauseTest::Between(lo, hi) => value
                .as_str()
                .and_then(parse_timestamp)
                .is_some_and(|ts| *lo <= ts && ts <= *hi),
        }
    }
}

/// Conjunction of per-column clauses. Empty means the unrestricted fact table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_unrestricted(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn condition(&self) -> Option<String> {
        if self.clauses.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.clauses.iter().map(Clause::to_dax).collect();
        Some(parts.join(" && "))
    }

    /// Table expression the fast metrics aggregate over.
    pub fn table_expr(&self) -> String {
        match self.condition() {
            Some(condition) => format!("FILTER('{FACT_TABLE}', {condition})"),
            None => format!("'{FACT_TABLE}'"),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().all(|c| c.matches(row))
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn dax_datetime(ts: &NaiveDateTime) -> String {
    format!(
        "(DATE({}, {}, {}) + TIME({}, {}, {}))",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second()
    )
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn display_value(value: &FilterValue) -> String {
    match value {
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Number(n) => format_number(*n),
        FilterValue::Text(s) => s.clone(),
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
