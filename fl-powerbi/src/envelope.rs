//! Typed view of the `executeQueries` response body.
//!
//! All navigation of the nested `results[].tables[].rows[]` shape lives here.

use serde::{Deserialize, Serialize};

/// One result row: qualified column name (`flights[AIRLINE]`, `[Total]`) to scalar.
/// Column order follows the engine's response.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub tables: Vec<ResultTable>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl QueryResponse {
    /// Rows of `results[0].tables[0]`, empty when the envelope has none.
    pub fn first_rows(&self) -> &[Row] {
        self.results
            .first()
            .and_then(|r| r.tables.first())
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    pub fn first_row(&self) -> Option<&Row> {
        self.first_rows().first()
    }

    /// First numeric cell of the first row, for single-value aggregate queries.
    pub fn scalar(&self) -> Option<f64> {
        self.first_row()?.values().find_map(value_as_f64)
    }
}

/// Strips the table qualifier and brackets: `flights[AIRLINE]` and `[AIRLINE]` become `AIRLINE`.
pub fn bare_column_name(qualified: &str) -> &str {
    match (qualified.find('['), qualified.rfind(']')) {
        (Some(open), Some(close)) if open < close => &qualified[open + 1..close],
        _ => qualified,
    }
}

/// Cell lookup by bare column name, ignoring the table qualifier.
pub fn cell<'a>(row: &'a Row, column: &str) -> Option<&'a serde_json::Value> {
    row.iter()
        .find(|(k, _)| bare_column_name(k).eq_ignore_ascii_case(column))
        .map(|(_, v)| v)
}

pub fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Renders every table's rows as pretty JSON for the agent transcript.
pub fn format_rows(response: &QueryResponse) -> String {
    if response.results.is_empty() {
        return "No data returned".to_string();
    }
    let blocks: Vec<String> = response
        .results
        .iter()
        .flat_map(|r| r.tables.iter())
        .filter(|t| !t.rows.is_empty())
        .map(|t| serde_json::to_string_pretty(&t.rows).unwrap_or_default())
        .collect();
    if blocks.is_empty() {
        "No data found".to_string()
    } else {
        blocks.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> QueryResponse {
        serde_json::from_value(v).expect("parse envelope")
    }

    #[test]
    fn first_rows_tolerates_missing_levels() {
        assert!(parse(json!({})).first_rows().is_empty());
        assert!(parse(json!({"results": [{}]})).first_rows().is_empty());
        assert!(parse(json!({"results": [{"tables": []}]})).first_rows().is_empty());
    }

    #[test]
    fn scalar_reads_first_numeric_cell() {
        let resp = parse(json!({"results": [{"tables": [{"rows": [{"[Total]": 5819079}]}]}]}));
        assert_eq!(resp.scalar(), Some(5819079.0));
        let resp = parse(json!({"results": [{"tables": [{"rows": [{"[Avg]": null}]}]}]}));
        assert_eq!(resp.scalar(), None);
    }

    #[test]
    fn row_column_order_is_preserved() {
        let resp = parse(json!({"results": [{"tables": [{"rows": [
            {"flights[YEAR]": 2015, "flights[MONTH]": 1, "flights[DAY]": 1, "flights[AIRLINE]": "AS"}
        ]}]}]}));
        let names: Vec<&str> = resp.first_rows()[0].keys().map(|k| bare_column_name(k)).collect();
        assert_eq!(names, vec!["YEAR", "MONTH", "DAY", "AIRLINE"]);
    }

    #[test]
    fn bare_column_name_handles_unqualified_names() {
        assert_eq!(bare_column_name("flights[DEPARTURE_DELAY]"), "DEPARTURE_DELAY");
        assert_eq!(bare_column_name("[Total Flights]"), "Total Flights");
        assert_eq!(bare_column_name("plain"), "plain");
    }

    #[test]
    fn format_rows_distinguishes_no_results_from_empty_tables() {
        assert_eq!(format_rows(&parse(json!({}))), "No data returned");
        assert_eq!(
            format_rows(&parse(json!({"results": [{"tables": [{"rows": []}]}]}))),
            "No data found"
        );
        let out = format_rows(&parse(json!({"results": [{"tables": [{"rows": [{"[x]": 1}]}]}]})));
        assert!(out.contains("\"[x]\": 1"));
    }
}
