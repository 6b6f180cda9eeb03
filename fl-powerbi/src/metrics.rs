//! Fixed menu of aggregate statistics computed with constructed queries, used
//! where the full agent loop would be too slow.

use crate::envelope::{QueryResponse, Row, cell, value_as_f64};
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::filters::{FACT_TABLE, FilterContext};
use futures_util::future::join_all;
use serde::Serialize;

/// The five delay-cause columns on the fact table, with display labels.
pub const DELAY_CATEGORIES: [(&str, &str); 5] = [
    ("AIR_SYSTEM_DELAY", "Air system"),
    ("SECURITY_DELAY", "Security"),
    ("AIRLINE_DELAY", "Airline"),
    ("LATE_AIRCRAFT_DELAY", "Late aircraft"),
    ("WEATHER_DELAY", "Weather"),
];

/// Delay bucket upper bounds in minutes: on time is `<= 0`, minor `(0, 15]`,
/// moderate `(15, 60]`, severe `> 60`.
pub const MINOR_DELAY_MAX_MINUTES: i64 = 15;
pub const MODERATE_DELAY_MAX_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DelayShare {
    pub column: &'static str,
    pub label: &'static str,
    pub minutes: f64,
    pub pct: f64,
}

/// Statistics for one filter context. A metric whose query failed reads as 0.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FilteredStats {
    pub total_flights: f64,
    pub avg_departure_delay: f64,
    pub min_departure_delay: f64,
    pub max_departure_delay: f64,
    pub avg_arrival_delay: f64,
    pub on_time: f64,
    pub minor_delays: f64,
    pub moderate_delays: f64,
    pub severe_delays: f64,
    pub cancelled: f64,
    pub diverted: f64,
    pub on_time_pct: f64,
    pub minor_pct: f64,
    pub moderate_pct: f64,
    pub severe_pct: f64,
    pub cancelled_pct: f64,
    pub diverted_pct: f64,
    pub delay_breakdown: Vec<DelayShare>,
    /// Names of metrics whose query failed.
    pub failed_metrics: Vec<String>,
}

impl FilteredStats {
    fn derive_percentages(&mut self) {
        let total = if self.total_flights == 0.0 { 1.0 } else { self.total_flights };
        self.on_time_pct = pct(self.on_time, total);
        self.minor_pct = pct(self.minor_delays, total);
        self.moderate_pct = pct(self.moderate_delays, total);
        self.severe_pct = pct(self.severe_delays, total);
        self.cancelled_pct = pct(self.cancelled, total);
        self.diverted_pct = pct(self.diverted, total);

        let delay_total: f64 = self.delay_breakdown.iter().map(|d| d.minutes).sum();
        let delay_total = if delay_total == 0.0 { 1.0 } else { delay_total };
        for share in &mut self.delay_breakdown {
            share.pct = pct(share.minutes, delay_total);
        }
    }

    /// Largest delay cause by total minutes, if any minutes were recorded.
    pub fn top_delay_cause(&self) -> Option<&DelayShare> {
        self.delay_breakdown
            .iter()
            .filter(|d| d.minutes > 0.0)
            .max_by(|a, b| a.minutes.total_cmp(&b.minutes))
    }

    /// Plain-text block used as model context and as the no-model fallback.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Total flights: {:.0}", self.total_flights),
            format!(
                "Departure delay (min): avg {:.1}, min {:.0}, max {:.0}",
                self.avg_departure_delay, self.min_departure_delay, self.max_departure_delay
            ),
            format!("Average arrival delay (min): {:.1}", self.avg_arrival_delay),
            format!(
                "On time: {:.0} ({:.1}%), minor 1-15: {:.0} ({:.1}%), moderate 16-60: {:.0} ({:.1}%), severe >60: {:.0} ({:.1}%)",
                self.on_time,
                self.on_time_pct,
                self.minor_delays,
                self.minor_pct,
                self.moderate_delays,
                self.moderate_pct,
                self.severe_delays,
                self.severe_pct
            ),
            format!(
                "Cancelled: {:.0} ({:.1}%), diverted: {:.0} ({:.1}%)",
                self.cancelled, self.cancelled_pct, self.diverted, self.diverted_pct
            ),
        ];
        let causes: Vec<String> = self
            .delay_breakdown
            .iter()
            .map(|d| format!("{} {:.0} min ({:.1}%)", d.label, d.minutes, d.pct))
            .collect();
        lines.push(format!("Delay minutes by cause: {}", causes.join(", ")));
        lines
    }
}

fn pct(part: f64, whole: f64) -> f64 {
    part * 100.0 / whole
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickMetric {
    TotalFlights,
    AvgDelay,
    TotalDelays,
    CancellationRate,
    CancelledCount,
}

impl QuickMetric {
    pub const ALL: [QuickMetric; 5] = [
        Self::TotalFlights,
        Self::AvgDelay,
        Self::TotalDelays,
        Self::CancellationRate,
        Self::CancelledCount,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::TotalFlights => "total_flights",
            Self::AvgDelay => "avg_delay",
            Self::TotalDelays => "total_delays",
            Self::CancellationRate => "cancellation_rate",
            Self::CancelledCount => "cancelled_count",
        }
    }

    /// First menu entry whose name contains the request or is contained in it.
    pub fn find(requested: &str) -> Option<Self> {
        let requested = requested.trim().to_lowercase();
        if requested.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|m| requested.contains(m.name()) || m.name().contains(requested.as_str()))
    }

    pub fn available() -> String {
        Self::ALL.map(Self::name).join(", ")
    }

    pub fn query(self) -> String {
        let cancelled = format!("FILTER('{FACT_TABLE}', '{FACT_TABLE}'[CANCELLED] = 1)");
        match self {
            Self::TotalFlights => format!("EVALUATE ROW(\"Total Flights\", COUNTROWS('{FACT_TABLE}'))"),
            Self::AvgDelay => {
                format!("EVALUATE ROW(\"Avg Delay\", AVERAGE('{FACT_TABLE}'[DEPARTURE_DELAY]))")
            }
            Self::TotalDelays => {
                format!("EVALUATE ROW(\"Total Delays\", SUM('{FACT_TABLE}'[DEPARTURE_DELAY]))")
            }
            Self::CancellationRate => format!(
                "EVALUATE ROW(\"Cancellation Rate\", DIVIDE(COUNTROWS({cancelled}), COUNTROWS('{FACT_TABLE}')))"
            ),
            Self::CancelledCount => format!("EVALUATE ROW(\"Cancelled\", COUNTROWS({cancelled}))"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Airline,
    Origin,
    Destination,
    Month,
}

impl Dimension {
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.to_lowercase();
        if lower.contains("airline") || lower.contains("carrier") {
            Some(Self::Airline)
        } else if lower.contains("origin") {
            Some(Self::Origin)
        } else if lower.contains("dest") {
            Some(Self::Destination)
        } else if lower.contains("month") {
            Some(Self::Month)
        } else {
            None
        }
    }

    fn label_column(self) -> (&'static str, &'static str) {
        match self {
            Self::Airline => ("airlines", "AIRLINE"),
            Self::Origin => ("origin_airport", "AIRPORT"),
            Self::Destination => ("destination_airport", "AIRPORT"),
            Self::Month => (FACT_TABLE, "MONTH"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    #[default]
    TotalFlights,
    AvgDelay,
    Cancellations,
}

impl Measure {
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_lowercase();
        if lower.is_empty() || lower.contains("flight") || lower == "count" {
            Some(Self::TotalFlights)
        } else if lower.contains("delay") {
            Some(Self::AvgDelay)
        } else if lower.contains("cancel") {
            Some(Self::Cancellations)
        } else {
            None
        }
    }

    fn column_name(self) -> &'static str {
        match self {
            Self::TotalFlights => "Total Flights",
            Self::AvgDelay => "Avg Delay",
            Self::Cancellations => "Cancellations",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionRow {
    pub label: String,
    pub total_flights: Option<f64>,
    pub avg_delay: Option<f64>,
    pub cancellations: Option<f64>,
}

impl DimensionRow {
    fn from_row(row: &Row, label_column: &str) -> Self {
        let label = cell(row, label_column)
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => "(blank)".to_string(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "(blank)".to_string());
        let number = |name: &str| cell(row, name).and_then(value_as_f64);
        Self {
            label,
            total_flights: number(Measure::TotalFlights.column_name()),
            avg_delay: number(Measure::AvgDelay.column_name()),
            cancellations: number(Measure::Cancellations.column_name()),
        }
    }

    pub fn measure(&self, measure: Measure) -> Option<f64> {
        match measure {
            Measure::TotalFlights => self.total_flights,
            Measure::AvgDelay => self.avg_delay,
            Measure::Cancellations => self.cancellations,
        }
    }
}

pub const MAX_TOP_N: usize = 50;

pub fn compare_query(dimension: Dimension, top_n: usize, measure: Measure) -> String {
    let (table, column) = dimension.label_column();
    format!(
        "EVALUATE\nTOPN(\n    {top_n},\n    ADDCOLUMNS(\n        VALUES('{table}'[{column}]),\n        \
         \"Total Flights\", CALCULATE(COUNTROWS('{FACT_TABLE}')),\n        \
         \"Avg Delay\", CALCULATE(AVERAGE('{FACT_TABLE}'[DEPARTURE_DELAY])),\n        \
         \"Cancellations\", CALCULATE(COUNTROWS(FILTER('{FACT_TABLE}', '{FACT_TABLE}'[CANCELLED] = 1)))\n    ),\n    \
         [{}], DESC\n)",
        measure.column_name()
    )
}

/// Named aggregate queries over one table expression.
fn stat_queries(table: &str) -> Vec<(&'static str, String)> {
    let delay = format!("'{FACT_TABLE}'[DEPARTURE_DELAY]");
    let count_where = |condition: String| format!("COUNTROWS(FILTER({table}, {condition}))");
    // BLANK() compares as zero, so cancelled flights would land in the on-time bucket.
    let bucket = |condition: String| count_where(format!("NOT ISBLANK({delay}) && {condition}"));
    let mut out = vec![
        ("total_flights", format!("COUNTROWS({table})")),
        ("avg_departure_delay", format!("AVERAGEX({table}, {delay})")),
        ("min_departure_delay", format!("MINX({table}, {delay})")),
        ("max_departure_delay", format!("MAXX({table}, {delay})")),
        (
            "avg_arrival_delay",
            format!("AVERAGEX({table}, '{FACT_TABLE}'[ARRIVAL_DELAY])"),
        ),
        ("on_time", bucket(format!("{delay} <= 0"))),
        (
            "minor_delays",
            bucket(format!("{delay} > 0 && {delay} <= {MINOR_DELAY_MAX_MINUTES}")),
        ),
        (
            "moderate_delays",
            bucket(format!(
                "{delay} > {MINOR_DELAY_MAX_MINUTES} && {delay} <= {MODERATE_DELAY_MAX_MINUTES}"
            )),
        ),
        (
            "severe_delays",
            bucket(format!("{delay} > {MODERATE_DELAY_MAX_MINUTES}")),
        ),
        ("cancelled", count_where(format!("'{FACT_TABLE}'[CANCELLED] = 1"))),
        ("diverted", count_where(format!("'{FACT_TABLE}'[DIVERTED] = 1"))),
    ];
    for (column, _) in DELAY_CATEGORIES {
        out.push((column, format!("SUMX({table}, '{FACT_TABLE}'[{column}])")));
    }
    out.into_iter()
        .map(|(name, expr)| (name, format!("EVALUATE ROW(\"Value\", {expr})")))
        .collect()
}

#[derive(Clone)]
pub struct MetricsCalculator {
    executor: QueryExecutor,
}

impl MetricsCalculator {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// One aggregate query per statistic, issued concurrently. A failed query
    /// leaves its metric at 0 and is listed in `failed_metrics`.
    #[tracing::instrument(level = "info", skip_all, fields(filters = filters.columns().count()))]
    pub async fn compute_filtered_stats(&self, filters: &FilterContext) -> FilteredStats {
        let table = filters.predicate().table_expr();
        let queries = stat_queries(&table);
        let results = join_all(queries.iter().map(|(name, query)| async move {
            let value = match self.executor.execute_query(query).await {
                Ok(response) => Ok(response.scalar().unwrap_or(0.0)),
                Err(e) => {
                    tracing::warn!(metric = *name, error = %e, "filtered stat query failed");
                    Err(())
                }
            };
            (*name, value)
        }))
        .await;

        let mut stats = FilteredStats::default();
        for (name, value) in results {
            let value = match value {
                Ok(v) => v,
                Err(()) => {
                    stats.failed_metrics.push(name.to_string());
                    0.0
                }
            };
            match name {
                "total_flights" => stats.total_flights = value,
                "avg_departure_delay" => stats.avg_departure_delay = value,
                "min_departure_delay" => stats.min_departure_delay = value,
                "max_departure_delay" => stats.max_departure_delay = value,
                "avg_arrival_delay" => stats.avg_arrival_delay = value,
                "on_time" => stats.on_time = value,
                "minor_delays" => stats.minor_delays = value,
                "moderate_delays" => stats.moderate_delays = value,
                "severe_delays" => stats.severe_delays = value,
                "cancelled" => stats.cancelled = value,
                "diverted" => stats.diverted = value,
                column => {
                    if let Some((column, label)) =
                        DELAY_CATEGORIES.iter().find(|(c, _)| *c == column)
                    {
                        stats.delay_breakdown.push(DelayShare {
                            column,
                            label,
                            minutes: value,
                            pct: 0.0,
                        });
                    }
                }
            }
        }
        stats.derive_percentages();
        stats
    }

    pub async fn quick_stat(&self, metric: QuickMetric) -> Result<QueryResponse> {
        self.executor.execute_query(&metric.query()).await
    }

    /// Top `top_n` members of a dimension, sorted descending by `measure`.
    /// Rows without a value for the measure sort last.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn compare_dimension(
        &self,
        dimension: Dimension,
        top_n: usize,
        measure: Measure,
    ) -> Result<Vec<DimensionRow>> {
        let top_n = top_n.clamp(1, MAX_TOP_N);
        let response = self
            .executor
            .execute_query(&compare_query(dimension, top_n, measure))
            .await?;
        let (_, label_column) = dimension.label_column();
        let mut rows: Vec<DimensionRow> = response
            .first_rows()
            .iter()
            .map(|r| DimensionRow::from_row(r, label_column))
            .collect();
        rows.sort_by(|a, b| match (a.measure(measure), b.measure(measure)) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        rows.truncate(top_n);
        Ok(rows)
    }
}
