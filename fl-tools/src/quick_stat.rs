use crate::error::{Result, ToolError};
use crate::traits::{Tool, ToolSpec, require_string};
use async_trait::async_trait;
use fl_powerbi::{MetricsCalculator, QuickMetric, format_rows};
use serde_json::json;

pub const QUICK_STAT_TOOL: &str = "quick_stat";

/// Common unfiltered metrics without hand-written DAX.
pub struct QuickStatTool {
    metrics: MetricsCalculator,
}

impl QuickStatTool {
    pub fn new(metrics: MetricsCalculator) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Tool for QuickStatTool {
    fn spec(&self) -> ToolSpec {
        let names: Vec<&str> = QuickMetric::ALL.iter().map(|m| m.name()).collect();
        ToolSpec {
            name: QUICK_STAT_TOOL.to_string(),
            description: format!(
                "Get a common statistic instantly without writing DAX. Metrics: {}.",
                names.join(", ")
            ),
            parameters_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["metric"],
                "properties": {
                    "metric": { "type": "string", "enum": names }
                }
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let requested = require_string(&arguments, "metric")?;
        let Some(metric) = QuickMetric::find(&requested) else {
            return Err(ToolError::InvalidArguments(format!(
                "Unknown metric: {requested}. Available: {}",
                QuickMetric::available()
            )));
        };
        tracing::debug!(metric = metric.name(), "quick stat requested");
        let response = self.metrics.quick_stat(metric).await?;
        Ok(serde_json::Value::String(format_rows(&response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_powerbi::testing::{StubTransport, rows_envelope, stub_executor};
    use std::sync::Arc;

    fn tool(transport: Arc<StubTransport>) -> QuickStatTool {
        QuickStatTool::new(MetricsCalculator::new(stub_executor(transport)))
    }

    #[tokio::test]
    async fn avg_delay_runs_the_averaging_query() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(200, rows_envelope(json!([{"[Avg Delay]": 9.37}])));
        let out = tool(transport.clone())
            .execute(json!({"metric": "avg_delay"}))
            .await
            .expect("stat");
        assert!(out.as_str().expect("text").contains("9.37"));
        assert!(transport.sent_queries()[0].contains("AVERAGE('flights'[DEPARTURE_DELAY])"));
    }

    #[tokio::test]
    async fn unknown_metric_lists_the_menu() {
        let transport = Arc::new(StubTransport::new());
        let err = tool(transport.clone())
            .execute(json!({"metric": "weather"}))
            .await
            .expect_err("unknown");
        assert_eq!(
            err.to_string(),
            "invalid arguments: Unknown metric: weather. Available: total_flights, avg_delay, total_delays, cancellation_rate, cancelled_count"
        );
        assert_eq!(transport.request_count(), 0);
    }
}
