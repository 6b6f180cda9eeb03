use crate::error::{Result, ToolError};
use crate::traits::{Tool, ToolSpec, optional_bounded_usize, optional_string, require_string};
use async_trait::async_trait;
use fl_powerbi::metrics::MAX_TOP_N;
use fl_powerbi::{Dimension, Measure, MetricsCalculator};
use serde_json::json;

pub const COMPARE_DIMENSION_TOOL: &str = "compare_dimension";
const DEFAULT_TOP_N: usize = 5;

pub struct CompareDimensionTool {
    metrics: MetricsCalculator,
}

impl CompareDimensionTool {
    pub fn new(metrics: MetricsCalculator) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Tool for CompareDimensionTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: COMPARE_DIMENSION_TOOL.to_string(),
            description: "Compare flights across a dimension (airline, origin, destination, month). Returns the top members sorted descending by the chosen measure."
                .to_string(),
            parameters_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["dimension"],
                "properties": {
                    "dimension": {
                        "type": "string",
                        "enum": ["airline", "origin", "destination", "month"]
                    },
                    "top_n": { "type": "integer", "minimum": 1, "maximum": MAX_TOP_N },
                    "measure": {
                        "type": "string",
                        "enum": ["total_flights", "avg_delay", "cancellations"]
                    }
                }
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let raw_dimension = require_string(&arguments, "dimension")?;
        let dimension = Dimension::parse(&raw_dimension).ok_or_else(|| {
            ToolError::InvalidArguments(format!(
                "Unknown dimension: {raw_dimension}. Available: airline, origin, destination, month"
            ))
        })?;
        let top_n = optional_bounded_usize(&arguments, "top_n", DEFAULT_TOP_N, MAX_TOP_N)?;
        let measure = match optional_string(&arguments, "measure")? {
            None => Measure::default(),
            Some(raw) => Measure::parse(&raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!(
                    "Unknown measure: {raw}. Available: total_flights, avg_delay, cancellations"
                ))
            })?,
        };

        let rows = self
            .metrics
            .compare_dimension(dimension, top_n, measure)
            .await?;
        Ok(json!({
            "dimension": dimension,
            "measure": measure,
            "rows": rows,
        }))
    }
}
