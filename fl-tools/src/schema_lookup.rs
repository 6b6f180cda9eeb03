use crate::error::Result;
use crate::traits::{Tool, ToolSpec};
use async_trait::async_trait;
use fl_powerbi::SchemaDiscovery;
use serde_json::json;
use std::sync::Arc;

pub const SCHEMA_LOOKUP_TOOL: &str = "schema_lookup";

/// Lists every table and its live column names. Never fails; tables whose
/// probe failed are listed with no columns.
pub struct SchemaLookupTool {
    schema: Arc<SchemaDiscovery>,
}

impl SchemaLookupTool {
    pub fn new(schema: Arc<SchemaDiscovery>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Tool for SchemaLookupTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: SCHEMA_LOOKUP_TOOL.to_string(),
            description: "Get the Power BI dataset schema: every table with its exact column names. Call this first so queries use real column names."
                .to_string(),
            parameters_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {}
            }),
        }
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value> {
        let schema = self.schema.get_schema().await;
        Ok(serde_json::Value::String(schema.render()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_powerbi::testing::{ManualClock, StubTransport, query_text, rows_envelope, stub_executor};
    use fl_powerbi::HttpResponse;
    use std::time::Duration;

    #[tokio::test]
    async fn renders_tables_with_bracketed_columns() {
        let transport = Arc::new(StubTransport::new());
        transport.respond_with(|req| {
            let rows = if query_text(req).unwrap_or_default().contains("'flights'") {
                json!([{"flights[AIRLINE]": "AS", "flights[DEPARTURE_DELAY]": -11}])
            } else {
                json!([])
            };
            Ok(HttpResponse { status: 200, body: rows_envelope(rows).to_string() })
        });
        let discovery = SchemaDiscovery::new(
            stub_executor(transport),
            vec!["flights".to_string(), "airlines".to_string()],
            Duration::from_secs(3600),
            Arc::new(ManualClock::new()),
        );
        let out = SchemaLookupTool::new(Arc::new(discovery))
            .execute(json!({}))
            .await
            .expect("schema");
        let text = out.as_str().expect("text output");
        assert!(text.contains("Table: 'flights'\nColumns: [AIRLINE], [DEPARTURE_DELAY]"));
        assert!(text.contains("Table: 'airlines'\nColumns: \n"));
    }
}
