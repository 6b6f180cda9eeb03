use crate::error::{Result, ToolError};
use crate::traits::{Tool, ToolSpec, require_string};
use async_trait::async_trait;
use fl_powerbi::{QueryExecutor, format_rows};
use serde_json::json;

pub const EXECUTE_DAX_TOOL: &str = "execute_dax";

pub struct ExecuteDaxTool {
    executor: QueryExecutor,
}

impl ExecuteDaxTool {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for ExecuteDaxTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: EXECUTE_DAX_TOOL.to_string(),
            description: "Execute a DAX query against the Power BI dataset. Input: a complete, valid DAX query starting with EVALUATE. Only use after checking the schema."
                .to_string(),
            parameters_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["dax_query"],
                "properties": {
                    "dax_query": { "type": "string" }
                }
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let query = require_string(&arguments, "dax_query")?;
        if query.trim().is_empty() {
            return Err(ToolError::InvalidArguments(
                "dax_query must not be empty".to_string(),
            ));
        }
        let response = self.executor.execute_query(query.trim()).await?;
        Ok(serde_json::Value::String(format_rows(&response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fl_powerbi::testing::{StubTransport, rows_envelope, stub_executor};
    use std::sync::Arc;

    #[tokio::test]
    async fn formats_rows_from_the_engine() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(200, rows_envelope(json!([{"[Avg Delay]": 9.37}])));
        let tool = ExecuteDaxTool::new(stub_executor(transport.clone()));
        let out = tool
            .execute(json!({"dax_query": "  EVALUATE ROW(\"Avg Delay\", AVERAGE('flights'[DEPARTURE_DELAY]))\n"}))
            .await
            .expect("rows");
        assert!(out.as_str().expect("text").contains("\"[Avg Delay]\": 9.37"));
        assert_eq!(
            transport.sent_queries(),
            vec!["EVALUATE ROW(\"Avg Delay\", AVERAGE('flights'[DEPARTURE_DELAY]))".to_string()]
        );
    }

    #[tokio::test]
    async fn engine_rejection_surfaces_as_query_error() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(
            400,
            json!({"error": {"code": "DatasetExecuteQueriesError", "message": "Column 'DELAY' not found"}}),
        );
        let tool = ExecuteDaxTool::new(stub_executor(transport));
        let err = tool
            .execute(json!({"dax_query": "EVALUATE 'flights'[DELAY]"}))
            .await
            .expect_err("query error");
        assert_eq!(err.kind(), "query");
        assert!(err.to_string().contains("Column 'DELAY' not found"));
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_a_request() {
        let transport = Arc::new(StubTransport::new());
        let tool = ExecuteDaxTool::new(stub_executor(transport.clone()));
        let err = tool.execute(json!({"dax_query": "   "})).await.expect_err("blank");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert_eq!(transport.request_count(), 0);
    }
}
