use crate::error::Result;
use crate::traits::{Tool, ToolSpec, require_string};
use async_trait::async_trait;
use fl_powerbi::DocRetriever;
use serde_json::json;
use std::sync::Arc;

pub const DAX_SYNTAX_TOOL: &str = "dax_syntax";

pub struct DaxSyntaxTool {
    docs: Arc<dyn DocRetriever>,
}

impl DaxSyntaxTool {
    pub fn new(docs: Arc<dyn DocRetriever>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl Tool for DaxSyntaxTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: DAX_SYNTAX_TOOL.to_string(),
            description: "Get DAX syntax documentation relevant to a question. Input: keywords from the user's question such as 'delay breakdown', 'top values', 'grouping'."
                .to_string(),
            parameters_schema: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["query"],
                "properties": {
                    "query": { "type": "string" }
                }
            }),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let query = require_string(&arguments, "query")?;
        Ok(serde_json::Value::String(self.docs.relevant_docs(&query)))
    }
}
