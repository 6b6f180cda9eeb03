use crate::error::{Result, ToolError};
use async_trait::async_trait;

pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

pub fn to_llm_tool_def(tool: &dyn Tool) -> fl_llm::ToolDefinition {
    let spec = tool.spec();
    fl_llm::ToolDefinition {
        name: spec.name,
        description: spec.description,
        parameters: spec.parameters_schema,
    }
}

/// Text handed back to the model: strings verbatim, anything else as compact JSON.
pub fn output_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn require_string(args: &serde_json::Value, key: &str) -> Result<String> {
    let Some(v) = args.get(key) else {
        return Err(ToolError::InvalidArguments(format!("missing key: {key}")));
    };
    match v {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other:?}"
        ))),
    }
}

pub(crate) fn optional_string(args: &serde_json::Value, key: &str) -> Result<Option<String>> {
    let Some(v) = args.get(key) else {
        return Ok(None);
    };
    match v {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s.clone())),
        other => Err(ToolError::InvalidArguments(format!(
            "key {key} must be string, got {other:?}"
        ))),
    }
}

/// Integer argument in `1..=max`, `default` when absent. Numeric strings are accepted
/// since models sometimes quote them.
pub(crate) fn optional_bounded_usize(
    args: &serde_json::Value,
    key: &str,
    default: usize,
    max: usize,
) -> Result<usize> {
    let value = match args.get(key) {
        None | Some(serde_json::Value::Null) => return Ok(default),
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    let value = value
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key} must be an integer")))?;
    let value = usize::try_from(value)
        .map_err(|_| ToolError::InvalidArguments(format!("{key} is out of range")))?;
    if !(1..=max).contains(&value) {
        return Err(ToolError::InvalidArguments(format!(
            "{key} must be between 1 and {max}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_string_rejects_missing_and_non_string() {
        assert!(matches!(
            require_string(&json!({}), "query"),
            Err(ToolError::InvalidArguments(msg)) if msg == "missing key: query"
        ));
        assert!(require_string(&json!({"query": 3}), "query").is_err());
        assert_eq!(require_string(&json!({"query": "x"}), "query").expect("string"), "x");
    }

    #[test]
    fn bounded_usize_defaults_and_validates() {
        assert_eq!(optional_bounded_usize(&json!({}), "top_n", 5, 50).expect("default"), 5);
        assert_eq!(optional_bounded_usize(&json!({"top_n": "3"}), "top_n", 5, 50).expect("quoted"), 3);
        let err = optional_bounded_usize(&json!({"top_n": 0}), "top_n", 5, 50).expect_err("zero");
        assert!(err.to_string().contains("between 1 and 50"));
        assert!(optional_bounded_usize(&json!({"top_n": 2.5}), "top_n", 5, 50).is_err());
    }

    #[test]
    fn output_text_passes_strings_through() {
        assert_eq!(output_text(&json!("a\nb")), "a\nb");
        assert_eq!(output_text(&json!({"k": 1})), r#"{"k":1}"#);
    }
}
