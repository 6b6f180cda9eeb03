//! Tool-augmented query agent: schema lookup, syntax lookup, DAX execution and
//! the fast-metric shortcuts, looped until the model answers without tool calls.

use anyhow::Result;
use fl_llm::{ChatMessage, ChatModel, Role, ToolCall, ToolDefinition, Usage};
use fl_powerbi::FilterContext;
use fl_tools::{Tool, ToolError, output_text, to_llm_tool_def};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

pub const TOOL_LOOP_LIMIT_TEXT: &str = "Tool loop limit reached.";

const SYSTEM_PROMPT: &str = "You are a DAX query expert for Power BI flight data analysis.

Your workflow:
1. Use schema_lookup to see available tables and columns
2. Use dax_syntax with keywords from the user's question to get relevant DAX documentation
3. Construct a valid DAX query using exact column names from schema
4. Use execute_dax to run the query
5. Interpret results and answer the user's question

FAST TOOLS:
- quick_stat: common metrics instantly (total flights, avg delay, cancellations)
- compare_dimension: top values across airlines, origin or destination airports, months
Prefer these over hand-written DAX when the question matches their shape.

FOR MANUAL QUESTIONS:
- Be thorough and detailed
- Show DAX queries when helpful
- Explain reasoning

CRITICAL RULES:
- Always check schema first for exact column names
- Look up DAX syntax for functions you need
- Use ADDCOLUMNS + VALUES + CALCULATE for grouping (NOT SUMMARIZE with aggregations)
- For delay/cancellation totals: use SUM() not COUNTROWS()
- All queries must start with EVALUATE
- Match column names EXACTLY as shown in schema
- For delay breakdowns, use UNION pattern with ROW for each delay type
- If a tool returns an error, correct the query and try again or explain the problem

Be methodical: check schema -> lookup syntax -> build query -> execute -> interpret.";

/// Instructions for insight text generated on filter changes.
pub const AUTO_INSIGHT_PROMPT: &str = "You write auto-generated insights for a Power BI flight delay dashboard.
The user just changed the dashboard filters. From the statistics provided:
- Be extremely concise (2-3 sentences max)
- Focus on the most important finding
- Include specific numbers
- Compare to baseline when relevant
- Don't explain methodology, just provide insight";

/// Failure surfaced to the end user: a short message, with the error chain only
/// when diagnostics were requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentFailure {
    pub message: String,
    pub detail: Option<String>,
}

impl AgentFailure {
    pub fn from_error(error: &anyhow::Error, verbose: bool) -> Self {
        Self {
            message: "Sorry, I couldn't answer that question right now. Please try again.".to_string(),
            detail: verbose.then(|| format!("{error:#}")),
        }
    }
}

pub struct QueryAgent {
    llm: Arc<dyn ChatModel>,
    tools: Vec<Arc<dyn Tool>>,
    max_tool_loops: usize,
}

impl QueryAgent {
    pub fn new(llm: Arc<dyn ChatModel>, tools: Vec<Arc<dyn Tool>>, max_tool_loops: usize) -> Self {
        Self {
            llm,
            tools,
            max_tool_loops,
        }
    }

    /// Appends the question and every model/tool turn to `transcript`, returning
    /// the final answer. Only model failures are errors; tool failures become
    /// tool results the model can react to.
    #[tracing::instrument(level = "info", skip_all, fields(question_len = question.len()))]
    pub async fn answer(
        &self,
        question: &str,
        filters: &FilterContext,
        transcript: &mut Vec<ChatMessage>,
    ) -> Result<(String, Usage)> {
        tracing::info!(
            model = %self.llm.model(),
            prior_history_messages = transcript.len(),
            tools_registered = self.tools.len(),
            filters = filters.columns().count(),
            "agent run started"
        );
        transcript.push(ChatMessage::user(question));

        let tool_defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|t| to_llm_tool_def(t.as_ref()))
            .collect();
        let system_message = ChatMessage::system(system_prompt(filters));
        let mut usage = Usage::default();
        let mut tool_loops = 0usize;

        loop {
            tool_loops += 1;
            if tool_loops > self.max_tool_loops {
                tracing::error!(tool_loops_max = self.max_tool_loops, "agent tool loop limit reached");
                return Ok((TOOL_LOOP_LIMIT_TEXT.to_string(), usage));
            }

            let mut messages = Vec::with_capacity(transcript.len() + 1);
            messages.push(system_message.clone());
            messages.extend(transcript.iter().cloned());

            let llm_started = Instant::now();
            let response = self.llm.chat(&messages, &tool_defs).await?;
            tracing::info!(
                tool_loop = tool_loops,
                latency_ms = llm_started.elapsed().as_millis() as u64,
                prompt_tokens = response.usage.prompt_tokens,
                completion_tokens = response.usage.completion_tokens,
                tool_calls = response.message.tool_calls.len(),
                content_len = response.message.content.len(),
                "agent llm call completed"
            );
            usage.prompt_tokens += response.usage.prompt_tokens;
            usage.completion_tokens += response.usage.completion_tokens;

            if response.message.tool_calls.is_empty() {
                let content = response.message.content.trim().to_string();
                transcript.push(ChatMessage::assistant(content.clone()));
                tracing::info!(
                    response_len = content.len(),
                    tool_loops,
                    "agent run completed"
                );
                return Ok((content, usage));
            }

            transcript.push(ChatMessage {
                role: Role::Assistant,
                ..response.message.clone()
            });
            for tool_call in &response.message.tool_calls {
                let output = self.run_tool_call(tool_call).await;
                transcript.push(ChatMessage::tool_result(tool_call.id.clone(), output));
            }
        }
    }

    async fn run_tool_call(&self, tool_call: &ToolCall) -> String {
        tracing::info!(
            tool_call_id = %tool_call.id,
            tool_name = %tool_call.name,
            arguments_len = tool_call.arguments.len(),
            "agent handling tool call"
        );
        let Some(tool) = self.tools.iter().find(|t| t.spec().name == tool_call.name) else {
            tracing::error!(tool_name = %tool_call.name, "tool call referenced unknown tool");
            return json!({ "error": "unknown tool", "kind": "invalid_arguments" }).to_string();
        };

        let args = match parse_arguments(&tool_call.arguments) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!(tool_name = %tool_call.name, error = %e, "tool arguments rejected");
                return error_result(&e);
            }
        };

        let execute_started = Instant::now();
        let output = match tool.execute(args).await {
            Ok(value) => output_text(&value),
            Err(e) => {
                tracing::warn!(
                    tool_name = %tool_call.name,
                    error_kind = e.kind(),
                    error = %e,
                    "tool call failed"
                );
                error_result(&e)
            }
        };
        tracing::info!(
            tool_call_id = %tool_call.id,
            tool_name = %tool_call.name,
            latency_ms = execute_started.elapsed().as_millis() as u64,
            output_len = output.len(),
            "tool call executed"
        );
        output
    }
}

fn system_prompt(filters: &FilterContext) -> String {
    if filters.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }
    format!(
        "{SYSTEM_PROMPT}\n\nActive dashboard filters: {}. Apply them to your queries unless the user asks otherwise.",
        filters.describe()
    )
}

/// Empty argument strings are treated as `{}`.
fn parse_arguments(raw: &str) -> std::result::Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}

fn error_result(error: &ToolError) -> String {
    json!({ "error": error.to_string(), "kind": error.kind() }).to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use fl_llm::ChatResponse;
    use fl_powerbi::testing::{ManualClock, StaticTokenSource, StubTransport, query_text, rows_envelope};
    use fl_powerbi::{HttpResponse, PowerBiError};
    use std::sync::Mutex;

    type Script = Box<dyn Fn(&[ChatMessage]) -> ChatResponse + Send + Sync>;

    /// Chat model driven by a closure over the transcript it receives.
    pub(crate) struct ScriptedModel {
        script: Script,
        pub(crate) calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(script: impl Fn(&[ChatMessage]) -> ChatResponse + Send + Sync + 'static) -> Self {
            Self {
                script: Box::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().expect("calls lock").len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> fl_llm::Result<ChatResponse> {
            self.calls.lock().expect("calls lock").push(messages.to_vec());
            Ok((self.script)(messages))
        }
    }

    pub(crate) fn reply(content: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage::assistant(content),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            finish_reason: "stop".to_string(),
        }
    }

    pub(crate) fn call(id: &str, name: &str, arguments: &str) -> ChatResponse {
        ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                }],
                tool_call_id: None,
            },
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
            finish_reason: "tool_calls".to_string(),
        }
    }

    fn tool_results(messages: &[ChatMessage]) -> Vec<&ChatMessage> {
        messages.iter().filter(|m| m.role == Role::Tool).collect()
    }

    /// Dataset stub: schema probes return one row per table, averages return 9.37.
    pub(crate) fn flight_dataset() -> Arc<StubTransport> {
        let transport = Arc::new(StubTransport::new());
        transport.respond_with(|request| {
            let query = query_text(request).unwrap_or_default();
            let rows = if query.contains("TOPN(1, 'flights')") {
                json!([{"flights[AIRLINE]": "AA", "flights[DEPARTURE_DELAY]": 3}])
            } else if query.contains("TOPN(1,") {
                json!([{"t[ID]": 1}])
            } else if query.contains("AVERAGE") {
                json!([{"[Avg Delay]": 9.37}])
            } else {
                json!([{"[Value]": 1}])
            };
            Ok(HttpResponse {
                status: 200,
                body: rows_envelope(rows).to_string(),
            })
        });
        transport
    }

    pub(crate) fn agent_tools(transport: Arc<StubTransport>) -> Vec<Arc<dyn Tool>> {
        let cfg = crate::config::FlightLensConfig::for_tests();
        crate::runtime::Runtime::with_tokens(
            &cfg,
            Arc::new(StaticTokenSource("tok".to_string())),
            transport,
            Arc::new(ManualClock::new()),
            None,
        )
        .tools
    }

    #[tokio::test]
    async fn average_delay_question_runs_schema_then_quick_stat() {
        let transport = flight_dataset();
        let model = Arc::new(ScriptedModel::new(|messages| {
            match tool_results(messages).len() {
                0 => call("c1", "schema_lookup", "{}"),
                1 => {
                    assert!(messages.last().expect("tool result").content.contains("Table: 'flights'"));
                    call("c2", "quick_stat", r#"{"metric":"avg_delay"}"#)
                }
                _ => {
                    let stat = &messages.last().expect("tool result").content;
                    assert!(stat.contains("9.37"), "quick stat output: {stat}");
                    reply("The average departure delay is 9.37 minutes.")
                }
            }
        }));
        let agent = QueryAgent::new(model.clone(), agent_tools(transport.clone()), 12);

        let mut transcript = Vec::new();
        let (answer, usage) = agent
            .answer("What's the average delay?", &FilterContext::new(), &mut transcript)
            .await
            .expect("agent answers");

        assert!(answer.chars().any(|c| c.is_ascii_digit()));
        assert_eq!(model.call_count(), 3);
        assert_eq!(usage.prompt_tokens, 30);
        let queries = transport.sent_queries();
        assert!(queries.iter().any(|q| q.contains("TOPN(1, 'flights')")));
        assert!(queries.iter().any(|q| q.contains("AVERAGE('flights'[DEPARTURE_DELAY])")));
        assert_eq!(transcript.first().map(|m| m.role.clone()), Some(Role::User));
        assert_eq!(transcript.last().map(|m| m.content.as_str()), Some(answer.as_str()));
        assert_eq!(tool_results(&transcript).len(), 2);
    }

    #[tokio::test]
    async fn query_errors_are_fed_back_as_tool_results() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(
            400,
            json!({"error": {"code": "DatasetExecuteQueriesError", "message": "Syntax error near SUMM"}}),
        );
        let model = Arc::new(ScriptedModel::new(|messages| {
            match tool_results(messages).last() {
                None => call("c1", "execute_dax", r#"{"dax_query":"EVALUATE SUMM('flights')"}"#),
                Some(result) => {
                    let body: serde_json::Value =
                        serde_json::from_str(&result.content).expect("error json");
                    assert_eq!(body["kind"], "query");
                    assert!(body["error"].as_str().expect("message").contains("Syntax error"));
                    reply("The query failed because of a syntax error.")
                }
            }
        }));
        let agent = QueryAgent::new(model, agent_tools(transport), 12);

        let (answer, _) = agent
            .answer("sum everything", &FilterContext::new(), &mut Vec::new())
            .await
            .expect("no fault escapes");
        assert!(answer.contains("syntax error"));
    }

    #[tokio::test]
    async fn unknown_tools_and_bad_arguments_do_not_abort() {
        let model = Arc::new(ScriptedModel::new(|messages| {
            match tool_results(messages).len() {
                0 => call("c1", "drop_table", "{}"),
                1 => {
                    assert!(messages.last().expect("result").content.contains("unknown tool"));
                    call("c2", "quick_stat", "{not json")
                }
                _ => {
                    assert!(messages.last().expect("result").content.contains("invalid_arguments"));
                    reply("done")
                }
            }
        }));
        let agent = QueryAgent::new(model, agent_tools(Arc::new(StubTransport::new())), 12);
        let (answer, _) = agent
            .answer("?", &FilterContext::new(), &mut Vec::new())
            .await
            .expect("answer");
        assert_eq!(answer, "done");
    }

    #[tokio::test]
    async fn loop_limit_stops_a_model_that_never_answers() {
        let model = Arc::new(ScriptedModel::new(|_| call("c", "schema_lookup", "{}")));
        let transport = Arc::new(StubTransport::new());
        transport.respond_with(|_| Err(PowerBiError::Transport("offline".to_string())));
        let agent = QueryAgent::new(model.clone(), agent_tools(transport), 3);
        let (answer, _) = agent
            .answer("loop", &FilterContext::new(), &mut Vec::new())
            .await
            .expect("limit is not an error");
        assert_eq!(answer, TOOL_LOOP_LIMIT_TEXT);
        assert_eq!(model.call_count(), 3);
    }

    #[test]
    fn failures_hide_detail_unless_verbose() {
        let err = anyhow::anyhow!("llm endpoint returned status 500").context("agent run");
        assert_eq!(AgentFailure::from_error(&err, false).detail, None);
        let verbose = AgentFailure::from_error(&err, true);
        assert!(verbose.detail.expect("detail").contains("status 500"));
    }
}
