use crate::server::AppState;
use axum::routing::post;
use axum::{Extension, Json};
use fl_powerbi::FilterContext;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AskRequest {
    #[serde(default)]
    session_id: Option<String>,
    question: String,
    #[serde(default)]
    verbose: bool,
    #[serde(default)]
    filters: Option<FilterContext>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/ask", post(ask))
}

#[tracing::instrument(level = "info", skip_all)]
async fn ask(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> Json<serde_json::Value> {
    match state
        .ask(
            req.session_id.as_deref(),
            &req.question,
            req.filters,
            req.verbose,
        )
        .await
    {
        Ok(answer) => Json(serde_json::json!({ "status": "ok", "answer": answer })),
        Err(failure) => {
            let mut body = serde_json::json!({ "status": "error", "error": failure.message });
            if let Some(detail) = failure.detail {
                body["detail"] = serde_json::Value::String(detail);
            }
            Json(body)
        }
    }
}
