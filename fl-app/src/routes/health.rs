use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let missing = state.config.missing_groups();
    let schema_age = state.runtime.schema.age().await;
    let groups: Vec<serde_json::Value> = missing
        .iter()
        .map(|g| serde_json::json!({ "group": g.group, "missing": g.variables }))
        .collect();

    Json(serde_json::json!({
        "status": if missing.is_empty() { "ok" } else { "degraded" },
        "ready": missing.is_empty(),
        "checked_at": Utc::now(),
        "checks": {
            "configuration": { "complete": missing.is_empty(), "missing_groups": groups },
            "llm_configured": state.agent.is_some(),
            "docs_found": state.runtime.docs.resolved_path().is_some(),
            "schema_cache_age_seconds": schema_age.map(|age| age.as_secs()),
            "sessions": state.sessions.len(),
        }
    }))
}
