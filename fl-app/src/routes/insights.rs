use crate::server::AppState;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Extension, Json};
use fl_powerbi::{Clock, FilterContext};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct InsightRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    filters: FilterContext,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/insights", post(auto_insight))
        .route("/api/v1/insights/{session_id}", get(recent_insights))
}

#[tracing::instrument(level = "info", skip_all)]
async fn auto_insight(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<InsightRequest>,
) -> Json<serde_json::Value> {
    let triggered_at = state.runtime.clock.now();
    let session = state.sessions.get_or_create(req.session_id.as_deref());
    let mut session = session.lock().await;
    let outcome = state
        .insights
        .auto_insight(&mut session, &req.filters, triggered_at)
        .await;
    let mut body = serde_json::json!({ "status": outcome.status() });
    if let Some(insight) = outcome.insight() {
        body["text"] = serde_json::Value::String(insight.text.clone());
        body["source"] = serde_json::json!(insight.source);
        body["stats"] = serde_json::json!(insight.stats);
        body["generated_at"] = serde_json::json!(insight.generated_at);
    }
    Json(body)
}

#[tracing::instrument(level = "debug", skip_all)]
async fn recent_insights(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let Some(session) = state.sessions.get(Some(session_id.as_str())) else {
        return Json(serde_json::json!({ "status": "error", "error": "unknown session" }));
    };
    let session = session.lock().await;
    Json(serde_json::json!({
        "status": "ok",
        "session": session.summary(),
        "insights": session.recent_insights(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::agent::tests::flight_dataset;
    use crate::server::tests::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(app: &axum::Router, request: Request<Body>) -> serde_json::Value {
        let response = app.clone().oneshot(request).await.expect("response");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn post_insight(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/insights")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn insight_is_generated_then_cached_and_listed() {
        let app = crate::server::app(test_state(flight_dataset(), None));
        let filters = serde_json::json!({
            "AIRLINE": {"table": "airlines", "values": ["AA"]}
        });

        let first = send(&app, post_insight(serde_json::json!({"session_id": "s1", "filters": filters}))).await;
        assert_eq!(first["status"], "generated");
        assert_eq!(first["source"], "summary");
        assert!(first["stats"]["total_flights"].is_number());

        let second = send(&app, post_insight(serde_json::json!({"session_id": "s1", "filters": filters}))).await;
        assert_eq!(second["status"], "cached");
        assert_eq!(second["text"], first["text"]);

        let listed = send(
            &app,
            Request::builder()
                .uri("/api/v1/insights/s1")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(listed["insights"].as_array().map(Vec::len), Some(1));
        assert!(listed["session"]["filters"].as_str().expect("filters").contains("AIRLINE"));

        let unknown = send(
            &app,
            Request::builder()
                .uri("/api/v1/insights/nobody")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
        assert_eq!(unknown["status"], "error");
    }
}
