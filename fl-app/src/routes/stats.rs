use crate::server::AppState;
use axum::routing::post;
use axum::{Extension, Json};
use fl_powerbi::FilterContext;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct StatsRequest {
    #[serde(default)]
    filters: FilterContext,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/stats", post(filtered_stats))
}

#[tracing::instrument(level = "info", skip_all)]
async fn filtered_stats(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<StatsRequest>,
) -> Json<serde_json::Value> {
    let stats = state.runtime.metrics.compute_filtered_stats(&req.filters).await;
    Json(serde_json::json!({
        "status": if stats.failed_metrics.is_empty() { "ok" } else { "partial" },
        "filters": req.filters.describe(),
        "stats": stats,
    }))
}

#[cfg(test)]
mod tests {
    use crate::server::tests::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use fl_powerbi::HttpResponse;
    use fl_powerbi::testing::{StubTransport, query_text, rows_envelope};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn stats_apply_the_filter_predicate_and_flag_failures() {
        let transport = Arc::new(StubTransport::new());
        transport.respond_with(|request| {
            let query = query_text(request).unwrap_or_default();
            if query.contains("[DIVERTED]") {
                return Ok(HttpResponse {
                    status: 400,
                    body: serde_json::json!({"error": {"code": "x", "message": "no column"}}).to_string(),
                });
            }
            Ok(HttpResponse {
                status: 200,
                body: rows_envelope(serde_json::json!([{"[Value]": 50}])).to_string(),
            })
        });
        let app = crate::server::app(test_state(transport.clone(), None));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/stats")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"filters": {"MONTH": {"table": "flights", "values": [7]}}})
                            .to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

        assert_eq!(json["status"], "partial");
        assert_eq!(json["stats"]["failed_metrics"], serde_json::json!(["diverted"]));
        assert_eq!(json["stats"]["total_flights"], 50.0);
        assert!(
            transport
                .sent_queries()
                .iter()
                .all(|q| q.contains("FILTER('flights', 'flights'[MONTH] = 7)"))
        );
    }
}
