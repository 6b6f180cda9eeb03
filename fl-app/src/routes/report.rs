use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/report/embed", get(embed_info))
}

#[tracing::instrument(level = "info", skip_all)]
async fn embed_info(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.runtime.report.embed_info().await {
        Ok(info) => Json(serde_json::json!({
            "status": "ok",
            "report_id": info.report_id,
            "embed_url": info.embed_url,
            "embed_token": info.embed_token,
            "expiration": info.expiration,
        })),
        Err(e) => Json(serde_json::json!({
            "status": "error",
            "kind": e.kind(),
            "error": e.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use crate::server::tests::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use fl_powerbi::testing::StubTransport;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn embed_errors_carry_their_kind() {
        let transport = Arc::new(StubTransport::new());
        transport.push_json(403, serde_json::json!({"error": {"code": "PowerBINotAuthorizedException"}}));
        let app = crate::server::app(test_state(transport, None));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/report/embed")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "auth");
    }
}
