use crate::server::AppState;
use axum::routing::{get, post};
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/schema", get(get_schema))
        .route("/api/v1/schema/invalidate", post(invalidate_schema))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_schema(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let schema = state.runtime.schema.get_schema().await;
    Json(serde_json::json!({
        "status": "ok",
        "tables": schema.tables(),
        "age_seconds": state.runtime.schema.age().await.map(|a| a.as_secs()),
    }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn invalidate_schema(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    state.runtime.schema.invalidate().await;
    state.runtime.docs.invalidate();
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use crate::agent::tests::flight_dataset;
    use crate::server::tests::test_state;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(app: &axum::Router, method: &str, uri: &str) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn schema_is_cached_until_invalidated() {
        let transport = flight_dataset();
        let app = crate::server::app(test_state(transport.clone(), None));

        let first = send(&app, "GET", "/api/v1/schema").await;
        assert_eq!(first["tables"][0]["table"], "flights");
        assert_eq!(
            first["tables"][0]["columns"],
            serde_json::json!(["AIRLINE", "DEPARTURE_DELAY"])
        );
        assert_eq!(transport.request_count(), 4);

        send(&app, "GET", "/api/v1/schema").await;
        assert_eq!(transport.request_count(), 4);

        assert_eq!(send(&app, "POST", "/api/v1/schema/invalidate").await["status"], "ok");
        send(&app, "GET", "/api/v1/schema").await;
        assert_eq!(transport.request_count(), 8);
    }
}
