pub mod ask;
pub mod health;
pub mod insights;
pub mod report;
pub mod schema;
pub mod stats;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(ask::router())
        .merge(insights::router())
        .merge(stats::router())
        .merge(schema::router())
        .merge(report::router())
}
