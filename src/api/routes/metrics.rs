//! Prometheus metrics endpoint (spec §4.10).

use crate::api::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render(state.metadata.as_ref()).await {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("failed to render metrics: {e}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::metadata::sqlite::SqliteMetadataStore;
    use crate::storage::BlobStores;
    use std::sync::Arc;

    #[tokio::test]
    async fn metrics_endpoint_reports_repub_series() {
        let metadata: Arc<dyn crate::metadata::MetadataStore> =
            Arc::new(SqliteMetadataStore::open(":memory:").await.unwrap());
        metadata.run_migrations().await.unwrap();
        let blobs = Arc::new(BlobStores::in_memory());
        let state = AppState::assemble(metadata, blobs, ServerConfig::from_env()).unwrap();
        let (status, _, body) = metrics(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("repub_up"));
    }
}
</content>
