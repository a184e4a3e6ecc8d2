//! Liveness and detailed health probes (spec §4.10).

use crate::api::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(liveness))
        .route("/health/detailed", get(detailed))
}

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
}

async fn liveness() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}

#[derive(Serialize)]
struct DetailedHealth {
    status: &'static str,
    components: Vec<ComponentHealth>,
}

#[derive(Serialize)]
struct ComponentHealth {
    name: &'static str,
    status: &'static str,
    latency_ms: Option<u64>,
    detail: Option<String>,
}

async fn detailed(State(state): State<AppState>) -> (StatusCode, Json<DetailedHealth>) {
    let mut components = Vec::new();
    let mut healthy = true;

    match state.metadata.health_check().await {
        Ok(report) => components.push(ComponentHealth {
            name: "metadata_store",
            status: "ok",
            latency_ms: Some(report.latency_ms),
            detail: Some(report.store_type),
        }),
        Err(e) => {
            healthy = false;
            components.push(ComponentHealth {
                name: "metadata_store",
                status: "error",
                latency_ms: None,
                detail: Some(e.to_string()),
            });
        }
    }

    components.push(ComponentHealth {
        name: "upstream_proxy",
        status: if state.proxy.upstream_enabled() { "enabled" } else { "disabled" },
        latency_ms: None,
        detail: None,
    });

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(DetailedHealth {
            status: if healthy { "ok" } else { "degraded" },
            components,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_always_reports_ok() {
        let Json(body) = liveness().await;
        assert_eq!(body.status, "ok");
    }
}
</content>
