//! API route handlers, organized by resource: packages, auth, tokens,
//! admin, health, metrics.

pub mod admin;
pub mod auth;
pub mod health;
pub mod metrics;
pub mod packages;
pub mod tokens;

use crate::api::state::AppState;
use axum::Router;

/// Assemble every route group onto a single unstated router; `server.rs`
/// layers middleware on top and calls `.with_state` last.
pub fn build_router(_state: AppState) -> Router<AppState> {
    Router::new()
        .merge(packages::routes())
        .merge(auth::routes())
        .merge(tokens::routes())
        .merge(admin::routes())
        .merge(health::routes())
        .merge(metrics::routes())
}
</content>
