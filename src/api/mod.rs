//! HTTP surface for the package registry (spec §4.9, §6).
//!
//! ```text
//! /api/packages/...     - package listing, search, publish, resolve
//! /api/auth/...         - user registration, login, session
//! /api/tokens/...        - token management
//! /admin/api/...          - admin auth and CRUD surface
//! /health, /metrics       - observability
//! ```

pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod types;

pub use server::{build_router, run, ApiConfig};
pub use state::AppState;
</content>
