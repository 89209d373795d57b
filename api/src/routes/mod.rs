//! HTTP route entry point for `/api/...`.
//!
//! Route groups:
//! - `/health` → liveness check (public)
//! - `/attendance` → check-in issuance (reader-facing) and verification
//!   confirmation (confirmer-facing)
//!
//! Authentication of readers and confirmers is an upstream concern and is not
//! handled here.

use axum::Router;
use util::state::AppState;

pub mod attendance;
pub mod health;

/// Builds the complete application router for all HTTP endpoints.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/health", health::health_routes())
        .nest("/attendance", attendance::attendance_routes())
}
