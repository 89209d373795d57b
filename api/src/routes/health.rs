use axum::{Json, Router, http::StatusCode, routing::get};
use util::state::AppState;

use crate::response::ApiResponse;

async fn health() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::OK,
        Json(ApiResponse::success((), "Service is up")),
    )
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/", get(health))
}
