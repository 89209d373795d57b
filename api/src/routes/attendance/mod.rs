use axum::{
    Router,
    routing::{get, post},
};
use util::state::AppState;

mod common;
mod get;
mod post;

pub use get::get_verification;
pub use post::{check_in, confirm_verification};

pub fn attendance_routes() -> Router<AppState> {
    Router::new()
        .route("/check-ins", post(check_in))
        .route("/verifications/{token_id}", get(get_verification))
        .route(
            "/verifications/{token_id}/confirm",
            post(confirm_verification),
        )
}
