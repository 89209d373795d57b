use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;

use crate::response::ApiResponse;
use util::state::AppState;

use super::common::VerificationInfoResponse;
use db::models::{attendance_session, subject, verification_token};
use sea_orm::EntityTrait;

/// GET /api/attendance/verifications/{token_id}
///
/// Confirm-page support: session and subject labels plus the expiry for a
/// still-active token. Uses the same error codes as the confirm endpoint so a
/// stale link renders the right state without a submit.
pub async fn get_verification(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<VerificationInfoResponse>>) {
    let db = state.db();
    let now = Utc::now();

    let token = match verification_token::Model::find_by_token_id(db, &token_id).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("not-found")),
            );
        }
        Err(e) => {
            tracing::error!("verification lookup failed for token {token_id}: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to load verification")),
            );
        }
    };

    if token.consumed {
        return (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("already-used")),
        );
    }
    if now > token.expires_at {
        return (StatusCode::GONE, Json(ApiResponse::error("expired")));
    }

    let session_label = attendance_session::Model::find_by_session_id(db, token.session_id)
        .await
        .ok()
        .flatten()
        .map(|s| s.label)
        .unwrap_or_default();
    let subject_display_name = subject::Entity::find_by_id(token.subject_id)
        .one(db)
        .await
        .ok()
        .flatten()
        .map(|s| s.display_name)
        .unwrap_or_default();

    (
        StatusCode::OK,
        Json(ApiResponse::success(
            VerificationInfoResponse {
                session_label,
                subject_display_name,
                expires_at: token.expires_at.to_rfc3339(),
            },
            "Verification pending",
        )),
    )
}
