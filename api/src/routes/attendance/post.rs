use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use validator::Validate;

use crate::response::ApiResponse;
use util::{config, state::AppState};

use super::common::{CheckInReq, CheckInResponse, ConfirmReq, ConfirmResponse};
use db::models::{attendance_session, reader, subject};
use services::notifier::LogNotifier;
use services::token_issuer::{self, IssueError, TOKEN_TTL_MINUTES};
use services::verification::{self, ConfirmReason};

/// POST /api/attendance/check-ins
///
/// Reader event: resolve the reader's active session and the scanned subject,
/// then issue a verification token bound to the reader's position.
pub async fn check_in(
    State(state): State<AppState>,
    Json(body): Json<CheckInReq>,
) -> (StatusCode, Json<ApiResponse<CheckInResponse>>) {
    if let Err(e) = body.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(format!("Invalid check-in request: {e}"))),
        );
    }

    let db = state.db();
    let now = Utc::now();

    // An unknown reader has no active session either way. Store failures must
    // not collapse into the protocol's not-found codes: a reader retries a 5xx
    // but treats a 404 as final.
    let rdr = match reader::Model::find_by_identifier(db, &body.reader_id).await {
        Ok(Some(rdr)) => rdr,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("no-active-session")),
            );
        }
        Err(e) => {
            tracing::error!("reader lookup failed for {}: {e}", body.reader_id);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to process check-in")),
            );
        }
    };

    let session = match attendance_session::Model::find_active_for_reader(db, rdr.id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("no-active-session")),
            );
        }
        Err(e) => {
            tracing::error!("session lookup failed for reader {}: {e}", body.reader_id);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to process check-in")),
            );
        }
    };

    let subj = match subject::Model::find_by_tag_uid(db, &body.tag_uid).await {
        Ok(Some(subj)) => subj,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error("subject-not-found")),
            );
        }
        Err(e) => {
            tracing::error!("subject lookup failed for tag {}: {e}", body.tag_uid);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to process check-in")),
            );
        }
    };

    match token_issuer::issue(
        db,
        &LogNotifier,
        &session,
        &subj,
        body.reader_lat,
        body.reader_lon,
        now,
    )
    .await
    {
        Ok(token) => {
            let confirmation_link =
                format!("{}/verify/{}", config::frontend_url(), token.id);
            (
                StatusCode::CREATED,
                Json(ApiResponse::success(
                    CheckInResponse {
                        subject_display_name: subj.display_name,
                        session_label: session.label,
                        confirmation_link,
                        expires_in_minutes: TOKEN_TTL_MINUTES,
                    },
                    "Verification pending",
                )),
            )
        }
        Err(IssueError::DuplicateActiveToken) => (
            StatusCode::CONFLICT,
            Json(ApiResponse::error("duplicate-active-token")),
        ),
        Err(IssueError::Db(e)) => {
            tracing::error!("check-in failed for reader {}: {e}", body.reader_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to issue verification token")),
            )
        }
    }
}

/// POST /api/attendance/verifications/{token_id}/confirm
pub async fn confirm_verification(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    Json(body): Json<ConfirmReq>,
) -> (StatusCode, Json<ApiResponse<ConfirmResponse>>) {
    if let Err(e) = body.validate() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::error(format!("Invalid confirmation: {e}"))),
        );
    }

    let db = state.db();
    let now = Utc::now();

    let outcome = match verification::confirm(
        db,
        &LogNotifier,
        &token_id,
        body.confirmer_lat,
        body.confirmer_lon,
        now,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("confirmation failed for token {token_id}: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error("Failed to process verification")),
            );
        }
    };

    if !outcome.reason.is_resolved() {
        let status = match outcome.reason {
            ConfirmReason::NotFound => StatusCode::NOT_FOUND,
            ConfirmReason::Expired => StatusCode::GONE,
            _ => StatusCode::CONFLICT,
        };
        return (status, Json(ApiResponse::error(outcome.reason.as_str())));
    }

    let session_label = match outcome.session_id {
        Some(id) => attendance_session::Model::find_by_session_id(db, id)
            .await
            .ok()
            .flatten()
            .map(|s| s.label)
            .unwrap_or_default(),
        None => String::new(),
    };

    let message = outcome.human_message();
    (
        StatusCode::OK,
        Json(ApiResponse::success(
            ConfirmResponse {
                within_range: outcome.accepted,
                distance_meters: outcome.distance_meters.round() as i64,
                session_label,
                message,
            },
            "Verification processed",
        )),
    )
}
