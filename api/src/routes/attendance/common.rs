use serde::{Deserialize, Serialize};
use validator::Validate;

/// Reader → service: a proximity event for one subject at the reader's
/// current position.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckInReq {
    #[validate(length(min = 1, message = "reader_id must not be empty"))]
    pub reader_id: String,
    /// Subject identifier exactly as presented by the reader (tag UID).
    #[validate(length(min = 1, message = "tag_uid must not be empty"))]
    pub tag_uid: String,
    #[validate(range(min = -90.0, max = 90.0, message = "latitude out of range"))]
    pub reader_lat: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude out of range"))]
    pub reader_lon: f64,
}

#[derive(Debug, Serialize, Default)]
pub struct CheckInResponse {
    pub subject_display_name: String,
    pub session_label: String,
    /// Link delivered to the subject out-of-band; opening it drives the
    /// confirm endpoint.
    pub confirmation_link: String,
    pub expires_in_minutes: i64,
}

/// Confirmer → service: the confirmer's own position for an issued token.
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmReq {
    #[validate(range(min = -90.0, max = 90.0, message = "latitude out of range"))]
    pub confirmer_lat: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude out of range"))]
    pub confirmer_lon: f64,
}

#[derive(Debug, Serialize, Default)]
pub struct ConfirmResponse {
    pub within_range: bool,
    /// Rounded for display; the exact value is stored on the record.
    pub distance_meters: i64,
    pub session_label: String,
    pub message: String,
}

/// What a confirm page needs to render before the subject submits a position.
#[derive(Debug, Serialize, Default)]
pub struct VerificationInfoResponse {
    pub session_label: String,
    pub subject_display_name: String,
    pub expires_at: String,
}
