//! Issues verification tokens on reader check-in events.
//!
//! A token snapshots the reader's position and authorizes exactly one
//! confirmation attempt within a fixed window. At most one unconsumed,
//! unexpired token may exist per (session, subject) pair; a check-in while one
//! is outstanding is rejected rather than stacking confirmable tokens.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use thiserror::Error;

use db::models::{attendance_record, attendance_session, subject, verification_token};

use crate::notifier::Notifier;

/// Fixed validity window for a verification token.
pub const TOKEN_TTL_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("an active verification token already exists for this subject and session")]
    DuplicateActiveToken,
    #[error(transparent)]
    Db(#[from] DbErr),
}

/// Creates and persists a verification token for `subject` in `session`.
///
/// The caller has already resolved the session (and checked it is active) and
/// the subject; this function owns the duplicate guard, the token write, the
/// pending attendance record, and the pending notification.
///
/// The duplicate guard is a read followed by an insert, so two concurrent
/// check-ins for the same pair can both pass it and leave two live tokens.
/// Confirmation tolerates that: the record transition fires exactly once, and
/// the losing token resolves as already-used or record-not-pending.
pub async fn issue(
    db: &DatabaseConnection,
    notifier: &dyn Notifier,
    session: &attendance_session::Model,
    subject: &subject::Model,
    reader_lat: f64,
    reader_lon: f64,
    now: DateTime<Utc>,
) -> Result<verification_token::Model, IssueError> {
    if verification_token::Model::find_active_for(db, session.id, subject.id, now)
        .await?
        .is_some()
    {
        return Err(IssueError::DuplicateActiveToken);
    }

    let token = verification_token::Model::create(
        db,
        session.id,
        subject.id,
        reader_lat,
        reader_lon,
        now,
        TOKEN_TTL_MINUTES,
    )
    .await?;

    attendance_record::Model::ensure_pending(db, session.id, subject.id, now).await?;

    notifier
        .verification_pending(subject.id, session.id, token.expires_at)
        .await;

    Ok(token)
}
