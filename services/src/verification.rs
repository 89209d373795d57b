//! The confirmation state machine.
//!
//! Consumes a verification token together with the confirmer's coordinates,
//! applies the distance test against the reader position snapshotted in the
//! token, and resolves the attendance record. Token states only ever move
//! `issued -> consumed`; record states only ever move
//! `pending -> present | absent`.
//!
//! Every write is a conditional update at the store, so two confirmations
//! racing on the same token (or two tokens racing on the same record) resolve
//! to exactly one winner no matter how many service instances are running.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr, TransactionTrait};
use serde::Serialize;

use db::models::attendance_record::{self, Status};
use db::models::verification_token;

use crate::geo;
use crate::notifier::Notifier;

/// Maximum allowed distance between confirmer and reader, in meters.
pub const ACCEPTANCE_RADIUS_M: f64 = 100.0;

/// Inclusive distance test: a confirmer standing exactly on the radius passes.
pub fn within_acceptance_radius(distance_meters: f64) -> bool {
    distance_meters <= ACCEPTANCE_RADIUS_M
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfirmReason {
    Ok,
    TooFar,
    Expired,
    AlreadyUsed,
    NotFound,
    RecordNotPending,
}

impl ConfirmReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmReason::Ok => "ok",
            ConfirmReason::TooFar => "too-far",
            ConfirmReason::Expired => "expired",
            ConfirmReason::AlreadyUsed => "already-used",
            ConfirmReason::NotFound => "not-found",
            ConfirmReason::RecordNotPending => "record-not-pending",
        }
    }

    /// Reasons that resolve the attendance record (the confirmation itself
    /// went through; `accepted` says which way).
    pub fn is_resolved(&self) -> bool {
        matches!(self, ConfirmReason::Ok | ConfirmReason::TooFar)
    }
}

/// Ephemeral result of a confirmation attempt. Not persisted; the durable
/// outcome lives on the attendance record.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub accepted: bool,
    pub distance_meters: f64,
    pub reason: ConfirmReason,
    pub session_id: Option<i64>,
    pub subject_id: Option<i64>,
}

impl VerificationOutcome {
    fn not_found() -> Self {
        Self {
            accepted: false,
            distance_meters: 0.0,
            reason: ConfirmReason::NotFound,
            session_id: None,
            subject_id: None,
        }
    }

    fn rejected(token: &verification_token::Model, reason: ConfirmReason) -> Self {
        Self {
            accepted: false,
            distance_meters: 0.0,
            reason,
            session_id: Some(token.session_id),
            subject_id: Some(token.subject_id),
        }
    }

    pub fn human_message(&self) -> String {
        match self.reason {
            ConfirmReason::Ok => format!(
                "Attendance confirmed: {:.0} m from the reader.",
                self.distance_meters
            ),
            ConfirmReason::TooFar => format!(
                "You are {:.0} m from the reader; the limit is {:.0} m. Marked absent.",
                self.distance_meters, ACCEPTANCE_RADIUS_M
            ),
            ConfirmReason::Expired => "This verification has expired.".to_owned(),
            ConfirmReason::AlreadyUsed => {
                "This verification has already been used.".to_owned()
            }
            ConfirmReason::NotFound => "Unknown verification token.".to_owned(),
            ConfirmReason::RecordNotPending => {
                "This attendance record has already been resolved.".to_owned()
            }
        }
    }
}

/// Processes one confirmation attempt for `token_id`.
///
/// Behaves as a single atomic operation per token: of any number of concurrent
/// calls, at most one observes a reason other than `already-used` /
/// `record-not-pending`. Store errors abort and surface as `Err`; the caller
/// may resubmit safely, since a retry after a committed consume cleanly
/// observes `already-used`.
pub async fn confirm(
    db: &DatabaseConnection,
    notifier: &dyn Notifier,
    token_id: &str,
    confirmer_lat: f64,
    confirmer_lon: f64,
    now: DateTime<Utc>,
) -> Result<VerificationOutcome, DbErr> {
    let Some(token) = verification_token::Model::find_by_token_id(db, token_id).await? else {
        return Ok(VerificationOutcome::not_found());
    };

    if token.consumed {
        return Ok(VerificationOutcome::rejected(
            &token,
            ConfirmReason::AlreadyUsed,
        ));
    }

    if now > token.expires_at {
        // An expired token must not remain confirmable later; the attendance
        // record is untouched.
        verification_token::Model::consume(db, &token.id).await?;
        return Ok(VerificationOutcome::rejected(&token, ConfirmReason::Expired));
    }

    let record =
        attendance_record::Model::get_by_key(db, token.session_id, token.subject_id).await?;
    let record_pending = matches!(record, Some(ref r) if r.status == Status::Pending);
    if !record_pending {
        // The record was already resolved (racing token, manual override).
        // The token still burns.
        verification_token::Model::consume(db, &token.id).await?;
        return Ok(VerificationOutcome::rejected(
            &token,
            ConfirmReason::RecordNotPending,
        ));
    }

    let distance_meters = geo::haversine_distance_m(
        confirmer_lat,
        confirmer_lon,
        token.reader_lat,
        token.reader_lon,
    );
    let accepted = within_acceptance_radius(distance_meters);
    let new_status = if accepted {
        Status::Present
    } else {
        Status::Absent
    };

    // Consume the token and transition the record as one unit. Both writes
    // are conditional, so a writer that lost either race finds out here
    // instead of overwriting.
    let txn = db.begin().await?;

    if !verification_token::Model::consume(&txn, &token.id).await? {
        txn.rollback().await?;
        return Ok(VerificationOutcome::rejected(
            &token,
            ConfirmReason::AlreadyUsed,
        ));
    }

    if !attendance_record::Model::confirm_transition(
        &txn,
        token.session_id,
        token.subject_id,
        new_status,
        now,
        confirmer_lat,
        confirmer_lon,
        distance_meters,
    )
    .await?
    {
        // A different token resolved the record between our read and this
        // write. Keep the consume: this token is burned either way.
        txn.commit().await?;
        return Ok(VerificationOutcome::rejected(
            &token,
            ConfirmReason::RecordNotPending,
        ));
    }

    txn.commit().await?;

    let outcome = VerificationOutcome {
        accepted,
        distance_meters,
        reason: if accepted {
            ConfirmReason::Ok
        } else {
            ConfirmReason::TooFar
        },
        session_id: Some(token.session_id),
        subject_id: Some(token.subject_id),
    };

    // Best-effort; the transition above is already committed and a delivery
    // failure never propagates to the caller.
    notifier
        .verification_outcome(
            token.subject_id,
            token.session_id,
            &outcome,
            &outcome.human_message(),
        )
        .await;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::testing::{Delivery, RecordingNotifier};
    use crate::token_issuer::TOKEN_TTL_MINUTES;
    use chrono::Duration;
    use db::models::{attendance_session, reader, subject};
    use db::test_utils::setup_test_db;

    const READER_LAT: f64 = 14.5995;
    const READER_LON: f64 = 120.9842;

    struct Fixture {
        db: DatabaseConnection,
        session_id: i64,
        subject_id: i64,
        token: verification_token::Model,
        issued_at: DateTime<Utc>,
    }

    /// Latitude offset (degrees) that puts a point `meters` north of a
    /// reference, solved from the Haversine inverse for a pure meridian arc.
    fn meridian_offset_deg(meters: f64) -> f64 {
        (meters / geo::EARTH_RADIUS_M).to_degrees()
    }

    async fn fixture() -> Fixture {
        let db = setup_test_db().await;
        let r = reader::Model::create(&db, "rdr-7", "Room 4-1").await.unwrap();
        let session = attendance_session::Model::create(&db, r.id, "Lecture 12", true)
            .await
            .unwrap();
        let subj = subject::Model::create(&db, "04:11:22:33", "Sipho D.")
            .await
            .unwrap();

        let now = Utc::now();
        let token = verification_token::Model::create(
            &db,
            session.id,
            subj.id,
            READER_LAT,
            READER_LON,
            now,
            TOKEN_TTL_MINUTES,
        )
        .await
        .unwrap();
        attendance_record::Model::ensure_pending(&db, session.id, subj.id, now)
            .await
            .unwrap();

        Fixture {
            db,
            session_id: session.id,
            subject_id: subj.id,
            token,
            issued_at: now,
        }
    }

    async fn record_of(f: &Fixture) -> attendance_record::Model {
        attendance_record::Model::get_by_key(&f.db, f.session_id, f.subject_id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn token_of(f: &Fixture) -> verification_token::Model {
        verification_token::Model::find_by_token_id(&f.db, &f.token.id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn confirm_at_reader_position_is_accepted() {
        let f = fixture().await;
        let notifier = RecordingNotifier::default();

        let out = confirm(
            &f.db,
            &notifier,
            &f.token.id,
            READER_LAT,
            READER_LON,
            f.issued_at + Duration::minutes(1),
        )
        .await
        .unwrap();

        assert!(out.accepted);
        assert_eq!(out.reason, ConfirmReason::Ok);
        assert_eq!(out.distance_meters, 0.0);

        let rec = record_of(&f).await;
        assert_eq!(rec.status, Status::Present);
        assert_eq!(rec.distance_meters, Some(0.0));
        assert!(rec.confirmed_at.is_some());
        assert!(token_of(&f).await.consumed);

        match notifier.taken().as_slice() {
            [Delivery::Outcome {
                subject_id,
                session_id,
                reason,
                ..
            }] => {
                assert_eq!(*subject_id, f.subject_id);
                assert_eq!(*session_id, f.session_id);
                assert_eq!(*reason, ConfirmReason::Ok);
            }
            other => panic!("unexpected deliveries: {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirm_150_meters_away_marks_absent() {
        let f = fixture().await;
        let notifier = RecordingNotifier::default();

        let out = confirm(
            &f.db,
            &notifier,
            &f.token.id,
            READER_LAT + meridian_offset_deg(150.0),
            READER_LON,
            f.issued_at + Duration::minutes(1),
        )
        .await
        .unwrap();

        assert!(!out.accepted);
        assert_eq!(out.reason, ConfirmReason::TooFar);
        assert!((out.distance_meters - 150.0).abs() < 0.5, "{}", out.distance_meters);

        let rec = record_of(&f).await;
        assert_eq!(rec.status, Status::Absent);
        assert!(token_of(&f).await.consumed);
    }

    #[test]
    fn acceptance_radius_is_inclusive() {
        // The coordinate-level fixtures below bracket the radius at a
        // millimeter because the haversine of a nominal 100.000 m offset
        // rounds a few 1e-11 m past the radius at some latitudes; the literal
        // boundary is pinned here, on the computed distance.
        assert!(within_acceptance_radius(100.0));
        assert!(within_acceptance_radius(99.999));
        assert!(!within_acceptance_radius(100.001));
    }

    #[tokio::test]
    async fn acceptance_boundary_both_sides() {
        // just inside the radius
        let f = fixture().await;
        let notifier = RecordingNotifier::default();
        let out = confirm(
            &f.db,
            &notifier,
            &f.token.id,
            READER_LAT + meridian_offset_deg(99.999),
            READER_LON,
            f.issued_at,
        )
        .await
        .unwrap();
        assert!(out.accepted, "99.999 m must be accepted, got {}", out.distance_meters);
        assert_eq!(record_of(&f).await.status, Status::Present);

        // just outside
        let f = fixture().await;
        let out = confirm(
            &f.db,
            &notifier,
            &f.token.id,
            READER_LAT + meridian_offset_deg(100.001),
            READER_LON,
            f.issued_at,
        )
        .await
        .unwrap();
        assert!(!out.accepted, "100.001 m must be rejected, got {}", out.distance_meters);
        assert_eq!(record_of(&f).await.status, Status::Absent);
    }

    #[tokio::test]
    async fn expired_token_burns_but_leaves_record_pending() {
        let f = fixture().await;
        let notifier = RecordingNotifier::default();

        let out = confirm(
            &f.db,
            &notifier,
            &f.token.id,
            READER_LAT,
            READER_LON,
            f.issued_at + Duration::minutes(TOKEN_TTL_MINUTES + 1),
        )
        .await
        .unwrap();

        assert_eq!(out.reason, ConfirmReason::Expired);
        assert!(!out.accepted);

        // the record must be untouched by an expiry
        let rec = record_of(&f).await;
        assert_eq!(rec.status, Status::Pending);
        assert!(rec.confirmed_at.is_none());

        // but the token is no longer confirmable, even back in the window
        assert!(token_of(&f).await.consumed);
        let again = confirm(&f.db, &notifier, &f.token.id, READER_LAT, READER_LON, f.issued_at)
            .await
            .unwrap();
        assert_eq!(again.reason, ConfirmReason::AlreadyUsed);

        // expiry emits no outcome notification
        assert!(notifier.taken().is_empty());
    }

    #[tokio::test]
    async fn second_confirm_observes_already_used() {
        let f = fixture().await;
        let notifier = RecordingNotifier::default();
        let at = f.issued_at + Duration::minutes(1);

        let first = confirm(&f.db, &notifier, &f.token.id, READER_LAT, READER_LON, at)
            .await
            .unwrap();
        assert_eq!(first.reason, ConfirmReason::Ok);

        // resubmission is idempotent: the record keeps the first result
        let second = confirm(
            &f.db,
            &notifier,
            &f.token.id,
            READER_LAT + meridian_offset_deg(5000.0),
            READER_LON,
            at,
        )
        .await
        .unwrap();
        assert_eq!(second.reason, ConfirmReason::AlreadyUsed);
        assert!(!second.accepted);

        let rec = record_of(&f).await;
        assert_eq!(rec.status, Status::Present);
        assert_eq!(rec.distance_meters, Some(0.0));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let f = fixture().await;
        let notifier = RecordingNotifier::default();

        let out = confirm(
            &f.db,
            &notifier,
            "00000000000000000000000000000000",
            READER_LAT,
            READER_LON,
            f.issued_at,
        )
        .await
        .unwrap();
        assert_eq!(out.reason, ConfirmReason::NotFound);
        assert!(out.session_id.is_none());
        assert_eq!(record_of(&f).await.status, Status::Pending);
    }

    #[tokio::test]
    async fn racing_token_on_same_record_cannot_double_transition() {
        let f = fixture().await;
        let notifier = RecordingNotifier::default();
        let at = f.issued_at + Duration::minutes(1);

        // a second confirmable token for the same pair, created behind the
        // issuer's back the way a pre-guard deployment could have
        let rogue = verification_token::Model::create(
            &f.db,
            f.session_id,
            f.subject_id,
            READER_LAT,
            READER_LON,
            f.issued_at,
            TOKEN_TTL_MINUTES,
        )
        .await
        .unwrap();

        let first = confirm(&f.db, &notifier, &f.token.id, READER_LAT, READER_LON, at)
            .await
            .unwrap();
        assert_eq!(first.reason, ConfirmReason::Ok);

        let second = confirm(&f.db, &notifier, &rogue.id, READER_LAT, READER_LON, at)
            .await
            .unwrap();
        assert_eq!(second.reason, ConfirmReason::RecordNotPending);

        // the rogue token burned in the attempt
        let rogue_after = verification_token::Model::find_by_token_id(&f.db, &rogue.id)
            .await
            .unwrap()
            .unwrap();
        assert!(rogue_after.consumed);

        let rec = record_of(&f).await;
        assert_eq!(rec.status, Status::Present);
    }
}
