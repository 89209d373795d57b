use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};

/// Durable outcome object per (session, subject). Created `pending` when a
/// token is issued; moved exactly once to `present` or `absent` by the
/// verification state machine.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub subject_id: i64,

    pub status: Status,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub confirmer_lat: Option<f64>,
    pub confirmer_lon: Option<f64>,
    pub distance_meters: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "present")]
    Present,
    #[sea_orm(string_value = "absent")]
    Absent,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::subject::Entity",
        from = "Column::SubjectId",
        to = "super::subject::Column::Id"
    )]
    Subject,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::subject::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subject.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn get_by_key<C>(
        db: &C,
        session_id: i64,
        subject_id: i64,
    ) -> Result<Option<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find_by_id((session_id, subject_id)).one(db).await
    }

    /// Creates the record in `pending` if the pair has none yet. An existing
    /// record is returned as-is; a resolved record is never reset to pending.
    pub async fn ensure_pending<C>(
        db: &C,
        session_id: i64,
        subject_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        if let Some(existing) = Self::get_by_key(db, session_id, subject_id).await? {
            return Ok(existing);
        }

        ActiveModel {
            session_id: Set(session_id),
            subject_id: Set(subject_id),
            status: Set(Status::Pending),
            confirmed_at: Set(None),
            confirmer_lat: Set(None),
            confirmer_lon: Set(None),
            distance_meters: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
    }

    /// Conditional `pending -> {present|absent}` transition.
    ///
    /// The update is filtered on `status = pending`, so a writer that lost the
    /// race observes `rows_affected == 0` and must not treat the record as its
    /// own. This is the store-level compare-and-swap that keeps concurrent
    /// confirmations from double-transitioning a record, even across service
    /// instances.
    ///
    /// Returns `true` iff this call performed the transition.
    pub async fn confirm_transition<C>(
        db: &C,
        session_id: i64,
        subject_id: i64,
        new_status: Status,
        confirmed_at: DateTime<Utc>,
        confirmer_lat: f64,
        confirmer_lon: f64,
        distance_meters: f64,
    ) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        debug_assert!(new_status != Status::Pending);

        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(new_status))
            .col_expr(Column::ConfirmedAt, Expr::value(Some(confirmed_at)))
            .col_expr(Column::ConfirmerLat, Expr::value(Some(confirmer_lat)))
            .col_expr(Column::ConfirmerLon, Expr::value(Some(confirmer_lon)))
            .col_expr(Column::DistanceMeters, Expr::value(Some(distance_meters)))
            .col_expr(Column::UpdatedAt, Expr::value(confirmed_at))
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::SubjectId.eq(subject_id))
            .filter(Column::Status.eq(Status::Pending))
            .exec(db)
            .await?;

        Ok(res.rows_affected == 1)
    }
}
