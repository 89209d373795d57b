use chrono::{DateTime, Duration, Utc};
use sea_orm::ConnectionTrait;
use sea_orm::IntoActiveModel;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use serde::{Deserialize, Serialize};

/// Single-use credential binding a (session, subject) pair to the reader's
/// coordinates at issue time and a fixed expiry. Never deleted; kept for audit
/// and simply ignored once consumed or expired.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "verification_tokens")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub session_id: i64,
    pub subject_id: i64,
    /// Reader position snapshotted at issue time, not re-read later.
    pub reader_lat: f64,
    pub reader_lon: f64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::attendance_session::Entity",
        from = "Column::SessionId",
        to = "super::attendance_session::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::subject::Entity",
        from = "Column::SubjectId",
        to = "super::subject::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
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

/// 128 bits from the OS RNG, hex-encoded. Token ids must not be guessable or
/// sequential.
fn generate_token_id() -> String {
    use rand::RngCore;
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

impl Model {
    pub fn new(
        session_id: i64,
        subject_id: i64,
        reader_lat: f64,
        reader_lon: f64,
        now: DateTime<Utc>,
        expiry_minutes: i64,
    ) -> Self {
        Self {
            id: generate_token_id(),
            session_id,
            subject_id,
            reader_lat,
            reader_lon,
            issued_at: now,
            expires_at: now + Duration::minutes(expiry_minutes),
            consumed: false,
        }
    }

    pub async fn create<C>(
        db: &C,
        session_id: i64,
        subject_id: i64,
        reader_lat: f64,
        reader_lon: f64,
        now: DateTime<Utc>,
        expiry_minutes: i64,
    ) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let model = Self::new(
            session_id,
            subject_id,
            reader_lat,
            reader_lon,
            now,
            expiry_minutes,
        );
        model.into_active_model().insert(db).await
    }

    pub async fn find_by_token_id<C>(db: &C, id: &str) -> Result<Option<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find_by_id(id.to_owned()).one(db).await
    }

    /// The unconsumed, unexpired token for a (session, subject) pair, if one
    /// is outstanding. Backs the duplicate-issue guard.
    pub async fn find_active_for<C>(
        db: &C,
        session_id: i64,
        subject_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, DbErr>
    where
        C: ConnectionTrait,
    {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .filter(Column::SubjectId.eq(subject_id))
            .filter(Column::Consumed.eq(false))
            .filter(Column::ExpiresAt.gt(now))
            .one(db)
            .await
    }

    /// Conditional single-use write: flips `consumed` only if it is still
    /// false. Two confirmations racing on the same token cannot both see
    /// `rows_affected == 1`, regardless of which service instance they hit.
    ///
    /// Returns `true` iff this call consumed the token.
    pub async fn consume<C>(db: &C, id: &str) -> Result<bool, DbErr>
    where
        C: ConnectionTrait,
    {
        let res = Entity::update_many()
            .col_expr(Column::Consumed, Expr::value(true))
            .filter(Column::Id.eq(id))
            .filter(Column::Consumed.eq(false))
            .exec(db)
            .await?;

        Ok(res.rows_affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{attendance_session, reader, subject};
    use crate::test_utils::setup_test_db;

    async fn seed_pair(db: &sea_orm::DatabaseConnection) -> (i64, i64) {
        let r = reader::Model::create(db, "rdr-9", "Hall A").await.unwrap();
        let s = attendance_session::Model::create(db, r.id, "Practical 3", true)
            .await
            .unwrap();
        let u = subject::Model::create(db, "04:77:10:2C", "Pieter V.")
            .await
            .unwrap();
        (s.id, u.id)
    }

    #[test]
    fn token_ids_are_32_hex_chars_and_unique() {
        let a = generate_token_id();
        let b = generate_token_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn consume_succeeds_only_once() {
        let db = setup_test_db().await;
        let (sid, uid) = seed_pair(&db).await;
        let now = Utc::now();

        let tok = Model::create(&db, sid, uid, -25.7545, 28.2314, now, 5)
            .await
            .unwrap();
        assert!(!tok.consumed);
        assert_eq!(tok.expires_at - tok.issued_at, Duration::minutes(5));

        assert!(Model::consume(&db, &tok.id).await.unwrap());
        assert!(!Model::consume(&db, &tok.id).await.unwrap());

        let stored = Model::find_by_token_id(&db, &tok.id).await.unwrap().unwrap();
        assert!(stored.consumed);
    }

    #[tokio::test]
    async fn active_lookup_skips_consumed_and_expired() {
        let db = setup_test_db().await;
        let (sid, uid) = seed_pair(&db).await;
        let now = Utc::now();

        let tok = Model::create(&db, sid, uid, 0.0, 0.0, now, 5).await.unwrap();
        assert!(
            Model::find_active_for(&db, sid, uid, now)
                .await
                .unwrap()
                .is_some()
        );

        // past expiry
        assert!(
            Model::find_active_for(&db, sid, uid, now + Duration::minutes(6))
                .await
                .unwrap()
                .is_none()
        );

        Model::consume(&db, &tok.id).await.unwrap();
        assert!(
            Model::find_active_for(&db, sid, uid, now)
                .await
                .unwrap()
                .is_none()
        );
    }
}
