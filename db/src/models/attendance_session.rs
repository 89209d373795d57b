use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "attendance_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub reader_id: i64,
    pub label: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::reader::Entity",
        from = "Column::ReaderId",
        to = "super::reader::Column::Id"
    )]
    Reader,
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
    #[sea_orm(has_many = "super::verification_token::Entity")]
    Tokens,
}

impl Related<super::reader::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reader.def()
    }
}

impl Related<super::attendance_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Records.def()
    }
}

impl Related<super::verification_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub async fn create(
        db: &DatabaseConnection,
        reader_id: i64,
        label: &str,
        active: bool,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            reader_id: Set(reader_id),
            label: Set(label.to_owned()),
            active: Set(active),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_session_id(
        db: &DatabaseConnection,
        id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    /// The session a check-in from this reader is currently collecting for.
    pub async fn find_active_for_reader(
        db: &DatabaseConnection,
        reader_id: i64,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::ReaderId.eq(reader_id))
            .filter(Column::Active.eq(true))
            .one(db)
            .await
    }
}
