use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "subjects")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Identifier as presented by a proximity reader (RFID tag UID).
    pub tag_uid: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::attendance_record::Entity")]
    Records,
    #[sea_orm(has_many = "super::verification_token::Entity")]
    Tokens,
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
    pub async fn create(
        db: &DatabaseConnection,
        tag_uid: &str,
        display_name: &str,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            tag_uid: Set(tag_uid.to_owned()),
            display_name: Set(display_name.to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_tag_uid(
        db: &DatabaseConnection,
        tag_uid: &str,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::TagUid.eq(tag_uid))
            .one(db)
            .await
    }
}
