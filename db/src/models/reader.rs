use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "readers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Stable device identifier the reader sends with every check-in.
    pub identifier: String,
    /// Human-readable placement, e.g. a classroom name.
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::attendance_session::Entity")]
    Sessions,
}

impl Related<super::attendance_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        identifier: &str,
        label: &str,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            identifier: Set(identifier.to_owned()),
            label: Set(label.to_owned()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn find_by_identifier(
        db: &DatabaseConnection,
        identifier: &str,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::Identifier.eq(identifier))
            .one(db)
            .await
    }
}
