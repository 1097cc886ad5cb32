use sea_orm::entity::prelude::*;

/// A file having been scanned by a detector, independent of the result.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "file_scan")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub file_id: Uuid,
    pub detector: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::file::Entity",
        from = "Column::FileId",
        to = "super::file::Column::Id"
    )]
    File,
    #[sea_orm(has_many = "super::license_detection::Entity")]
    License,
    #[sea_orm(has_many = "super::copyright_detection::Entity")]
    Copyright,
}

impl Related<super::file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::File.def()
    }
}

impl Related<super::license_detection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::License.def()
    }
}

impl Related<super::copyright_detection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Copyright.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
