use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "source")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    /// SHA-256 of the compressed source archive
    #[sea_orm(unique)]
    pub checksum: String,
    pub archive_type: String,
    pub name: String,
    /// detectors which completed against all files of this source
    pub scan_flag: String,
    pub created: time::OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::path::Entity")]
    Path,
    #[sea_orm(has_one = "super::component::Entity")]
    Component,
}

impl Related<super::path::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Path.def()
    }
}

impl Related<super::component::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Component.def()
    }
}

impl Related<super::file::Entity> for Entity {
    fn to() -> RelationDef {
        super::path::Relation::File.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::path::Relation::Source.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
