use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "license_detection")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub scan_id: Uuid,
    pub license_key: String,
    pub score: f64,
    pub start_line: i32,
    pub end_line: i32,
    pub false_positive: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::file_scan::Entity",
        from = "Column::ScanId",
        to = "super::file_scan::Column::Id"
    )]
    Scan,
}

impl Related<super::file_scan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Scan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
