use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "task")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub owner: String,
    #[sea_orm(unique)]
    pub execution_id: Uuid,
    pub task_name: String,
    pub params: serde_json::Value,
    pub parent_task_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub component_id: Option<Uuid>,
    pub created: time::OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(belongs_to = "Entity", from = "Column::ParentTaskId", to = "Column::Id")]
    Parent,
    #[sea_orm(
        belongs_to = "super::task_result::Entity",
        from = "Column::ExecutionId",
        to = "super::task_result::Column::ExecutionId"
    )]
    Result,
    #[sea_orm(
        belongs_to = "super::source::Entity",
        from = "Column::SourceId",
        to = "super::source::Column::Id"
    )]
    Source,
    #[sea_orm(
        belongs_to = "super::component::Entity",
        from = "Column::ComponentId",
        to = "super::component::Column::Id"
    )]
    Component,
}

impl Related<super::task_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Result.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
