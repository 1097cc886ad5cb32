use crate::Error;
use openlcs_common::db::Database;
use openlcs_entity::task;
use sea_orm::{prelude::*, QueryFilter, QueryOrder};

/// The bookkeeping of submitted tasks, linking them to what they produced.
#[derive(Clone, Debug)]
pub struct TaskService {
    db: Database,
}

impl TaskService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn by_execution_id(&self, execution_id: Uuid) -> Result<Option<task::Model>, Error> {
        Ok(task::Entity::find()
            .filter(task::Column::ExecutionId.eq(execution_id))
            .one(&self.db)
            .await?)
    }

    /// The tasks forked by a task.
    pub async fn children(&self, task_id: Uuid) -> Result<Vec<task::Model>, Error> {
        Ok(task::Entity::find()
            .filter(task::Column::ParentTaskId.eq(task_id))
            .order_by_asc(task::Column::Created)
            .all(&self.db)
            .await?)
    }

    pub async fn link_source(&self, task_id: Uuid, source_id: Uuid) -> Result<(), Error> {
        task::Entity::update_many()
            .col_expr(task::Column::SourceId, Expr::value(source_id))
            .filter(task::Column::Id.eq(task_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn link_component(&self, task_id: Uuid, component_id: Uuid) -> Result<(), Error> {
        task::Entity::update_many()
            .col_expr(task::Column::ComponentId, Expr::value(component_id))
            .filter(task::Column::Id.eq(task_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}
