//! A task broker, persisting its queues in the `task_result` table.

use crate::{queue::QueueParams, report::Report, Error};
use openlcs_common::db::Database;
use openlcs_entity::{task, task_result, task_result::Status};
use sea_orm::{
    prelude::*, sea_query::SimpleExpr, ActiveValue::Set, ConnectionTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// A task to be submitted.
#[derive(Clone, Debug)]
pub struct Submission {
    pub task_name: String,
    /// positional arguments
    pub args: serde_json::Value,
    /// keyword arguments
    pub kwargs: serde_json::Value,
    pub owner: String,
    pub parent_task_id: Option<Uuid>,
    pub queue: QueueParams,
}

/// A claimed job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub execution_id: Uuid,
    pub task_name: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub queue: String,
    /// the number of previous attempts
    pub attempt: u32,
}

impl From<task_result::Model> for Job {
    fn from(value: task_result::Model) -> Self {
        Self {
            execution_id: value.execution_id,
            task_name: value.task_name,
            args: value.args,
            kwargs: value.kwargs,
            queue: value.queue,
            attempt: value.attempt.max(0) as u32,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Broker {
    db: Database,
    /// name of the default queue
    base: String,
}

impl Broker {
    pub fn new(db: Database, base: impl Into<String>) -> Self {
        Self {
            db,
            base: base.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Submit a task, returning its execution id.
    ///
    /// The task is persisted right away, its outcome can be queried using [`Broker::status`].
    pub async fn submit(&self, submission: Submission) -> Result<Uuid, Error> {
        self.submit_as(Uuid::new_v4(), submission).await
    }

    /// Submit a task with an execution id chosen by the caller, like one which is known to the
    /// caller's scratch space already.
    #[instrument(skip(self, submission), fields(task_name = %submission.task_name), err)]
    pub async fn submit_as(&self, execution_id: Uuid, submission: Submission) -> Result<Uuid, Error> {
        let now = OffsetDateTime::now_utc();

        let tx = self.db.begin().await?;

        task_result::ActiveModel {
            execution_id: Set(execution_id),
            task_name: Set(submission.task_name.clone()),
            args: Set(submission.args.clone()),
            kwargs: Set(submission.kwargs),
            status: Set(Status::Pending),
            queue: Set(submission.queue.queue_name(&self.base).to_string()),
            priority: Set(submission.queue.priority),
            attempt: Set(0),
            not_before: Set(now),
            last_change: Set(now),
            date_done: Set(None),
            error: Set(None),
            report: Set(None),
        }
        .insert(&tx)
        .await?;

        task::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner: Set(submission.owner),
            execution_id: Set(execution_id),
            task_name: Set(submission.task_name),
            params: Set(submission.args),
            parent_task_id: Set(submission.parent_task_id),
            source_id: Set(None),
            component_id: Set(None),
            created: Set(now),
        }
        .insert(&tx)
        .await?;

        tx.commit().await?;

        log::info!("submitted task {execution_id}");

        Ok(execution_id)
    }

    /// Claim the next due job of a queue.
    ///
    /// Competing workers may pick the same candidate. Only one of them will succeed in moving it
    /// to [`Status::Received`], the others try the next candidate.
    pub async fn claim(&self, queue: &str) -> Result<Option<Job>, Error> {
        let now = OffsetDateTime::now_utc();

        let candidates = task_result::Entity::find()
            .filter(task_result::Column::Queue.eq(queue))
            .filter(task_result::Column::Status.is_in([Status::Pending, Status::Retry]))
            .filter(task_result::Column::NotBefore.lte(now))
            .order_by_asc(task_result::Column::NotBefore)
            .order_by_asc(task_result::Column::LastChange)
            .limit(8)
            .all(&self.db)
            .await?;

        for candidate in candidates {
            let claimed = self
                .transition(
                    &self.db,
                    candidate.execution_id,
                    &[candidate.status],
                    vec![(
                        task_result::Column::Status,
                        Expr::value(Status::Received),
                    )],
                )
                .await?;

            if claimed {
                log::debug!("claimed {} from {queue}", candidate.execution_id);
                return Ok(Some(candidate.into()));
            }
        }

        Ok(None)
    }

    pub async fn start(&self, execution_id: Uuid) -> Result<(), Error> {
        self.expect_transition(
            execution_id,
            &[Status::Received],
            vec![(task_result::Column::Status, Expr::value(Status::Running))],
        )
        .await
    }

    /// Record the final state of a job.
    #[instrument(skip(self, report), err)]
    pub async fn finish(
        &self,
        execution_id: Uuid,
        status: Status,
        error: Option<String>,
        report: Option<&Report>,
    ) -> Result<(), Error> {
        let report = report.map(serde_json::to_value).transpose()?;

        self.expect_transition(
            execution_id,
            &[Status::Received, Status::Running],
            vec![
                (task_result::Column::Status, Expr::value(status)),
                (
                    task_result::Column::DateDone,
                    Expr::value(Some(OffsetDateTime::now_utc())),
                ),
                (task_result::Column::Error, Expr::value(error)),
                (task_result::Column::Report, Expr::value(report)),
            ],
        )
        .await
    }

    /// Put a failed job back into its queue, due after `delay`.
    #[instrument(skip(self, report), err)]
    pub async fn retry(
        &self,
        execution_id: Uuid,
        attempt: u32,
        delay: Duration,
        error: String,
        report: Option<&Report>,
    ) -> Result<(), Error> {
        let report = report.map(serde_json::to_value).transpose()?;

        self.expect_transition(
            execution_id,
            &[Status::Received, Status::Running],
            vec![
                (task_result::Column::Status, Expr::value(Status::Retry)),
                (task_result::Column::Attempt, Expr::value(attempt as i32)),
                (
                    task_result::Column::NotBefore,
                    Expr::value(OffsetDateTime::now_utc() + delay),
                ),
                (task_result::Column::Error, Expr::value(Some(error))),
                (task_result::Column::Report, Expr::value(report)),
            ],
        )
        .await
    }

    /// Look up the state of a task.
    pub async fn status(&self, execution_id: Uuid) -> Result<Option<task_result::Model>, Error> {
        Ok(task_result::Entity::find_by_id(execution_id)
            .one(&self.db)
            .await?)
    }

    /// Reset all claimed or running jobs back into the queue.
    ///
    /// This is intended when the worker starts up, to recover jobs of a crashed worker.
    ///
    /// **NOTE:** we can only do this as we're intended to be a single-node worker.
    #[instrument(skip(self), err)]
    pub async fn reset_stale(&self) -> Result<u64, Error> {
        let result = task_result::Entity::update_many()
            .col_expr(task_result::Column::Status, Expr::value(Status::Pending))
            .col_expr(
                task_result::Column::LastChange,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(task_result::Column::Status.is_in([Status::Received, Status::Running]))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            log::info!(
                "Reset {} stale jobs during startup",
                result.rows_affected
            );
        }

        Ok(result.rows_affected)
    }

    async fn expect_transition(
        &self,
        execution_id: Uuid,
        from: &[Status],
        updates: Vec<(task_result::Column, SimpleExpr)>,
    ) -> Result<(), Error> {
        if self
            .transition(&self.db, execution_id, from, updates)
            .await?
        {
            return Ok(());
        }

        // now we need to figure out if the item wasn't there or if it was modified
        match self.status(execution_id).await? {
            None => Err(Error::NotFound(format!("task {execution_id}"))),
            Some(current) => Err(Error::IntegrityConflict(format!(
                "task {execution_id} is in state {}, expected one of {from:?}",
                current.status
            ))),
        }
    }

    /// Apply updates, only if the job is in one of the expected states.
    async fn transition<C>(
        &self,
        db: &C,
        execution_id: Uuid,
        from: &[Status],
        updates: Vec<(task_result::Column, SimpleExpr)>,
    ) -> Result<bool, Error>
    where
        C: ConnectionTrait,
    {
        let mut update = task_result::Entity::update_many()
            .col_expr(
                task_result::Column::LastChange,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(task_result::Column::ExecutionId.eq(execution_id))
            .filter(task_result::Column::Status.is_in(from.iter().copied()));

        for (col, expr) in updates {
            update = update.col_expr(col, expr);
        }

        let result = update.exec(db).await?;

        Ok(result.rows_affected == 1)
    }
}
