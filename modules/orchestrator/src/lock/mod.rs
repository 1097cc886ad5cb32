//! Identity locks, preventing the same task from running twice at the same time.
//!
//! A lock is a lease in the `task_lock` table, keyed by a fingerprint of the task name and its
//! arguments. A crashed worker doesn't block the fingerprint forever, as an expired lease can be
//! taken over by the next caller.

mod fingerprint;

pub use fingerprint::*;

use crate::Error;
use openlcs_common::db::{Database, DatabaseErrors};
use openlcs_entity::task_lock;
use sea_orm::{prelude::*, ActiveValue::Set, QueryFilter, QueryOrder};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// A held identity lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lock {
    pub key: String,
    /// identifies this acquisition, a takeover replaces it
    pub token: Uuid,
    /// end of the lease, in milliseconds since the unix epoch
    pub expires_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired(Lock),
    /// Somebody else holds a live lease for the same fingerprint
    Blocked { key: String },
}

#[derive(Clone, Debug)]
pub struct TaskLocks {
    db: Database,
    prefix: String,
    lease: Duration,
}

impl TaskLocks {
    pub fn new(db: Database, prefix: impl Into<String>, lease: Duration) -> Self {
        Self {
            db,
            prefix: prefix.into(),
            lease,
        }
    }

    pub fn key(
        &self,
        task_name: &str,
        args: &serde_json::Value,
        kwargs: &serde_json::Value,
    ) -> String {
        fingerprint(&self.prefix, task_name, args, kwargs)
    }

    /// Try to acquire the lock for a task invocation.
    #[instrument(skip(self, args, kwargs), err)]
    pub async fn acquire(
        &self,
        task_name: &str,
        args: &serde_json::Value,
        kwargs: &serde_json::Value,
    ) -> Result<LockOutcome, Error> {
        let key = self.key(task_name, args, kwargs);
        self.try_acquire(task_name, key).await
    }

    /// Try to acquire a lock by its key.
    pub async fn try_acquire(&self, task_name: &str, key: String) -> Result<LockOutcome, Error> {
        let now = now_millis();
        let token = Uuid::new_v4();
        let expires_at = now + self.lease.as_millis() as i64;

        let model = task_lock::ActiveModel {
            key: Set(key.clone()),
            token: Set(token),
            expires_at: Set(expires_at),
            task_name: Set(task_name.to_string()),
            created: Set(OffsetDateTime::now_utc()),
        };

        match task_lock::Entity::insert(model).exec(&self.db).await {
            Ok(_) => {
                log::debug!("acquired lock {key}");
                return Ok(LockOutcome::Acquired(Lock {
                    key,
                    token,
                    expires_at,
                }));
            }
            Err(err) if err.is_duplicate() => {}
            Err(err) => return Err(err.into()),
        }

        // the key exists, take it over if the lease has expired. The filter makes sure
        // only one of several competing callers wins.

        let result = task_lock::Entity::update_many()
            .col_expr(task_lock::Column::Token, Expr::value(token))
            .col_expr(task_lock::Column::ExpiresAt, Expr::value(expires_at))
            .col_expr(task_lock::Column::TaskName, Expr::value(task_name))
            .col_expr(
                task_lock::Column::Created,
                Expr::value(OffsetDateTime::now_utc()),
            )
            .filter(task_lock::Column::Key.eq(&key))
            .filter(task_lock::Column::ExpiresAt.lt(now))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 1 {
            log::info!("took over expired lock {key}");
            Ok(LockOutcome::Acquired(Lock {
                key,
                token,
                expires_at,
            }))
        } else {
            log::debug!("lock {key} is held");
            Ok(LockOutcome::Blocked { key })
        }
    }

    /// Release a lock, no matter who is holding it.
    ///
    /// The holder isn't verified. If the lease expired and got taken over, this releases the
    /// lock of the new holder. Returns `true` if a lock was removed.
    #[instrument(skip(self), err)]
    pub async fn release(&self, key: &str) -> Result<bool, Error> {
        let result = task_lock::Entity::delete_by_id(key.to_string())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// List all locks under our prefix.
    pub async fn list(&self) -> Result<Vec<task_lock::Model>, Error> {
        Ok(task_lock::Entity::find()
            .filter(task_lock::Column::Key.starts_with(&self.prefix))
            .order_by_asc(task_lock::Column::Created)
            .all(&self.db)
            .await?)
    }

    /// Remove all locks under our prefix, returning the number of removed locks.
    ///
    /// Intended for recovering from crashed workers.
    #[instrument(skip(self), err)]
    pub async fn clear(&self) -> Result<u64, Error> {
        let result = task_lock::Entity::delete_many()
            .filter(task_lock::Column::Key.starts_with(&self.prefix))
            .exec(&self.db)
            .await?;

        log::info!("cleared {} locks", result.rows_affected);

        Ok(result.rows_affected)
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod test {
    use super::*;
    use openlcs_test_context::LcsContext;
    use serde_json::json;
    use test_context::test_context;
    use test_log::test;

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn acquire_block_release(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let locks = TaskLocks::new(ctx.db.clone(), "test:", Duration::from_secs(60));
        let args = json!([{"nvr": "fio-3.1-2.el7"}]);
        let kwargs = json!({});

        let LockOutcome::Acquired(lock) = locks.acquire("import", &args, &kwargs).await? else {
            panic!("first acquire must succeed");
        };
        assert!(lock.key.starts_with("test:"));

        assert_eq!(
            locks.acquire("import", &args, &kwargs).await?,
            LockOutcome::Blocked {
                key: lock.key.clone()
            }
        );

        // different arguments are a different fingerprint
        assert!(matches!(
            locks
                .acquire("import", &json!([{"nvr": "fio-3.1-3.el7"}]), &kwargs)
                .await?,
            LockOutcome::Acquired(_)
        ));

        assert!(locks.release(&lock.key).await?);
        assert!(!locks.release(&lock.key).await?);

        assert!(matches!(
            locks.acquire("import", &args, &kwargs).await?,
            LockOutcome::Acquired(_)
        ));

        Ok(())
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn expired_lease_is_taken_over(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let short = TaskLocks::new(ctx.db.clone(), "test:", Duration::ZERO);
        let args = json!(["a"]);

        let LockOutcome::Acquired(first) = short.acquire("import", &args, &json!({})).await?
        else {
            panic!("first acquire must succeed");
        };

        tokio::time::sleep(Duration::from_millis(5)).await;

        let LockOutcome::Acquired(second) = short.acquire("import", &args, &json!({})).await?
        else {
            panic!("expired lease must be taken over");
        };

        assert_eq!(first.key, second.key);
        assert_ne!(first.token, second.token);

        Ok(())
    }

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn list_and_clear(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        let locks = TaskLocks::new(ctx.db.clone(), "test:", Duration::from_secs(60));
        let other = TaskLocks::new(ctx.db.clone(), "other:", Duration::from_secs(60));

        for n in 0..3 {
            locks.acquire("import", &json!([n]), &json!({})).await?;
        }
        other.acquire("import", &json!([0]), &json!({})).await?;

        assert_eq!(locks.list().await?.len(), 3);
        assert_eq!(locks.clear().await?, 3);
        assert!(locks.list().await?.is_empty());
        assert_eq!(other.list().await?.len(), 1);

        Ok(())
    }
}
