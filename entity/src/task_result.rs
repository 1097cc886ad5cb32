use sea_orm::entity::prelude::*;

/// The broker owned state of a task execution.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "task_result")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub execution_id: Uuid,
    pub task_name: String,
    /// the positional arguments of the task
    pub args: serde_json::Value,
    /// the keyword arguments of the task
    pub kwargs: serde_json::Value,
    pub status: Status,
    pub queue: String,
    pub priority: Option<i32>,
    pub attempt: i32,
    /// the job must not be picked up before this point in time
    pub not_before: time::OffsetDateTime,
    pub last_change: time::OffsetDateTime,
    pub date_done: Option<time::OffsetDateTime>,
    pub error: Option<String>,
    pub report: Option<serde_json::Value>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "RECEIVED")]
    Received,
    #[sea_orm(string_value = "RUNNING")]
    Running,
    #[sea_orm(string_value = "RETRY")]
    Retry,
    #[sea_orm(string_value = "SUCCESS")]
    Success,
    #[sea_orm(string_value = "FAILURE")]
    Failure,
    /// a duplicate submission, suppressed by the identity lock
    #[sea_orm(string_value = "SKIPPED")]
    Skipped,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Skipped)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_names() {
        assert_eq!(Status::Pending.to_string(), "PENDING");
        assert_eq!(Status::from_str("SKIPPED").ok(), Some(Status::Skipped));
        assert!(Status::Failure.is_terminal());
        assert!(!Status::Retry.is_terminal());
    }
}
