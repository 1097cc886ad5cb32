use openlcs_common::{db::DatabaseErrors, retry::RetryError};
use sea_orm::DbErr;
use std::fmt::Debug;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input, like an unknown priority or missing parameters
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A binary container build without a source container build
    #[error("no source container build found for: {0}")]
    MappingNotFound(String),
    /// A network or process failure, worth retrying
    #[error("transient i/o failure: {0}")]
    TransientIo(String),
    /// A retry budget ran out, or the task exceeded its time limit
    #[error("procedure timed out: {0}")]
    ProcedureTimeout(String),
    /// Concurrent imports kept colliding on a unique constraint
    #[error("integrity conflict: {0}")]
    IntegrityConflict(String),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

impl Error {
    /// Errors which must not cause the broker to re-run the task.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::NotFound(_)
                | Self::MappingNotFound(_)
                | Self::ProcedureTimeout(_)
                | Self::IntegrityConflict(_)
        )
    }

    /// Errors which may go away when the operation is repeated right away.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientIo(_) => true,
            Self::Http(err) => !err.status().is_some_and(|status| status.is_client_error()),
            _ => false,
        }
    }

    /// Errors caused by a concurrent write of the same data.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Database(DbErr::RecordNotUpdated) => true,
            Self::Database(err) => err.is_duplicate(),
            _ => false,
        }
    }

    /// Turn an exhausted retry of a transient operation into a [`Error::ProcedureTimeout`].
    pub fn from_transient(err: RetryError<Error>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => {
                Self::ProcedureTimeout(format!("giving up after {attempts} attempts: {last}"))
            }
            RetryError::Aborted(err) => err,
        }
    }

    /// Turn an exhausted retry of a conflicting write into a [`Error::IntegrityConflict`].
    pub fn from_conflict(err: RetryError<Error>) -> Self {
        match err {
            RetryError::Exhausted { attempts, last } => {
                Self::IntegrityConflict(format!("giving up after {attempts} attempts: {last}"))
            }
            RetryError::Aborted(err) => err,
        }
    }

    pub fn storage(err: impl Debug) -> Self {
        Self::Storage(format!("{err:?}"))
    }
}
