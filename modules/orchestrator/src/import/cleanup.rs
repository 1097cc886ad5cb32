use super::{ImportContext, ImportEnv, DOWNLOAD_DIR, UNPACK_DIR};
use crate::{workflow::Step, Error};
use std::{io::ErrorKind, path::Path};

async fn remove_dir(path: &Path) -> Result<(), Error> {
    match tokio::fs::remove_dir_all(path).await {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        result => Ok(result?),
    }
}

/// Remove the working directory, if nothing is left in it.
async fn remove_work_dir(context: &ImportContext) {
    if let Err(err) = tokio::fs::remove_dir(&context.work_dir).await {
        log::debug!("Keeping {}: {err}", context.work_dir.display());
    }
}

pub struct RemoveDownloads;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for RemoveDownloads {
    fn name(&self) -> &str {
        "remove_downloads"
    }

    async fn run(&self, context: &mut ImportContext, _: &ImportEnv) -> Result<(), Error> {
        remove_dir(&context.download_dir()).await?;
        remove_work_dir(context).await;
        Ok(())
    }
}

pub struct RemoveUnpacked;

#[async_trait::async_trait]
impl Step<ImportContext, ImportEnv> for RemoveUnpacked {
    fn name(&self) -> &str {
        "remove_unpacked"
    }

    async fn run(&self, context: &mut ImportContext, _: &ImportEnv) -> Result<(), Error> {
        remove_dir(&context.unpack_dir()).await?;
        remove_work_dir(context).await;
        Ok(())
    }
}

/// Clean up the working directory of an attempt, which may have been cancelled mid-way.
///
/// Staged archives survive until the last attempt.
pub(super) async fn remove_attempt(work_dir: &Path, last: bool) {
    let dirs = if last {
        vec![work_dir.to_path_buf()]
    } else {
        vec![work_dir.join(DOWNLOAD_DIR), work_dir.join(UNPACK_DIR)]
    };

    for dir in dirs {
        if let Err(err) = remove_dir(&dir).await {
            log::warn!("Failed to remove {}: {err}", dir.display());
        }
    }
}
