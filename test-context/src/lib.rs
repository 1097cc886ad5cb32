#![allow(clippy::expect_used)]

use flate2::{write::GzEncoder, Compression};
use openlcs_common::{config, db::Database};
use openlcs_module_storage::service::fs::FileSystemBackend;
use std::{
    env,
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use test_context::AsyncTestContext;
use tracing::instrument;

pub struct LcsContext {
    pub db: Database,
    pub storage: FileSystemBackend,
    /// a scratch directory, removed on teardown
    pub scratch: PathBuf,
    // the temporary directories live as long as the context
    _db_dir: Option<TempDir>,
    _storage_dir: TempDir,
    _scratch_dir: TempDir,
}

impl LcsContext {
    async fn new(db: Database, db_dir: Option<TempDir>) -> Self {
        let (storage, storage_dir) = FileSystemBackend::for_test()
            .await
            .expect("initializing the storage backend");
        let scratch_dir = tempfile::tempdir().expect("creating the scratch directory");

        Self {
            db,
            storage,
            scratch: scratch_dir.path().to_path_buf(),
            _db_dir: db_dir,
            _storage_dir: storage_dir,
            _scratch_dir: scratch_dir,
        }
    }

    /// Create a gzip compressed tarball in the scratch directory, containing the files.
    ///
    /// The file names are relative to the root of the archive.
    pub fn tarball<'a>(
        &self,
        name: &str,
        files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<PathBuf, anyhow::Error> {
        let path = self.scratch.join(name);
        write_tarball(&path, files)?;
        Ok(path)
    }
}

/// Write a gzip compressed tarball of the files.
pub fn write_tarball<'a>(
    path: &Path,
    files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
) -> Result<(), anyhow::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(path)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content)?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

impl AsyncTestContext for LcsContext {
    #[instrument]
    async fn setup() -> LcsContext {
        if env::var("EXTERNAL_TEST_DB").is_ok() {
            log::warn!("Using external database from 'OPENLCS_DB_*' env vars");
            let config = config::Database::from_env().expect("DB config from env");
            let db = Database::connect_and_migrate(&config)
                .await
                .expect("Configuring the database");

            return LcsContext::new(db, None).await;
        }

        let dir = tempfile::tempdir().expect("creating the database directory");
        let config = config::Database::sqlite(dir.path().join("openlcs.db").display());
        let db = Database::connect_and_migrate(&config)
            .await
            .expect("Create a test database");

        LcsContext::new(db, Some(dir)).await
    }

    async fn teardown(self) {
        if let Err(err) = self.db.close().await {
            log::warn!("Failed to close the test database: {err}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_context::test_context;
    use test_log::test;

    #[test_context(LcsContext)]
    #[test(tokio::test)]
    async fn setup_migrates(ctx: &LcsContext) -> Result<(), anyhow::Error> {
        ctx.db.ping().await?;

        let archive = ctx.tarball("fio-3.1.tar.gz", [("fio-3.1/README", &b"fio"[..])])?;
        let stored = ctx.storage.store_file(&archive).await?;
        assert_eq!(stored.digests.size, archive.metadata()?.len());

        Ok(())
    }
}
