use crate::service::{StorageBackend, StorageKey, StorageResult, StoreError};
use anyhow::Context;
use bytes::Bytes;
use futures::Stream;
use std::{
    fmt::Debug,
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::pin,
};
use tempfile::{tempdir, TempDir};
use tokio::{
    fs::{create_dir_all, remove_file, rename, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;

use super::temp::TempFile;

/// A filesystem backed store for source archives
///
/// ## Layout
///
/// ```ignore
/// <base>/
///   content/
///     <digest[0..2]>/
///       <digest[2..4]>/
///         <digest> # file
/// ```
///
/// Two levels of prefix directories keep the number of entries per directory low.
#[derive(Clone, Debug)]
pub struct FileSystemBackend {
    content: PathBuf,
}

const NUM_LEVELS: usize = 2;

impl FileSystemBackend {
    pub async fn new(base: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base = base.into();
        let content = base.join("content");

        create_dir_all(&content).await.with_context(|| {
            format!(
                "unable to create 'content' directory in the file system base: {}",
                base.display()
            )
        })?;

        Ok(Self { content })
    }

    /// Create a new storage for testing
    pub async fn for_test() -> anyhow::Result<(Self, TempDir)> {
        let dir = tempdir()?;

        Self::new(dir.path()).await.map(|result| (result, dir))
    }

    /// Store the content of a local file
    pub async fn store_file(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<StorageResult, StoreError<std::io::Error, std::io::Error>> {
        let file = File::open(path).await.map_err(StoreError::Backend)?;
        self.store_reader(file).await
    }

    /// The location of the content on disk
    pub fn path_of(&self, key: &StorageKey) -> PathBuf {
        level_dir(&self.content, key.as_str(), NUM_LEVELS).join(key.as_str())
    }
}

impl StorageBackend for FileSystemBackend {
    type Error = std::io::Error;

    async fn store<E, S>(&self, stream: S) -> Result<StorageResult, StoreError<E, Self::Error>>
    where
        E: Debug,
        S: Stream<Item = Result<Bytes, E>>,
    {
        let stream = pin!(stream);
        let mut file = TempFile::new(stream).await?;
        let result = file.result();
        let key = result.key();

        let target = self.path_of(&key);
        if tokio::fs::try_exists(&target)
            .await
            .map_err(StoreError::Backend)?
        {
            log::debug!("content already present: {key}");
            return Ok(result);
        }

        let dir = level_dir(&self.content, key.as_str(), NUM_LEVELS);
        create_dir_all(&dir).await.map_err(StoreError::Backend)?;

        // write next to the target first, so that readers never see partial content
        let partial = dir.join(format!("{key}.partial"));
        let mut source = file.reader().await.map_err(StoreError::Backend)?;
        let mut out = File::create(&partial).await.map_err(StoreError::Backend)?;
        tokio::io::copy_buf(&mut source, &mut out)
            .await
            .map_err(StoreError::Backend)?;
        out.flush().await.map_err(StoreError::Backend)?;
        drop(out);

        rename(&partial, &target)
            .await
            .map_err(StoreError::Backend)?;

        Ok(result)
    }

    async fn retrieve<'a>(
        &self,
        key: StorageKey,
    ) -> Result<Option<impl Stream<Item = Result<Bytes, Self::Error>> + 'a>, Self::Error> {
        let target = self.path_of(&key);

        log::debug!("Opening file: {}", target.display());

        let file = match File::open(&target).await {
            Ok(file) => Some(file),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };

        Ok(file.map(ReaderStream::new))
    }

    async fn delete(&self, key: StorageKey) -> Result<(), Self::Error> {
        match remove_file(self.path_of(&key)).await {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

fn level_dir(base: impl AsRef<Path>, hash: &str, levels: usize) -> PathBuf {
    let prefixes = hash
        .chars()
        .take(levels * 2)
        .collect::<Vec<char>>()
        .chunks(2)
        .map(|chunk| chunk.iter().collect())
        .collect::<Vec<String>>();

    let mut path = base.as_ref().to_path_buf();

    for prefix in prefixes {
        path = path.join(prefix);
    }

    path
}
