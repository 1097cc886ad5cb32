use bytes::Bytes;
use futures::{Stream, StreamExt};
use openlcs_common::hashing::Contexts;
use std::{fmt::Debug, io::SeekFrom};
use tempfile::tempfile;
use tokio::{
    fs::File,
    io::{AsyncBufRead, AsyncSeekExt, AsyncWriteExt, BufReader},
};

use super::{StorageResult, StoreError};

/// Writes the contents of a stream to a temporary file, hashing it on the way.
///
/// The digest is known only after the full content was received, so the content is buffered
/// here before being moved to its final location.
pub struct TempFile {
    file: File,
    result: StorageResult,
}

impl TempFile {
    pub async fn new<E, S>(stream: S) -> Result<Self, StoreError<E, std::io::Error>>
    where
        E: Debug,
        S: Stream<Item = Result<Bytes, E>> + Unpin,
    {
        let mut file = File::from_std(tempfile().map_err(StoreError::Backend)?);
        let mut contexts = Contexts::new();

        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(StoreError::Stream)?;
            contexts.update(&chunk);
            file.write_all(&chunk).await.map_err(StoreError::Backend)?;
        }
        file.flush().await.map_err(StoreError::Backend)?;

        Ok(Self {
            file,
            result: StorageResult {
                digests: contexts.finish(),
            },
        })
    }

    /// Return a clone of the temp file, positioned at its start
    pub async fn reader(&mut self) -> Result<impl AsyncBufRead + use<>, std::io::Error> {
        let mut file = self.file.try_clone().await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok(BufReader::new(file))
    }

    pub fn result(&self) -> StorageResult {
        self.result.clone()
    }
}
