pub mod fs;

mod temp;

#[cfg(test)]
mod test;

use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use openlcs_common::hashing::Digests;
use std::{
    fmt::{Debug, Display, Formatter},
    future::Future,
};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

#[derive(Debug, thiserror::Error)]
pub enum StoreError<S: Debug, B: Debug> {
    #[error("stream error: {0:?}")]
    Stream(S),
    #[error("backend error: {0:?}")]
    Backend(#[source] B),
}

/// The key of a stored blob, the hex encoded SHA-256 digest of its content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid storage key: {0}")]
pub struct InvalidKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StorageKey {
    type Error = InvalidKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(value.to_ascii_lowercase()))
        } else {
            Err(InvalidKey(value))
        }
    }
}

impl TryFrom<&str> for StorageKey {
    type Error = InvalidKey;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct StorageResult {
    pub digests: Digests,
}

impl StorageResult {
    pub fn key(&self) -> StorageKey {
        StorageKey(self.digests.sha256_hex())
    }
}

pub trait StorageBackend {
    type Error: Debug;

    /// Store the content from a stream
    fn store<E, S>(
        &self,
        stream: S,
    ) -> impl Future<Output = Result<StorageResult, StoreError<E, Self::Error>>>
    where
        E: Debug,
        S: Stream<Item = Result<Bytes, E>>;

    /// Store the content from a reader
    fn store_reader<R>(
        &self,
        reader: R,
    ) -> impl Future<Output = Result<StorageResult, StoreError<std::io::Error, Self::Error>>>
    where
        R: AsyncRead,
    {
        async { self.store(ReaderStream::new(reader)).await }
    }

    /// Retrieve the content as a stream of bytes
    fn retrieve<'a>(
        &self,
        key: StorageKey,
    ) -> impl Future<Output = Result<Option<impl Stream<Item = Result<Bytes, Self::Error>> + 'a>, Self::Error>>;

    /// Retrieve the content as a byte buffer
    fn retrieve_buf(
        &self,
        key: StorageKey,
    ) -> impl Future<Output = Result<Option<Bytes>, Self::Error>> {
        async {
            Ok(match self.retrieve(key).await? {
                Some(stream) => Some(stream.try_collect::<BytesMut>().await?.freeze()),
                None => None,
            })
        }
    }

    /// Delete the content, succeeding if it doesn't exist
    fn delete(&self, key: StorageKey) -> impl Future<Output = Result<(), Self::Error>>;
}
