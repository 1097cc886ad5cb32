use ring::digest::{Context, Digest, SHA1_FOR_LEGACY_USE_ONLY, SHA256};
use std::{
    fmt::{Display, Formatter},
    io::{self, Read},
};
use tracing::instrument;

/// A reader, computing the SHA-256 digest of everything read through it.
pub struct HashingRead<R: Read> {
    inner: R,
    contexts: Contexts,
}

pub struct Contexts {
    sha256: Context,
    size: u64,
}

impl Contexts {
    pub fn new() -> Self {
        Self {
            sha256: Context::new(&SHA256),
            size: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.sha256.update(data);
        self.size += data.len() as u64;
    }

    pub fn digests(&self) -> Digests {
        Digests {
            sha256: self.sha256.clone().finish(),
            size: self.size,
        }
    }

    pub fn finish(self) -> Digests {
        Digests {
            sha256: self.sha256.finish(),
            size: self.size,
        }
    }
}

impl Default for Contexts {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct Digests {
    pub sha256: Digest,
    pub size: u64,
}

impl Digests {
    #[instrument(skip_all, fields(len=data.as_ref().len()))]
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        let mut contexts = Contexts::new();
        contexts.update(data.as_ref());
        contexts.finish()
    }

    /// The SHA-256 digest, hex encoded
    pub fn sha256_hex(&self) -> String {
        hex::encode(self.sha256.as_ref())
    }
}

impl<R: Read> HashingRead<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            contexts: Contexts::new(),
        }
    }

    /// Returns the current digests of the **data read so far**
    pub fn digests(&self) -> Digests {
        self.contexts.digests()
    }

    /// Finishes reading all data from the inner reader and returns the digests
    pub fn finish(mut self) -> io::Result<Digests> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(self.contexts.finish())
    }
}

impl<R: Read> Read for HashingRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.inner.read(buf)?;
        self.contexts.update(&buf[0..len]);
        Ok(len)
    }
}

/// A content identifier, in the form of a software heritage "content" identifier.
///
/// The hash is the git blob hash (`sha1("blob <len>\0" || content)`), so the same bytes yield
/// the same identifier, no matter where the file is located.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId(String);

impl ContentId {
    pub const PREFIX: &'static str = "swh:1:cnt:";

    /// Compute the identifier of `len` bytes provided by `reader`.
    ///
    /// The length must be known upfront, as it is part of the hashed header. If the reader
    /// provides a different number of bytes, an error is returned.
    pub fn from_reader(len: u64, mut reader: impl Read) -> io::Result<Self> {
        let mut context = Context::new(&SHA1_FOR_LEGACY_USE_ONLY);
        context.update(format!("blob {len}\0").as_bytes());

        let mut buf = [0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            context.update(&buf[..n]);
        }

        if total != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("content changed while hashing: expected {len} bytes, read {total}"),
            ));
        }

        Ok(Self::from_digest(context.finish()))
    }

    pub fn from_bytes(data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref();
        let mut context = Context::new(&SHA1_FOR_LEGACY_USE_ONLY);
        context.update(format!("blob {}\0", data.len()).as_bytes());
        context.update(data);
        Self::from_digest(context.finish())
    }

    fn from_digest(digest: Digest) -> Self {
        Self(format!("{}{}", Self::PREFIX, hex::encode(digest.as_ref())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.0
    }
}
