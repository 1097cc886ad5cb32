use crate::Error;
use futures::{stream, StreamExt, TryStreamExt};
use openlcs_common::retry::RetryPolicy;
use reqwest::StatusCode;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use url::Url;

/// The number of concurrent requests when fetching remote source metadata.
const CONCURRENT_FETCHES: usize = 5;

/// Downloads build artifacts into a scratch directory.
///
/// Besides `http` and `https`, `file` URLs are supported, for local mirrors of the build
/// system.
#[derive(Clone, Debug)]
pub struct Downloader {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl Downloader {
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Download a file into `dest`, keeping the file name of the URL.
    ///
    /// An existing file gets overwritten.
    #[instrument(skip(self, dest), fields(url = %url), err)]
    pub async fn download(&self, url: &Url, dest: &Path) -> Result<PathBuf, Error> {
        let name = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::Configuration(format!("no file name in URL: {url}")))?;
        let name = urlencoding::decode(name)
            .map_err(|err| Error::Configuration(format!("invalid file name in {url}: {err}")))?;
        if !is_plain_file_name(&name) {
            return Err(Error::Configuration(format!(
                "file name of {url} would leave the download directory: {name}"
            )));
        }

        tokio::fs::create_dir_all(dest).await?;
        let target = dest.join(name.as_ref());

        if url.scheme() == "file" {
            let source = url
                .to_file_path()
                .map_err(|()| Error::Configuration(format!("invalid file URL: {url}")))?;
            if !tokio::fs::try_exists(&source).await? {
                return Err(Error::NotFound(url.to_string()));
            }
            tokio::fs::copy(&source, &target).await?;
        } else {
            self.retry
                .run(Error::is_transient, || self.fetch(url, &target))
                .await
                .map_err(Error::from_transient)?;
        }

        log::info!("Downloaded {url} to {}", target.display());

        Ok(target)
    }

    async fn fetch(&self, url: &Url, target: &Path) -> Result<(), Error> {
        let response = self.client.get(url.clone()).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(url.to_string()));
        }
        let response = response.error_for_status()?;

        let partial = target.with_extension("partial");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            // a broken connection is worth another attempt
            let chunk = chunk.map_err(|err| Error::TransientIo(err.to_string()))?;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, target).await?;

        Ok(())
    }

    async fn fetch_json(&self, url: &Url) -> Result<Value, Error> {
        if url.scheme() == "file" {
            let source = url
                .to_file_path()
                .map_err(|()| Error::Configuration(format!("invalid file URL: {url}")))?;
            let data = match tokio::fs::read(&source).await {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::NotFound(url.to_string()))
                }
                result => result?,
            };
            return Ok(serde_json::from_slice(&data)?);
        }

        self.retry
            .run(Error::is_transient, || async move {
                Ok::<_, Error>(
                    self.client
                        .get(url.clone())
                        .send()
                        .await?
                        .error_for_status()?
                        .json::<Value>()
                        .await?,
                )
            })
            .await
            .map_err(Error::from_transient)
    }

    /// Fetch a number of JSON documents, with a limited number of concurrent requests.
    ///
    /// The result is in no particular order.
    #[instrument(skip_all, fields(urls = urls.len()), err)]
    pub async fn fetch_json_all(&self, urls: Vec<Url>) -> Result<Vec<Value>, Error> {
        stream::iter(urls)
            .map(|url| async move { self.fetch_json(&url).await })
            .buffer_unordered(CONCURRENT_FETCHES)
            .try_collect()
            .await
    }
}

/// A single, normal path component.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test(tokio::test)]
    async fn file_url() -> Result<(), anyhow::Error> {
        let mirror = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;

        let source = mirror.path().join("fio-3.1-2.el7.src.rpm");
        std::fs::write(&source, b"not really an rpm")?;

        let downloader = Downloader::new(Default::default(), RetryPolicy::none());
        let url = Url::from_file_path(&source).map_err(|()| anyhow::anyhow!("invalid path"))?;

        let target = downloader.download(&url, &scratch.path().join("download")).await?;
        assert_eq!(target.file_name().and_then(|n| n.to_str()), Some("fio-3.1-2.el7.src.rpm"));
        assert_eq!(std::fs::read(&target)?, b"not really an rpm");

        // missing files are not retried
        let missing = Url::from_file_path(mirror.path().join("missing.tar.gz"))
            .map_err(|()| anyhow::anyhow!("invalid path"))?;
        assert!(matches!(
            downloader.download(&missing, scratch.path()).await,
            Err(Error::NotFound(_))
        ));

        Ok(())
    }

    #[test(tokio::test)]
    async fn json_documents() -> Result<(), anyhow::Error> {
        let mirror = tempfile::tempdir()?;
        let mut urls = vec![];
        for n in 0..7 {
            let path = mirror.path().join(format!("remote-source-{n}.json"));
            std::fs::write(&path, format!(r#"{{"packages": [], "n": {n}}}"#))?;
            urls.push(Url::from_file_path(&path).map_err(|()| anyhow::anyhow!("invalid path"))?);
        }

        let downloader = Downloader::new(Default::default(), RetryPolicy::none());
        let mut documents = downloader
            .fetch_json_all(urls)
            .await?
            .into_iter()
            .filter_map(|document| document["n"].as_i64())
            .collect::<Vec<_>>();
        documents.sort();

        assert_eq!(documents, vec![0, 1, 2, 3, 4, 5, 6]);

        Ok(())
    }

    #[test(tokio::test)]
    async fn no_file_name() {
        let downloader = Downloader::new(Default::default(), RetryPolicy::none());
        let url = Url::parse("https://example.com/").expect("valid url");
        assert!(matches!(
            downloader.download(&url, Path::new("/tmp")).await,
            Err(Error::Configuration(_))
        ));
    }

    #[test(tokio::test)]
    async fn escaping_file_name() -> Result<(), anyhow::Error> {
        let scratch = tempfile::tempdir()?;
        let dest = scratch.path().join("download");

        let downloader = Downloader::new(Default::default(), RetryPolicy::none());
        for url in [
            "https://example.com/packages/..%2F..%2Fescaped.tar.gz",
            "https://example.com/packages/%2E%2E",
            "https://example.com/packages/fio%5C..%5Cescaped.tar.gz",
        ] {
            let url = Url::parse(url)?;
            let result = downloader.download(&url, &dest).await;
            assert!(matches!(result, Err(Error::Configuration(_))), "{url}: {result:?}");
        }

        assert!(!scratch.path().join("escaped.tar.gz").exists());

        Ok(())
    }

    #[rstest::rstest]
    #[case("fio-3.1.tar.gz", true)]
    #[case("fio 3.1.tar.gz", true)]
    #[case("..fio", true)]
    #[case("", false)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("../fio.tar.gz", false)]
    #[case("a\\b", false)]
    #[::core::prelude::v1::test]
    fn plain_file_names(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_plain_file_name(name), expected);
    }
}
