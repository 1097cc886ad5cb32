//! Resolving builds and fetching their sources.

mod download;
mod hub;
mod path;
mod scm;

pub use download::*;
pub use hub::*;
pub use path::*;
pub use scm::*;

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};
use url::Url;

/// The coordinates of a build, as provided by a submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvra: Option<String>,
}

/// A validated [`BuildQuery`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildSelector {
    Nvr(String),
    Latest { tag: String, package_name: String },
    Nvra(String),
}

impl BuildQuery {
    /// Check that exactly one way of identifying a build is present.
    pub fn selector(&self) -> Result<BuildSelector, Error> {
        let mut selectors = Vec::with_capacity(1);

        if let Some(nvr) = &self.nvr {
            selectors.push(BuildSelector::Nvr(nvr.clone()));
        }
        match (&self.tag, &self.package_name) {
            (Some(tag), Some(package_name)) => selectors.push(BuildSelector::Latest {
                tag: tag.clone(),
                package_name: package_name.clone(),
            }),
            (None, None) => {}
            _ => {
                return Err(Error::Configuration(
                    "'tag' and 'package_name' must be provided together".into(),
                ))
            }
        }
        if let Some(nvra) = &self.nvra {
            selectors.push(BuildSelector::Nvra(nvra.clone()));
        }

        match selectors.len() {
            0 => Err(Error::Configuration(
                "one of 'nvr', 'tag' and 'package_name', or 'nvra' is required".into(),
            )),
            1 => Ok(selectors.remove(0)),
            _ => Err(Error::Configuration(
                "only one of 'nvr', 'tag' and 'package_name', or 'nvra' may be provided".into(),
            )),
        }
    }
}

/// Build metadata, as returned by the build system.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildMetadata {
    #[serde(alias = "build_id")]
    pub id: i64,
    pub name: String,
    pub version: String,
    pub release: String,
    pub nvr: String,
    /// The SCM reference the build was created from
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub extra: Option<Value>,
}

impl BuildMetadata {
    fn extra(&self, pointer: &str) -> Option<&Value> {
        self.extra
            .as_ref()
            .and_then(|extra| extra.pointer(pointer))
            .filter(|value| !value.is_null())
    }

    /// The binary build this build provides the sources for, if it is a source container.
    pub fn sources_for_nvr(&self) -> Option<&str> {
        self.extra("/image/sources_for_nvr")
            .and_then(Value::as_str)
    }

    pub fn is_source_container(&self) -> bool {
        self.sources_for_nvr().is_some()
    }

    /// Locations of the remote source metadata of a container build.
    pub fn remote_source_urls(&self) -> Vec<Url> {
        let Some(Value::Array(sources)) = self.extra("/typeinfo/remote-sources") else {
            return vec![];
        };

        sources
            .iter()
            .filter_map(|source| source["url"].as_str())
            .filter_map(|url| match Url::parse(url) {
                Ok(url) => Some(url),
                Err(err) => {
                    log::warn!("Ignoring invalid remote source URL '{url}': {err}");
                    None
                }
            })
            .collect()
    }

    /// The maven coordinates of the build, if present.
    pub fn maven(&self) -> Option<MavenInfo> {
        self.extra("/typeinfo/maven")
            .or_else(|| self.extra("/maven"))
            .and_then(|maven| serde_json::from_value(maven.clone()).ok())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MavenInfo {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

/// A file attached to a build.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub filename: String,
    /// Archive type, like `tar`, `zip` or `rpm`
    #[serde(default, alias = "type_name")]
    pub kind: String,
    /// The architecture of RPMs, `src` for source RPMs
    #[serde(default)]
    pub arch: Option<String>,
    /// Directory of Windows build artifacts
    #[serde(default)]
    pub relpath: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub artifact_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Rpm,
    Maven,
    Win,
    Image,
    Module,
}

/// Detect the type of a build from its metadata.
pub fn get_build_type(build: &BuildMetadata) -> BuildType {
    if build.maven().is_some() {
        BuildType::Maven
    } else if build.extra("/typeinfo/win").is_some() {
        BuildType::Win
    } else if build.extra("/typeinfo/image").is_some() || build.extra("/image").is_some() {
        BuildType::Image
    } else if build.extra("/typeinfo/module").is_some() {
        BuildType::Module
    } else {
        BuildType::Rpm
    }
}

/// Access to the build system.
#[async_trait::async_trait]
pub trait BuildSystem: Send + Sync + Debug {
    async fn get_build(&self, nvr: &str) -> Result<Option<BuildMetadata>, Error>;

    /// Look up the build providing the RPM of the given name-version-release-arch.
    async fn get_rpm_build(&self, nvra: &str) -> Result<Option<BuildMetadata>, Error>;

    async fn get_latest_build(
        &self,
        tag: &str,
        package_name: &str,
    ) -> Result<Option<BuildMetadata>, Error>;

    async fn list_archives(
        &self,
        build: &BuildMetadata,
        build_type: BuildType,
    ) -> Result<Vec<Archive>, Error>;

    /// The most recent source container build for a binary container build.
    async fn get_latest_source_container_build(
        &self,
        binary_nvr: &str,
    ) -> Result<Option<BuildMetadata>, Error>;

    /// The base URL of build artifacts.
    fn top_url(&self) -> &Url;
}

/// Resolve the build matching a query.
pub async fn resolve_build(
    system: &dyn BuildSystem,
    query: &BuildQuery,
) -> Result<BuildMetadata, Error> {
    let selector = query.selector()?;

    let build = match &selector {
        BuildSelector::Nvr(nvr) => system.get_build(nvr).await?,
        BuildSelector::Latest { tag, package_name } => {
            system.get_latest_build(tag, package_name).await?
        }
        BuildSelector::Nvra(nvra) => system.get_rpm_build(nvra).await?,
    };

    build.ok_or_else(|| Error::NotFound(format!("no build matching {selector:?}")))
}

/// Resolve the source container build of a binary container build.
///
/// A build which is a source container itself is returned as it is. Otherwise, the source
/// container must point back at the binary build, or the mapping is considered missing.
pub async fn resolve_source_container(
    system: &dyn BuildSystem,
    build: &BuildMetadata,
) -> Result<BuildMetadata, Error> {
    if build.is_source_container() {
        return Ok(build.clone());
    }

    match system.get_latest_source_container_build(&build.nvr).await? {
        Some(source) if source.sources_for_nvr() == Some(build.nvr.as_str()) => Ok(source),
        Some(source) => {
            log::warn!(
                "Source container {} doesn't refer to {} (but {:?})",
                source.nvr,
                build.nvr,
                source.sources_for_nvr()
            );
            Err(Error::MappingNotFound(build.nvr.clone()))
        }
        None => Err(Error::MappingNotFound(build.nvr.clone())),
    }
}

/// Fetch the source of a build into `dest`, returning the path of the archive.
///
/// Archives are downloaded from the build system, builds from SCM get cloned and archived at
/// their pinned revision.
pub async fn download_build_source(
    system: &dyn BuildSystem,
    downloader: &Downloader,
    scm: &ScmFetcher,
    build: &BuildMetadata,
    build_type: BuildType,
    dest: &Path,
) -> Result<PathBuf, Error> {
    let archives = system.list_archives(build, build_type).await?;

    match locate_source(system.top_url(), build, build_type, &archives)? {
        SourceLocation::Archive(url) => downloader.download(&url, dest).await,
        SourceLocation::Scm(reference) => {
            tokio::fs::create_dir_all(dest).await?;
            scm.archive(&reference, dest).await
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    pub fn build(nvr: &str, extra: Option<Value>) -> BuildMetadata {
        let mut parts = nvr.rsplitn(3, '-');
        let release = parts.next().unwrap_or_default().to_string();
        let version = parts.next().unwrap_or_default().to_string();
        let name = parts.next().unwrap_or_default().to_string();
        BuildMetadata {
            id: 1,
            name,
            version,
            release,
            nvr: nvr.to_string(),
            source: None,
            extra,
        }
    }

    #[rstest]
    #[case(json!({"nvr": "fio-3.1-2.el7"}), Some(BuildSelector::Nvr("fio-3.1-2.el7".into())))]
    #[case(json!({"tag": "rhel-7", "package_name": "fio"}), Some(BuildSelector::Latest { tag: "rhel-7".into(), package_name: "fio".into() }))]
    #[case(json!({"nvra": "fio-3.1-2.el7.x86_64"}), Some(BuildSelector::Nvra("fio-3.1-2.el7.x86_64".into())))]
    #[case(json!({}), None)]
    #[case(json!({"tag": "rhel-7"}), None)]
    #[case(json!({"nvr": "fio-3.1-2.el7", "nvra": "fio-3.1-2.el7.x86_64"}), None)]
    fn selectors(#[case] query: Value, #[case] expected: Option<BuildSelector>) {
        let query: BuildQuery = serde_json::from_value(query).expect("valid query");
        match (query.selector(), expected) {
            (Ok(selector), Some(expected)) => assert_eq!(selector, expected),
            (Err(Error::Configuration(_)), None) => {}
            (result, expected) => panic!("unexpected: {result:?}, expected: {expected:?}"),
        }
    }

    #[rstest]
    #[case(None, BuildType::Rpm)]
    #[case(Some(json!({"typeinfo": {"maven": {"group_id": "org.example", "artifact_id": "demo", "version": "1.0"}}})), BuildType::Maven)]
    #[case(Some(json!({"maven": {"group_id": "org.example", "artifact_id": "demo", "version": "1.0"}})), BuildType::Maven)]
    #[case(Some(json!({"typeinfo": {"maven": null}})), BuildType::Rpm)]
    #[case(Some(json!({"typeinfo": {"win": {"platforms": ["w2k8"]}}})), BuildType::Win)]
    #[case(Some(json!({"typeinfo": {"image": {}}})), BuildType::Image)]
    #[case(Some(json!({"image": {"sources_for_nvr": "demo-1-1"}})), BuildType::Image)]
    #[case(Some(json!({"typeinfo": {"module": {"name": "demo"}}})), BuildType::Module)]
    fn build_types(#[case] extra: Option<Value>, #[case] expected: BuildType) {
        assert_eq!(get_build_type(&build("demo-1-1", extra)), expected);
    }

    #[test]
    fn remote_sources() {
        let build = build(
            "demo-container-1-1",
            Some(json!({"typeinfo": {"remote-sources": [
                {"name": "a", "url": "https://cachito.example.com/api/v1/requests/1"},
                {"name": "b", "url": "not a url"},
                {"name": "c"},
            ]}})),
        );

        assert_eq!(
            build.remote_source_urls(),
            vec![Url::parse("https://cachito.example.com/api/v1/requests/1").expect("valid url")]
        );
    }
}
