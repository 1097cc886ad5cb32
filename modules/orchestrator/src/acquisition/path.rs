use super::{Archive, BuildMetadata, BuildType, ScmRef};
use crate::Error;
use url::Url;

/// Where to get the sources of a build from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLocation {
    /// An archive, attached to the build
    Archive(Url),
    /// A revision of a repository
    Scm(ScmRef),
}

/// The directory of a build, below the top URL.
fn build_dir(top_url: &Url, build: &BuildMetadata) -> Result<Url, Error> {
    join(
        top_url,
        &[
            "packages",
            build.name.as_str(),
            build.version.as_str(),
            build.release.as_str(),
        ],
    )
}

fn join(base: &Url, segments: &[&str]) -> Result<Url, Error> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::Configuration(format!("not a base URL: {base}")))?
        .pop_if_empty()
        .extend(segments.iter().flat_map(|segment| segment.split('/')));
    Ok(url)
}

/// The download URL of an archive of a build.
pub fn archive_url(
    top_url: &Url,
    build: &BuildMetadata,
    build_type: BuildType,
    archive: &Archive,
) -> Result<Url, Error> {
    let dir = build_dir(top_url, build)?;

    match build_type {
        BuildType::Rpm | BuildType::Module => join(&dir, &["src", &archive.filename]),
        BuildType::Maven => {
            let (Some(group_id), Some(artifact_id), Some(version)) =
                (&archive.group_id, &archive.artifact_id, &archive.version)
            else {
                return Err(Error::Configuration(format!(
                    "maven archive without coordinates: {}",
                    archive.filename
                )));
            };
            join(
                &dir,
                &[
                    "maven",
                    &group_id.replace('.', "/"),
                    artifact_id,
                    version,
                    &archive.filename,
                ],
            )
        }
        BuildType::Win => match &archive.relpath {
            Some(relpath) if !relpath.is_empty() => {
                join(&dir, &["win", relpath, &archive.filename])
            }
            _ => join(&dir, &["win", &archive.filename]),
        },
        BuildType::Image => join(&dir, &["images", &archive.filename]),
    }
}

/// Pick the archive carrying the sources of a build.
pub fn source_archive(build_type: BuildType, archives: &[Archive]) -> Option<&Archive> {
    match build_type {
        BuildType::Rpm | BuildType::Module => archives
            .iter()
            .find(|archive| archive.arch.as_deref() == Some("src")),
        BuildType::Maven => archives.iter().find(|archive| {
            archive.filename.ends_with("-project-sources.tar.gz")
                || archive.filename.ends_with("-scm-sources.zip")
                || archive.filename.ends_with("-sources.zip")
        }),
        BuildType::Win => archives
            .iter()
            .find(|archive| matches!(archive.kind.as_str(), "zip" | "tar")),
        BuildType::Image => archives.iter().find(|archive| archive.kind == "tar"),
    }
}

/// Find where to fetch the sources of a build from.
///
/// Attached source archives are preferred. Builds without them fall back to the SCM reference
/// they were built from.
pub fn locate_source(
    top_url: &Url,
    build: &BuildMetadata,
    build_type: BuildType,
    archives: &[Archive],
) -> Result<SourceLocation, Error> {
    if let Some(archive) = source_archive(build_type, archives) {
        return Ok(SourceLocation::Archive(archive_url(
            top_url, build, build_type, archive,
        )?));
    }

    match &build.source {
        Some(source) => Ok(SourceLocation::Scm(source.parse()?)),
        None => Err(Error::NotFound(format!(
            "no source archive or SCM reference for build: {}",
            build.nvr
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::acquisition::test::build;
    use rstest::rstest;

    fn top() -> Url {
        Url::parse("https://download.example.com/brewroot/").expect("valid url")
    }

    fn archive(filename: &str, kind: &str, arch: Option<&str>) -> Archive {
        Archive {
            filename: filename.into(),
            kind: kind.into(),
            arch: arch.map(Into::into),
            ..Default::default()
        }
    }

    #[test]
    fn rpm() -> Result<(), Error> {
        let build = build("fio-3.1-2.el7", None);
        let archives = [
            archive("fio-3.1-2.el7.x86_64.rpm", "rpm", Some("x86_64")),
            archive("fio-3.1-2.el7.src.rpm", "rpm", Some("src")),
        ];

        assert_eq!(
            locate_source(&top(), &build, BuildType::Rpm, &archives)?,
            SourceLocation::Archive(Url::parse(
                "https://download.example.com/brewroot/packages/fio/3.1/2.el7/src/fio-3.1-2.el7.src.rpm"
            ).expect("valid url"))
        );

        Ok(())
    }

    #[test]
    fn maven() -> Result<(), Error> {
        let build = build("demo-1.0-1", None);
        let archive = Archive {
            filename: "demo-1.0-project-sources.tar.gz".into(),
            kind: "tar".into(),
            group_id: Some("org.example.demo".into()),
            artifact_id: Some("demo".into()),
            version: Some("1.0".into()),
            ..Default::default()
        };

        assert_eq!(
            archive_url(&top(), &build, BuildType::Maven, &archive)?.as_str(),
            "https://download.example.com/brewroot/packages/demo/1.0/1/maven/org/example/demo/demo/1.0/demo-1.0-project-sources.tar.gz"
        );

        Ok(())
    }

    #[rstest]
    #[case(BuildType::Win, Some("x64/release"), "https://download.example.com/brewroot/packages/demo/1.0/1/win/x64/release/demo.zip")]
    #[case(BuildType::Win, None, "https://download.example.com/brewroot/packages/demo/1.0/1/win/demo.zip")]
    #[case(BuildType::Image, None, "https://download.example.com/brewroot/packages/demo/1.0/1/images/demo.zip")]
    fn layouts(
        #[case] build_type: BuildType,
        #[case] relpath: Option<&str>,
        #[case] expected: &str,
    ) -> Result<(), Error> {
        let archive = Archive {
            filename: "demo.zip".into(),
            kind: "zip".into(),
            relpath: relpath.map(Into::into),
            ..Default::default()
        };

        assert_eq!(
            archive_url(&top(), &build("demo-1.0-1", None), build_type, &archive)?.as_str(),
            expected
        );

        Ok(())
    }

    #[test]
    fn scm_fallback() -> Result<(), Error> {
        let mut build = build("demo-1.0-1", None);
        build.source = Some("git+https://git.example.com/demo.git#v1.0".into());

        assert_eq!(
            locate_source(&top(), &build, BuildType::Module, &[])?,
            SourceLocation::Scm(ScmRef {
                url: "https://git.example.com/demo.git".into(),
                reference: "v1.0".into(),
            })
        );

        build.source = None;
        assert!(matches!(
            locate_source(&top(), &build, BuildType::Module, &[]),
            Err(Error::NotFound(_))
        ));

        Ok(())
    }
}
