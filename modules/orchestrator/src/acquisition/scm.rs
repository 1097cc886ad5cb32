use crate::Error;
use openlcs_common::retry::RetryPolicy;
use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::instrument;
use xshell::{cmd, Shell};

/// A reference into a repository, in the form of `<url>#<ref>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScmRef {
    pub url: String,
    pub reference: String,
}

impl FromStr for ScmRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("git+").unwrap_or(s);
        match s.rsplit_once('#') {
            Some((url, reference)) if !url.is_empty() && !reference.is_empty() => Ok(Self {
                url: url.to_string(),
                reference: reference.to_string(),
            }),
            _ => Err(Error::Configuration(format!(
                "SCM reference must have the form '<url>#<ref>': {s}"
            ))),
        }
    }
}

impl Display for ScmRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.url, self.reference)
    }
}

impl ScmRef {
    /// The name of the repository, taken from the last segment of the URL.
    pub fn name(&self) -> &str {
        let name = self
            .url
            .trim_end_matches('/')
            .rsplit(['/', ':'])
            .next()
            .unwrap_or_default();
        name.strip_suffix(".git").unwrap_or(name)
    }
}

/// A reference, pinned to something which doesn't move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Revision {
    Tag(String),
    Commit(String),
}

impl Revision {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Tag(tag) => tag,
            Self::Commit(commit) => commit,
        }
    }
}

fn is_commit_id(reference: &str) -> bool {
    reference.len() == 40 && reference.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Classify a reference, using the output of `git ls-remote`.
///
/// Only tags and full commit ids are accepted, as a branch may move between the build and the
/// time its sources get fetched.
pub fn classify(ls_remote: &str, reference: &str) -> Result<Revision, Error> {
    if is_commit_id(reference) {
        return Ok(Revision::Commit(reference.to_ascii_lowercase()));
    }

    let reference = reference
        .strip_prefix("refs/tags/")
        .or_else(|| reference.strip_prefix("refs/heads/"))
        .unwrap_or(reference);

    let mut branch = false;

    for line in ls_remote.lines() {
        let Some((_, name)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let name = name.trim();
        let name = name.strip_suffix("^{}").unwrap_or(name);

        if name.strip_prefix("refs/tags/") == Some(reference) {
            return Ok(Revision::Tag(reference.to_string()));
        }
        if name.strip_prefix("refs/heads/") == Some(reference) {
            branch = true;
        }
    }

    if branch {
        Err(Error::Configuration(format!(
            "'{reference}' is a branch, a tag or commit id is required"
        )))
    } else {
        Err(Error::NotFound(format!("unknown reference: {reference}")))
    }
}

/// Fetches sources from SCM repositories, using the `git` command.
#[derive(Clone, Debug, Default)]
pub struct ScmFetcher {
    retry: RetryPolicy,
}

impl ScmFetcher {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Resolve the revision of a reference.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, scm: &ScmRef) -> Result<Revision, Error> {
        let url = scm.url.clone();
        let output = self
            .retry
            .run(Error::is_transient, || {
                let url = url.clone();
                git(move |sh| Ok(cmd!(sh, "git ls-remote {url}").read()?))
            })
            .await
            .map_err(Error::from_transient)?;

        classify(&output, &scm.reference)
    }

    /// Create a `tar.gz` archive of a reference in `dest`, returning the path to the archive.
    ///
    /// The repository gets fully cloned. A shallow clone may lead to a different archive than
    /// the one of the build system.
    #[instrument(skip(self, dest), err)]
    pub async fn archive(&self, scm: &ScmRef, dest: &Path) -> Result<PathBuf, Error> {
        let revision = self.resolve(scm).await?;

        let name = scm.name().to_string();
        let clone = dest.join(format!("{name}.git"));
        let output = dest.join(format!("{name}-{}.tar.gz", revision.as_str()));

        let url = scm.url.clone();
        self.retry
            .run(Error::is_transient, || {
                let url = url.clone();
                let clone = clone.clone();
                git(move |sh| {
                    if clone.exists() {
                        std::fs::remove_dir_all(&clone)?;
                    }
                    cmd!(sh, "git clone --quiet --no-checkout {url} {clone}").run()?;
                    Ok(())
                })
            })
            .await
            .map_err(Error::from_transient)?;

        let rev = revision.as_str().to_string();
        let prefix = format!("{name}/");
        let archive = output.clone();
        let clone_dir = clone.clone();
        git(move |sh| {
            cmd!(
                sh,
                "git -C {clone_dir} archive --format=tar.gz --prefix {prefix} -o {archive} {rev}"
            )
            .run()?;
            Ok(())
        })
        .await
        .map_err(|err| match err {
            Error::TransientIo(msg) => Error::NotFound(format!("failed to archive {scm}: {msg}")),
            err => err,
        })?;

        tokio::fs::remove_dir_all(&clone).await?;

        log::info!("Archived {scm} as {}", output.display());

        Ok(output)
    }
}

/// Run git commands on the blocking pool, mapping failures to [`Error::TransientIo`].
async fn git<F, T>(f: F) -> Result<T, Error>
where
    F: FnOnce(&Shell) -> Result<T, GitError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || -> Result<T, Error> {
        let sh = Shell::new().map_err(GitError::from)?;
        Ok(f(&sh)?)
    })
    .await
    .map_err(|err| Error::Any(err.into()))?
}

#[derive(Debug, thiserror::Error)]
enum GitError {
    #[error(transparent)]
    Command(#[from] xshell::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<GitError> for Error {
    fn from(value: GitError) -> Self {
        match value {
            GitError::Command(err) => Error::TransientIo(err.to_string()),
            GitError::Io(err) => Error::Io(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    const LS_REMOTE: &str = "\
3f786850e387550fdab836ed7e6dc881de23001b\tHEAD
3f786850e387550fdab836ed7e6dc881de23001b\trefs/heads/main
89e6c98d92887913cadf06b2adb97f26cde4849b\trefs/heads/stable
2b66fd261ee5c6cfc8de7fa466bab600bcfe4f69\trefs/tags/v1.0
3f786850e387550fdab836ed7e6dc881de23001b\trefs/tags/v1.0^{}
";

    #[rstest]
    #[case("v1.0", Some(Revision::Tag("v1.0".into())))]
    #[case("refs/tags/v1.0", Some(Revision::Tag("v1.0".into())))]
    #[case(
        "89E6C98D92887913CADF06B2ADB97F26CDE4849B",
        Some(Revision::Commit("89e6c98d92887913cadf06b2adb97f26cde4849b".into()))
    )]
    fn accepted(#[case] reference: &str, #[case] expected: Option<Revision>) {
        assert_eq!(classify(LS_REMOTE, reference).ok(), expected);
    }

    #[test]
    fn branches_are_rejected() {
        assert!(matches!(
            classify(LS_REMOTE, "main"),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            classify(LS_REMOTE, "refs/heads/stable"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn unknown_reference() {
        assert!(matches!(classify(LS_REMOTE, "v2.0"), Err(Error::NotFound(_))));
        // abbreviated commit ids are not accepted
        assert!(matches!(classify(LS_REMOTE, "3f78685"), Err(Error::NotFound(_))));
    }

    #[rstest]
    #[case("git+https://git.example.com/rpms/fio.git#v1.0", "https://git.example.com/rpms/fio.git", "v1.0", "fio")]
    #[case("git://pkgs.example.com/rpms/fio#3f786850e387550fdab836ed7e6dc881de23001b", "git://pkgs.example.com/rpms/fio", "3f786850e387550fdab836ed7e6dc881de23001b", "fio")]
    fn parse(#[case] input: &str, #[case] url: &str, #[case] reference: &str, #[case] name: &str) {
        let scm: ScmRef = input.parse().expect("valid reference");
        assert_eq!(scm.url, url);
        assert_eq!(scm.reference, reference);
        assert_eq!(scm.name(), name);
    }

    #[test]
    fn parse_invalid() {
        assert!("https://git.example.com/fio.git".parse::<ScmRef>().is_err());
        assert!("https://git.example.com/fio.git#".parse::<ScmRef>().is_err());
    }
}
