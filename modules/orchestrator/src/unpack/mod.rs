//! Recursive extraction of source archives.

mod archive;
mod command;

pub use archive::ArchiveKind;

use crate::{config::UnpackConfig, Error};
use std::{
    collections::HashSet,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};
use tracing::instrument;
use walkdir::WalkDir;

/// Errors of the file system, which no other attempt will fix.
fn is_fatal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::StorageFull
    )
}

/// The directory an archive gets extracted into, before it replaces the archive.
fn extract_dir(archive: &Path) -> PathBuf {
    let mut name = archive
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push("-extract");
    archive.with_file_name(name)
}

#[derive(Clone, Debug)]
pub struct Unpacker {
    config: UnpackConfig,
}

struct Failure {
    archive: PathBuf,
    error: io::Error,
}

impl Unpacker {
    pub fn new(config: UnpackConfig) -> Self {
        Self { config }
    }

    /// Extract a single archive into `dest`.
    ///
    /// Files which are no archive get copied into `dest`.
    #[instrument(skip(self), err)]
    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<(), Error> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || extract(&archive, &dest))
            .await
            .map_err(|err| Error::Any(err.into()))??;

        Ok(())
    }

    /// Extract all archives found in `dir`, in place, until no archive is left.
    ///
    /// Files with a name ending in one of the `keep` suffixes are not extracted. Failures of
    /// individual archives are returned as warnings. Only failures of the file system are
    /// errors.
    #[instrument(skip(self, keep), err)]
    pub async fn unpack_recursive(&self, dir: &Path, keep: &[&str]) -> Result<Vec<String>, Error> {
        let this = self.clone();
        let dir = dir.to_path_buf();
        let keep = keep.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Ok(
            tokio::task::spawn_blocking(move || this.unpack_recursive_blocking(&dir, &keep))
                .await
                .map_err(|err| Error::Any(err.into()))??,
        )
    }

    fn unpack_recursive_blocking(&self, dir: &Path, keep: &[String]) -> io::Result<Vec<String>> {
        let mut warnings = Vec::new();
        // archives neither extractor could handle
        let mut given_up = HashSet::new();

        for depth in 0..self.config.max_depth.max(1) {
            let archives = find_archives(dir, keep)?
                .into_iter()
                .filter(|archive| !given_up.contains(archive))
                .collect::<Vec<_>>();

            if archives.is_empty() {
                return Ok(warnings);
            }

            log::debug!("Extracting {} archives at depth {depth}", archives.len());

            let mut failures = Vec::new();

            for archive in archives {
                let target = extract_dir(&archive);
                let existed = target.exists();
                match extract(&archive, &target) {
                    Ok(()) => promote(&archive, &target)?,
                    Err(err) if is_fatal(&err) => {
                        if !existed {
                            remove_dir(&target)?;
                        }
                        return Err(err);
                    }
                    Err(error) => failures.push(Failure { archive, error }),
                }
            }

            if failures.is_empty() {
                continue;
            }

            if self.config.test_data_heuristic
                && failures
                    .iter()
                    .all(|failure| self.is_test_data(dir, &failure.archive))
            {
                for Failure { archive, error } in failures {
                    let target = extract_dir(&archive);
                    warnings.push(format!(
                        "{}: using partial extraction of test data: {error}",
                        relative(dir, &archive)
                    ));
                    if target.is_dir() {
                        promote(&archive, &target)?;
                    } else {
                        given_up.insert(archive);
                    }
                }
                continue;
            }

            for Failure { archive, error } in failures {
                let target = extract_dir(&archive);
                remove_dir(&target)?;

                log::debug!(
                    "Falling back for {}: {error}",
                    relative(dir, &archive)
                );

                match command::extract_fallback(&self.config.fallback_command, &archive, &target) {
                    Ok(()) => promote(&archive, &target)?,
                    Err(err) if is_fatal(&err) => {
                        remove_dir(&target)?;
                        return Err(err);
                    }
                    Err(err) => {
                        remove_dir(&target)?;
                        warnings.push(format!(
                            "{}: failed to extract: {error}; fallback failed: {err}",
                            relative(dir, &archive)
                        ));
                        given_up.insert(archive);
                    }
                }
            }
        }

        let remaining = find_archives(dir, keep)?
            .into_iter()
            .filter(|archive| !given_up.contains(archive))
            .count();
        if remaining > 0 {
            warnings.push(format!(
                "{remaining} archives left after reaching the maximum nesting of {}",
                self.config.max_depth
            ));
        }

        Ok(warnings)
    }

    /// Check if a path is located in test data.
    pub fn is_test_data(&self, root: &Path, path: &Path) -> bool {
        is_test_data(&self.config.test_data_markers, root, path)
    }
}

/// Check if one of the directories of `path`, below `root`, is a test data marker.
pub fn is_test_data(markers: &[String], root: &Path, path: &Path) -> bool {
    let path = path.strip_prefix(root).unwrap_or(path);
    path.parent()
        .into_iter()
        .flat_map(Path::components)
        .filter_map(|component| component.as_os_str().to_str())
        .any(|component| {
            markers
                .iter()
                .any(|marker| marker.eq_ignore_ascii_case(component))
        })
}

/// Extract a file into `dest`, cleaning up if `dest` didn't exist before.
fn extract(archive: &Path, dest: &Path) -> io::Result<()> {
    let existed = dest.exists();

    let result = match ArchiveKind::detect(archive) {
        Some(ArchiveKind::Rpm) => command::extract_rpm(archive, dest),
        Some(kind) => archive::extract_native(kind, archive, dest),
        None => copy(archive, dest),
    };

    if result.is_err() && !existed {
        // keep partial results of test data, the caller decides
        if !dest.is_dir() || is_empty_dir(dest)? {
            remove_dir(dest)?;
        }
    }

    result
}

fn copy(file: &Path, dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let name = file
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no file name"))?;
    std::fs::copy(file, dest.join(name))?;
    Ok(())
}

/// Replace an archive with the directory it was extracted into.
fn promote(archive: &Path, extracted: &Path) -> io::Result<()> {
    std::fs::remove_file(archive)?;
    std::fs::rename(extracted, archive)
}

fn remove_dir(dir: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(std::fs::read_dir(dir)?.next().is_none())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Find all archives below `dir`, not following symlinks.
fn find_archives(dir: &Path, keep: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut result = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if keep.iter().any(|suffix| name.ends_with(suffix.as_str())) {
            continue;
        }

        if ArchiveKind::detect(path).is_some() {
            result.push(path.to_path_buf());
        }
    }

    Ok(result)
}
