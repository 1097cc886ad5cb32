//! Content-addressed deduplication of unpacked source trees.

use crate::Error;
use openlcs_common::hashing::ContentId;
use std::{
    collections::{BTreeSet, HashSet},
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::instrument;
use walkdir::WalkDir;

/// Knows which content is already stored.
#[async_trait::async_trait]
pub trait ContentIndex: Send + Sync {
    /// Return the subset of `ids` which is known.
    async fn known(&self, ids: &[ContentId]) -> Result<HashSet<ContentId>, Error>;
}

/// A file of a source tree.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestEntry {
    /// The path, relative to the root of the tree
    pub path: String,
    pub id: ContentId,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Deduplicated {
    /// Identifiers of the files still present, which need to be scanned
    pub residual: Vec<ContentId>,
    /// All files of the tree, including the removed ones
    pub manifest: Vec<ManifestEntry>,
}

impl Deduplicated {
    /// The distinct identifiers of the manifest.
    pub fn ids(&self) -> Vec<ContentId> {
        self.manifest
            .iter()
            .map(|entry| entry.id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Walk `root`, identify all regular files and remove the ones with already known content.
#[instrument(skip(index), err)]
pub async fn deduplicate(index: &dyn ContentIndex, root: &Path) -> Result<Deduplicated, Error> {
    let walk_root = root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || identify(&walk_root))
        .await
        .map_err(|err| Error::Any(err.into()))??;

    let ids = files
        .iter()
        .map(|(_, entry)| entry.id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    let known = index.known(&ids).await?;

    let mut residual = BTreeSet::new();
    let mut manifest = Vec::with_capacity(files.len());
    let mut removed = 0usize;

    for (path, entry) in files {
        if known.contains(&entry.id) {
            tokio::fs::remove_file(&path).await?;
            removed += 1;
        } else {
            residual.insert(entry.id.clone());
        }
        manifest.push(entry);
    }

    log::info!(
        "Deduplicated {}: {} files, {removed} already known, {} new contents",
        root.display(),
        manifest.len(),
        residual.len()
    );

    Ok(Deduplicated {
        residual: residual.into_iter().collect(),
        manifest,
    })
}

/// Compute the content identifiers of all regular files, skipping symlinks.
fn identify(root: &Path) -> Result<Vec<(PathBuf, ManifestEntry)>, Error> {
    let mut result = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let len = entry.metadata().map_err(std::io::Error::from)?.len();
        let id = ContentId::from_reader(len, BufReader::new(File::open(path)?))?;

        let relative = path
            .strip_prefix(root)
            .map_err(|err| Error::Any(err.into()))?
            .to_string_lossy()
            .into_owned();

        result.push((path.to_path_buf(), ManifestEntry { path: relative, id }));
    }

    Ok(result)
}
