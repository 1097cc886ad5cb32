use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use liblzma::read::XzDecoder;
use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
};

/// The formats of archives we know about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    Rpm,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Zip,
    Gz,
    Bz2,
    Xz,
}

impl ArchiveKind {
    /// Detect the kind of archive from the file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();

        const SUFFIXES: &[(&str, ArchiveKind)] = &[
            (".rpm", ArchiveKind::Rpm),
            (".tar.gz", ArchiveKind::TarGz),
            (".tgz", ArchiveKind::TarGz),
            (".crate", ArchiveKind::TarGz),
            (".tar.bz2", ArchiveKind::TarBz2),
            (".tbz2", ArchiveKind::TarBz2),
            (".tar.xz", ArchiveKind::TarXz),
            (".txz", ArchiveKind::TarXz),
            (".tar", ArchiveKind::Tar),
            (".gem", ArchiveKind::Tar),
            (".zip", ArchiveKind::Zip),
            (".jar", ArchiveKind::Zip),
            (".war", ArchiveKind::Zip),
            (".ear", ArchiveKind::Zip),
            (".whl", ArchiveKind::Zip),
            (".gz", ArchiveKind::Gz),
            (".bz2", ArchiveKind::Bz2),
            (".xz", ArchiveKind::Xz),
        ];

        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix) && name.len() > suffix.len())
            .map(|(_, kind)| *kind)
    }
}

/// Extract an archive using the built-in extractors.
///
/// RPMs are not handled here, as they require external tools.
pub fn extract_native(kind: ArchiveKind, archive: &Path, dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;
    let file = BufReader::new(File::open(archive)?);

    match kind {
        ArchiveKind::Tar => unpack_tar(file, dest),
        ArchiveKind::TarGz => unpack_tar(GzDecoder::new(file), dest),
        ArchiveKind::TarBz2 => unpack_tar(BzDecoder::new(file), dest),
        ArchiveKind::TarXz => unpack_tar(XzDecoder::new(file), dest),
        ArchiveKind::Zip => {
            let mut zip = zip::ZipArchive::new(file).map_err(zip_error)?;
            zip.extract(dest).map_err(zip_error)
        }
        ArchiveKind::Gz => decompress(GzDecoder::new(file), archive, dest),
        ArchiveKind::Bz2 => decompress(BzDecoder::new(file), archive, dest),
        ArchiveKind::Xz => decompress(XzDecoder::new(file), archive, dest),
        ArchiveKind::Rpm => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "RPMs require external tools",
        )),
    }
}

fn unpack_tar(reader: impl Read, dest: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(false);
    archive.set_overwrite(true);
    archive.unpack(dest)
}

/// Decompress a single compressed file, dropping the compression suffix from its name.
fn decompress(mut reader: impl Read, archive: &Path, dest: &Path) -> io::Result<()> {
    let target = dest.join(stem(archive));
    let mut out = File::create(target)?;
    io::copy(&mut reader, &mut out)?;
    Ok(())
}

fn stem(path: &Path) -> PathBuf {
    match path.file_stem() {
        Some(stem) if !stem.is_empty() => PathBuf::from(stem),
        _ => PathBuf::from("content"),
    }
}

fn zip_error(err: zip::result::ZipError) -> io::Error {
    match err {
        zip::result::ZipError::Io(err) => err,
        err => io::Error::new(io::ErrorKind::InvalidData, err),
    }
}
