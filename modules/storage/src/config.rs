use std::path::PathBuf;

#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Storage")]
pub struct StorageConfig {
    /// Base directory of the source archive store
    #[arg(
        id = "storage-fs-path",
        long,
        env = "OPENLCS_STORAGE_FS_PATH",
        default_value = "./.openlcs/storage"
    )]
    pub fs_path: PathBuf,
}
