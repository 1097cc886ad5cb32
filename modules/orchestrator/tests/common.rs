use openlcs_entity::task_result;
use openlcs_module_orchestrator::{
    acquisition::{Archive, BuildMetadata, BuildQuery, BuildSystem, BuildType},
    broker::{Broker, Submission},
    config::UnpackConfig,
    import::{ImportEnv, ImportParams, ImportTask, IMPORT_TASK},
    lock::TaskLocks,
    queue::{queues, route_priority, Priority},
    scan::{Category, CopyrightFinding, FileFindings, LicenseFinding, ScanOutcome, Scanner},
    worker::{PoolOptions, WorkerPool},
    Error,
};
use openlcs_test_context::{write_tarball, LcsContext};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use url::Url;
use uuid::Uuid;
use walkdir::WalkDir;

pub const BASE: &str = "openlcs";
pub const DETECTOR: &str = "scancode-toolkit 30.1.0";

/// Build metadata for an NVR.
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

/// A build system serving builds from a local mirror.
#[derive(Debug)]
pub struct FakeBuildSystem {
    mirror: PathBuf,
    top_url: Url,
    builds: Vec<(BuildMetadata, Vec<Archive>)>,
    pub archive_lookups: AtomicUsize,
}

impl FakeBuildSystem {
    pub fn new(mirror: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&mirror)?;
        let top_url = Url::from_directory_path(&mirror)
            .map_err(|()| anyhow::anyhow!("invalid mirror path"))?;

        Ok(Self {
            mirror,
            top_url,
            builds: vec![],
            archive_lookups: Default::default(),
        })
    }

    /// Add a build, with its archive in the layout of the mirror.
    pub fn with_build<'a>(
        mut self,
        build: BuildMetadata,
        dir: &str,
        archive: Archive,
        files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> anyhow::Result<Self> {
        let path = self
            .mirror
            .join("packages")
            .join(&build.name)
            .join(&build.version)
            .join(&build.release)
            .join(dir)
            .join(&archive.filename);
        write_tarball(&path, files)?;

        self.builds.push((build, vec![archive]));
        Ok(self)
    }

    /// Add a build which has no archives.
    pub fn with_bare_build(mut self, build: BuildMetadata) -> Self {
        self.builds.push((build, vec![]));
        self
    }
}

#[async_trait::async_trait]
impl BuildSystem for FakeBuildSystem {
    async fn get_build(&self, nvr: &str) -> Result<Option<BuildMetadata>, Error> {
        Ok(self
            .builds
            .iter()
            .find(|(build, _)| build.nvr == nvr)
            .map(|(build, _)| build.clone()))
    }

    async fn get_rpm_build(&self, nvra: &str) -> Result<Option<BuildMetadata>, Error> {
        let Some((nvr, _arch)) = nvra.rsplit_once('.') else {
            return Ok(None);
        };
        self.get_build(nvr).await
    }

    async fn get_latest_build(
        &self,
        _tag: &str,
        package_name: &str,
    ) -> Result<Option<BuildMetadata>, Error> {
        Ok(self
            .builds
            .iter()
            .rev()
            .find(|(build, _)| build.name == package_name)
            .map(|(build, _)| build.clone()))
    }

    async fn list_archives(
        &self,
        build: &BuildMetadata,
        _build_type: BuildType,
    ) -> Result<Vec<Archive>, Error> {
        self.archive_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .builds
            .iter()
            .find(|(candidate, _)| candidate.nvr == build.nvr)
            .map(|(_, archives)| archives.clone())
            .unwrap_or_default())
    }

    async fn get_latest_source_container_build(
        &self,
        binary_nvr: &str,
    ) -> Result<Option<BuildMetadata>, Error> {
        Ok(self
            .builds
            .iter()
            .rev()
            .find(|(build, _)| build.sources_for_nvr() == Some(binary_nvr))
            .map(|(build, _)| build.clone()))
    }

    fn top_url(&self) -> &Url {
        &self.top_url
    }
}

/// A scanner reporting `gpl-2.0` for C sources, and lines mentioning a copyright.
#[derive(Debug, Default)]
pub struct FakeScanner {
    /// the files seen by each scan
    pub scans: Mutex<Vec<(Category, Vec<String>)>>,
}

impl FakeScanner {
    pub fn scanned(&self, category: Category) -> Vec<Vec<String>> {
        self.scans
            .lock()
            .iter()
            .filter(|(c, _)| *c == category)
            .map(|(_, files)| files.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Scanner for FakeScanner {
    fn detector(&self) -> &str {
        DETECTOR
    }

    async fn scan(&self, category: Category, dir: &Path) -> ScanOutcome {
        let mut files = vec![];
        let mut seen = vec![];

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(path) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let path = path.to_string_lossy().into_owned();
            let content = std::fs::read_to_string(entry.path()).unwrap_or_default();

            let mut findings = FileFindings {
                path: path.clone(),
                ..Default::default()
            };

            match category {
                Category::License if path.ends_with(".c") => {
                    findings.licenses.push(LicenseFinding {
                        key: "gpl-2.0".into(),
                        score: 100.0,
                        start_line: 1,
                        end_line: 1,
                    })
                }
                Category::Copyright => {
                    for (n, line) in content.lines().enumerate() {
                        if let Some(start) = line.find("Copyright") {
                            findings.copyrights.push(CopyrightFinding {
                                statement: line[start..].trim_end_matches("*/").trim().into(),
                                start_line: n as i32 + 1,
                                end_line: n as i32 + 1,
                            });
                        }
                    }
                }
                _ => {}
            }

            seen.push(path);
            files.push(findings);
        }

        self.scans.lock().push((category, seen));

        ScanOutcome {
            files,
            ..Default::default()
        }
    }
}

pub const FIO_C: &[u8] = b"/* Copyright (C) 2005 Jens Axboe */\nint main(void) { return 0; }\n";
pub const SYNC_C: &[u8] = b"int sync_engine;\n";
pub const README: &[u8] = b"fio - flexible I/O tester\n";

/// The files of the fio sources, including one duplicate.
pub fn fio_files() -> Vec<(&'static str, &'static [u8])> {
    vec![
        ("fio-3.1/README", README),
        ("fio-3.1/fio.c", FIO_C),
        ("fio-3.1/engines/sync.c", SYNC_C),
        ("fio-3.1/t/README", README),
    ]
}

pub fn source_archive(filename: &str) -> Archive {
    Archive {
        filename: filename.into(),
        kind: "tar".into(),
        arch: Some("src".into()),
        ..Default::default()
    }
}

/// A build system knowing `fio-3.1-2.el7`.
pub fn fio(ctx: &LcsContext) -> anyhow::Result<FakeBuildSystem> {
    FakeBuildSystem::new(ctx.scratch.join("mirror"))?.with_build(
        build("fio-3.1-2.el7", None),
        "src",
        source_archive("fio-3.1.tar.gz"),
        fio_files(),
    )
}

pub fn work_dir(ctx: &LcsContext) -> PathBuf {
    ctx.scratch.join("work")
}

pub fn env(
    ctx: &LcsContext,
    build_system: Arc<FakeBuildSystem>,
    scanner: Arc<FakeScanner>,
) -> Arc<ImportEnv> {
    Arc::new(ImportEnv::new(
        ctx.db.clone(),
        Broker::new(ctx.db.clone(), BASE),
        ctx.storage.clone(),
        build_system,
        scanner,
        reqwest::Client::new(),
        UnpackConfig::default(),
        work_dir(ctx),
    ))
}

pub fn pool(ctx: &LcsContext, env: Arc<ImportEnv>) -> anyhow::Result<Arc<WorkerPool>> {
    Ok(Arc::new(
        WorkerPool::new(
            Broker::new(ctx.db.clone(), BASE),
            TaskLocks::new(ctx.db.clone(), "openlcs:task-lock:", Duration::from_secs(60)),
            PoolOptions {
                workers: 2,
                time_limit: Duration::from_secs(60),
                max_retries: 0,
                retry_delay: Duration::from_secs(1),
                poll_interval: Duration::from_millis(10),
                queues: queues(BASE, &[6, 3, 1])?,
            },
        )
        .register(IMPORT_TASK, Arc::new(ImportTask::new(env))),
    ))
}

pub async fn submit(ctx: &LcsContext, nvr: &str) -> anyhow::Result<Uuid> {
    let params = ImportParams::new(BuildQuery {
        nvr: Some(nvr.into()),
        ..Default::default()
    });

    Ok(Broker::new(ctx.db.clone(), BASE)
        .submit(Submission {
            task_name: IMPORT_TASK.into(),
            args: params.to_args()?,
            kwargs: route_priority(BASE, Priority::High).to_kwargs(),
            owner: "tester".into(),
            parent_task_id: None,
            queue: route_priority(BASE, Priority::High),
        })
        .await?)
}

pub async fn status(ctx: &LcsContext, execution_id: Uuid) -> anyhow::Result<task_result::Model> {
    Broker::new(ctx.db.clone(), BASE)
        .status(execution_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown execution: {execution_id}"))
}

/// The SHA-256 of a file, hex encoded.
pub fn sha256(path: &Path) -> anyhow::Result<String> {
    let data = std::fs::read(path)?;
    Ok(hex::encode(ring::digest::digest(
        &ring::digest::SHA256,
        &data,
    )))
}
