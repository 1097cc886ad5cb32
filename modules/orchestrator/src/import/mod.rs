//! Importing the sources of a build: download, unpack, deduplicate, scan, and persist.

mod cleanup;
mod steps;

use crate::{
    acquisition::{BuildMetadata, BuildQuery, BuildSystem, BuildType, Downloader, ScmFetcher},
    broker::{Broker, Job},
    config::UnpackConfig,
    dedup::Deduplicated,
    queue::QueueParams,
    report::{Phase, ReportBuilder},
    scan::{Category, ScanOutcome, Scanner},
    service::{
        component::ComponentService, detection::DetectionService, file::FileService,
        source::SourceService, task::TaskService,
    },
    tree::ComponentTree,
    unpack::Unpacker,
    worker::{TaskFailure, TaskHandler, TaskOutput},
    workflow::{Node, Workflow},
    Error,
};
use openlcs_common::{db::Database, retry::RetryPolicy};
use openlcs_entity::{component, source};
use openlcs_module_storage::service::fs::FileSystemBackend;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use uuid::Uuid;

/// The name of the import task, as submitted to the broker.
pub const IMPORT_TASK: &str = "import_source";

fn default_true() -> bool {
    true
}

/// The parameters of an import, the first positional argument of the task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportParams {
    #[serde(flatten)]
    pub build: BuildQuery,
    #[serde(default = "default_true")]
    pub license_scan: bool,
    #[serde(default = "default_true")]
    pub copyright_scan: bool,
    /// A local copy of the source archive, provided by the import of a source container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_path: Option<PathBuf>,
    /// The component to attach the imported component to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_component: Option<Uuid>,
}

impl ImportParams {
    pub fn new(build: BuildQuery) -> Self {
        Self {
            build,
            license_scan: true,
            copyright_scan: true,
            src_path: None,
            parent_component: None,
        }
    }

    pub fn from_job(job: &Job) -> Result<Self, Error> {
        let params = job
            .args
            .get(0)
            .ok_or_else(|| Error::Configuration("missing import parameters".into()))?;
        serde_json::from_value(params.clone())
            .map_err(|err| Error::Configuration(format!("invalid import parameters: {err}")))
    }

    /// The positional arguments of a submission.
    pub fn to_args(&self) -> Result<serde_json::Value, Error> {
        Ok(serde_json::Value::Array(vec![serde_json::to_value(self)?]))
    }

    /// The requested categories of scans.
    pub fn categories(&self) -> Vec<Category> {
        let mut result = Vec::with_capacity(2);
        if self.license_scan {
            result.push(Category::License);
        }
        if self.copyright_scan {
            result.push(Category::Copyright);
        }
        result
    }
}

/// The services an import works with.
pub struct ImportEnv {
    pub db: Database,
    pub broker: Broker,
    pub storage: FileSystemBackend,
    pub build_system: Arc<dyn BuildSystem>,
    pub scanner: Arc<dyn Scanner>,
    pub downloader: Downloader,
    pub scm: ScmFetcher,
    pub unpacker: Unpacker,
    /// markers of test data, for triaging scan errors
    pub test_data_markers: Vec<String>,
    /// the root of the per task working directories
    pub scratch_dir: PathBuf,

    pub sources: SourceService,
    pub files: FileService,
    pub detections: DetectionService,
    pub components: ComponentService,
    pub tasks: TaskService,
    pub tree: ComponentTree,
}

impl ImportEnv {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        broker: Broker,
        storage: FileSystemBackend,
        build_system: Arc<dyn BuildSystem>,
        scanner: Arc<dyn Scanner>,
        client: reqwest::Client,
        unpack: UnpackConfig,
        scratch_dir: PathBuf,
    ) -> Self {
        let test_data_markers = if unpack.test_data_heuristic {
            unpack.test_data_markers.clone()
        } else {
            vec![]
        };

        Self {
            sources: SourceService::new(db.clone()),
            files: FileService::new(db.clone()),
            detections: DetectionService::new(db.clone()),
            components: ComponentService::new(db.clone()),
            tasks: TaskService::new(db.clone()),
            tree: ComponentTree::new(db.clone()),
            db,
            broker,
            storage,
            build_system,
            scanner,
            downloader: Downloader::new(client, RetryPolicy::default()),
            scm: ScmFetcher::new(RetryPolicy::default()),
            unpacker: Unpacker::new(unpack),
            test_data_markers,
            scratch_dir,
        }
    }
}

const DOWNLOAD_DIR: &str = "download";
const UNPACK_DIR: &str = "unpack";
/// source archives handed over by the import which forked this one
const STAGED_DIR: &str = "staged";

/// The state of an import, filled in step by step.
#[derive(Debug)]
pub struct ImportContext {
    pub execution_id: Uuid,
    pub task_id: Uuid,
    pub owner: String,
    pub params: ImportParams,
    pub queue: QueueParams,
    /// the working directory of this execution
    pub work_dir: PathBuf,
    pub phase: Phase,
    pub report: ReportBuilder,

    pub build: Option<BuildMetadata>,
    pub build_type: Option<BuildType>,
    pub source_container: Option<BuildMetadata>,
    pub archive: Option<PathBuf>,
    pub checksum: Option<String>,
    pub source: Option<source::Model>,
    pub unpacked: Option<PathBuf>,
    pub deduplicated: Option<Deduplicated>,
    /// file ids by content id
    pub files: HashMap<String, Uuid>,
    pub scans: Vec<(Category, ScanOutcome)>,
    pub component: Option<component::Model>,
    /// execution ids of forked imports
    pub forked: Vec<Uuid>,
}

impl ImportContext {
    pub fn new(
        execution_id: Uuid,
        task_id: Uuid,
        owner: String,
        params: ImportParams,
        queue: QueueParams,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            execution_id,
            task_id,
            owner,
            params,
            queue,
            work_dir,
            phase: Phase::Download,
            report: ReportBuilder::new(),
            build: None,
            build_type: None,
            source_container: None,
            archive: None,
            checksum: None,
            source: None,
            unpacked: None,
            deduplicated: None,
            files: HashMap::new(),
            scans: vec![],
            component: None,
            forked: vec![],
        }
    }

    pub fn is_container(&self) -> bool {
        self.build_type == Some(BuildType::Image)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.work_dir.join(DOWNLOAD_DIR)
    }

    pub fn unpack_dir(&self) -> PathBuf {
        self.work_dir.join(UNPACK_DIR)
    }

    fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T, Error> {
        value
            .as_ref()
            .ok_or_else(|| Error::Any(anyhow::anyhow!("{what} is not available yet")))
    }

    pub fn build(&self) -> Result<&BuildMetadata, Error> {
        Self::require(&self.build, "build")
    }

    pub fn source(&self) -> Result<&source::Model, Error> {
        Self::require(&self.source, "source")
    }

    pub fn archive(&self) -> Result<&PathBuf, Error> {
        Self::require(&self.archive, "archive")
    }

    pub fn unpacked(&self) -> Result<&PathBuf, Error> {
        Self::require(&self.unpacked, "unpacked sources")
    }

    pub fn deduplicated(&self) -> Result<&Deduplicated, Error> {
        Self::require(&self.deduplicated, "deduplicated sources")
    }

    pub fn component(&self) -> Result<&component::Model, Error> {
        Self::require(&self.component, "component")
    }
}

fn is_container(context: &ImportContext, _: &ImportEnv) -> bool {
    context.is_container()
}

fn needs_scan(context: &ImportContext, env: &ImportEnv) -> bool {
    steps::pending_scans(context, env).is_some_and(|pending| !pending.is_empty())
}

fn has_parent(context: &ImportContext, _: &ImportEnv) -> bool {
    context.params.parent_component.is_some()
}

/// The import workflow.
pub fn workflow() -> Workflow<ImportContext, ImportEnv> {
    use steps::*;

    Workflow::new(
        IMPORT_TASK,
        vec![
            Node::step(ResolveBuild),
            Node::If(is_container, vec![Node::step(ResolveSourceContainer)]),
            Node::step(Download),
            Node::step(StoreArchive),
            Node::IfElse(
                is_container,
                vec![
                    Node::step(Unpack),
                    Node::step(CreateComponent),
                    Node::step(ForkSources),
                    Node::step(LinkRemoteSources),
                ],
                vec![
                    Node::step(RegisterSource),
                    Node::If(
                        needs_scan,
                        vec![
                            Node::step(Unpack),
                            Node::step(Deduplicate),
                            Node::step(PersistFiles),
                            Node::step(Scan),
                            Node::step(PersistDetections),
                            Node::step(UpdateFlag),
                        ],
                    ),
                    Node::step(CreateComponent),
                    Node::If(has_parent, vec![Node::step(AttachToParent)]),
                ],
            ),
        ],
    )
    .with_cleanup(cleanup::RemoveDownloads)
    .with_cleanup(cleanup::RemoveUnpacked)
}

/// The import task, running the import workflow for a job.
pub struct ImportTask {
    env: Arc<ImportEnv>,
    workflow: Workflow<ImportContext, ImportEnv>,
}

impl ImportTask {
    pub fn new(env: Arc<ImportEnv>) -> Self {
        Self {
            env,
            workflow: workflow(),
        }
    }
}

#[async_trait::async_trait]
impl TaskHandler for ImportTask {
    async fn run(&self, job: &Job) -> Result<TaskOutput, TaskFailure> {
        let params = ImportParams::from_job(job)?;
        let task = self
            .env
            .tasks
            .by_execution_id(job.execution_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task of execution {}", job.execution_id)))?;

        let mut context = ImportContext::new(
            job.execution_id,
            task.id,
            task.owner,
            params,
            QueueParams::from_kwargs(&job.kwargs),
            self.env.scratch_dir.join(job.execution_id.to_string()),
        );

        match self.workflow.process(&mut context, &self.env).await {
            Ok(()) => Ok(TaskOutput {
                report: context.report.build(),
            }),
            Err(error) => {
                let phase = context.phase;
                context.report.add_error(phase, "", error.to_string());
                Err(TaskFailure {
                    error,
                    report: Some(context.report.build()),
                })
            }
        }
    }

    async fn cleanup(&self, job: &Job, last: bool) {
        let work_dir = self.env.scratch_dir.join(job.execution_id.to_string());
        cleanup::remove_attempt(&work_dir, last).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn params() -> anyhow::Result<()> {
        let params: ImportParams = serde_json::from_value(json!({
            "nvr": "fio-3.1-2.el7",
            "copyright_scan": false,
        }))?;

        assert_eq!(params.build.nvr.as_deref(), Some("fio-3.1-2.el7"));
        assert_eq!(params.categories(), vec![Category::License]);
        assert_eq!(params.src_path, None);

        assert_eq!(
            ImportParams::new(params.build.clone()).to_args()?,
            json!([{"nvr": "fio-3.1-2.el7", "license_scan": true, "copyright_scan": true}])
        );

        Ok(())
    }

    #[test]
    fn missing_params() {
        let job = Job {
            execution_id: Uuid::new_v4(),
            task_name: IMPORT_TASK.into(),
            args: json!([]),
            kwargs: json!({}),
            queue: "openlcs".into(),
            attempt: 0,
        };

        assert!(matches!(
            ImportParams::from_job(&job),
            Err(Error::Configuration(_))
        ));
    }
}
