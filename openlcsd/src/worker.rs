use anyhow::Context;
use openlcs_common::{config::Database, db};
use openlcs_module_orchestrator::{
    acquisition::HubClient,
    broker::Broker,
    config::{BuildSystemConfig, ScannerConfig, UnpackConfig, WorkerConfig},
    import::{ImportEnv, ImportTask, IMPORT_TASK},
    lock::TaskLocks,
    queue::queues,
    scan::ScancodeScanner,
    worker::{PoolOptions, WorkerPool},
};
use openlcs_module_storage::{config::StorageConfig, service::fs::FileSystemBackend};
use std::{process::ExitCode, sync::Arc};

/// Run the worker pool, processing submitted imports
#[derive(clap::Args, Debug)]
pub struct Run {
    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub scanner: ScannerConfig,

    #[command(flatten)]
    pub build_system: BuildSystemConfig,

    #[command(flatten)]
    pub unpack: UnpackConfig,
}

impl Run {
    pub async fn run(self, database: &Database, config: WorkerConfig) -> anyhow::Result<ExitCode> {
        let db = db::Database::connect_and_migrate(database).await?;

        let storage = FileSystemBackend::new(&self.storage.fs_path)
            .await
            .context("failed to initialize the storage")?;

        tokio::fs::create_dir_all(&config.scratch_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create the scratch directory {}",
                    config.scratch_dir.display()
                )
            })?;

        let client = reqwest::Client::builder()
            .build()
            .context("failed to create the HTTP client")?;
        let build_system = Arc::new(HubClient::from_config(client.clone(), &self.build_system)?);
        let scanner = Arc::new(ScancodeScanner::new(self.scanner));

        let broker = Broker::new(db.clone(), config.queue_base.clone());
        let locks = TaskLocks::new(
            db.clone(),
            config.lock_prefix.clone(),
            config.time_limit.into(),
        );

        let options = PoolOptions {
            workers: config.workers,
            time_limit: config.time_limit.into(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay.into(),
            poll_interval: config.poll_interval.into(),
            queues: queues(&config.queue_base, &config.queue_weights)?,
        };

        log::info!("Serving queues: {:?}", options.queues);

        let env = ImportEnv::new(
            db,
            broker.clone(),
            storage,
            build_system,
            scanner,
            client,
            self.unpack,
            config.scratch_dir,
        );

        WorkerPool::new(broker, locks, options)
            .register(IMPORT_TASK, Arc::new(ImportTask::new(Arc::new(env))))
            .run()
            .await?;

        Ok(ExitCode::SUCCESS)
    }
}
