mod logging;
mod worker;

use clap::Parser;
use openlcs_common::{config::Database, db};
use openlcs_module_orchestrator::{
    acquisition::BuildQuery,
    broker::{Broker, Submission},
    config::WorkerConfig,
    import::{ImportParams, IMPORT_TASK},
    lock::TaskLocks,
    queue::{route_priority, Priority},
};
use serde_json::json;
use std::process::{ExitCode, Termination};
use uuid::Uuid;

#[allow(clippy::large_enum_variant)]
#[derive(clap::Subcommand, Debug)]
pub enum Command {
    Worker(worker::Run),
    Submit(Submit),
    /// Show the state of a submitted task
    Status {
        execution_id: Uuid,
    },
    /// Maintain the identity locks
    #[command(subcommand)]
    Locks(Locks),
}

/// Submit the import of a build
#[derive(clap::Args, Debug)]
pub struct Submit {
    /// NVR of the build
    #[arg(long, conflicts_with_all = ["tag", "nvra"])]
    pub nvr: Option<String>,
    /// Tag to take the latest build of a package from, requires `--package`
    #[arg(long, requires = "package", conflicts_with = "nvra")]
    pub tag: Option<String>,
    /// Name of the package, used together with `--tag`
    #[arg(long, requires = "tag")]
    pub package: Option<String>,
    /// NVRA of an RPM, resolved to its build
    #[arg(long)]
    pub nvra: Option<String>,

    #[arg(long, value_enum, default_value_t = Priority::High)]
    pub priority: Priority,

    /// Skip scanning for licenses
    #[arg(long)]
    pub no_license_scan: bool,
    /// Skip scanning for copyrights
    #[arg(long)]
    pub no_copyright_scan: bool,

    #[arg(long, env = "OPENLCS_OWNER", default_value = "openlcsd")]
    pub owner: String,
}

impl Submit {
    fn params(&self) -> ImportParams {
        let mut params = ImportParams::new(BuildQuery {
            nvr: self.nvr.clone(),
            tag: self.tag.clone(),
            package_name: self.package.clone(),
            nvra: self.nvra.clone(),
        });
        params.license_scan = !self.no_license_scan;
        params.copyright_scan = !self.no_copyright_scan;
        params
    }

    async fn run(self, broker: &Broker) -> anyhow::Result<ExitCode> {
        let params = self.params();
        // reject bad queries early, the worker would fail the task anyway
        params.build.selector()?;

        let queue = route_priority(broker.base(), self.priority);
        let execution_id = broker
            .submit(Submission {
                task_name: IMPORT_TASK.into(),
                args: params.to_args()?,
                kwargs: queue.to_kwargs(),
                owner: self.owner,
                parent_task_id: None,
                queue,
            })
            .await?;

        println!("{execution_id}");

        Ok(ExitCode::SUCCESS)
    }
}

#[derive(clap::Subcommand, Debug)]
pub enum Locks {
    /// List the held identity locks
    List,
    /// Remove all identity locks, after a crash of the workers
    Clear,
}

impl Locks {
    async fn run(self, locks: &TaskLocks) -> anyhow::Result<ExitCode> {
        match self {
            Self::List => {
                for lock in locks.list().await? {
                    println!(
                        "{}",
                        json!({
                            "key": lock.key,
                            "task_name": lock.task_name,
                            "created": lock.created.to_string(),
                            "expires_at": lock.expires_at,
                        })
                    );
                }
            }
            Self::Clear => {
                let removed = locks.clear().await?;
                println!("removed {removed} locks");
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}

#[derive(clap::Parser, Debug)]
#[command(
    author,
    version = env!("CARGO_PKG_VERSION"),
    about = "openlcsd",
    long_about = None
)]
pub struct Openlcsd {
    #[command(subcommand)]
    pub(crate) command: Command,

    #[command(flatten)]
    pub database: Database,

    #[command(flatten)]
    pub worker: WorkerConfig,
}

impl Openlcsd {
    async fn run(self) -> ExitCode {
        match self.run_command().await {
            Ok(code) => code,
            Err(err) => {
                log::error!("Error: {err}");
                for (n, err) in err.chain().skip(1).enumerate() {
                    if n == 0 {
                        log::error!("Caused by:");
                    }
                    log::error!("\t{err}");
                }

                ExitCode::FAILURE
            }
        }
    }

    async fn run_command(self) -> anyhow::Result<ExitCode> {
        logging::init_log()?;

        match self.command {
            Command::Worker(run) => run.run(&self.database, self.worker).await,
            Command::Submit(submit) => {
                let db = db::Database::connect_and_migrate(&self.database).await?;
                submit
                    .run(&Broker::new(db, self.worker.queue_base))
                    .await
            }
            Command::Status { execution_id } => {
                let db = db::Database::connect_and_migrate(&self.database).await?;
                status(&Broker::new(db, self.worker.queue_base), execution_id).await
            }
            Command::Locks(locks) => {
                let db = db::Database::connect_and_migrate(&self.database).await?;
                locks
                    .run(&TaskLocks::new(
                        db,
                        self.worker.lock_prefix,
                        self.worker.time_limit.into(),
                    ))
                    .await
            }
        }
    }
}

async fn status(broker: &Broker, execution_id: Uuid) -> anyhow::Result<ExitCode> {
    let Some(result) = broker.status(execution_id).await? else {
        anyhow::bail!("no task with execution id {execution_id}");
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "execution_id": result.execution_id,
            "task_name": result.task_name,
            "status": result.status,
            "queue": result.queue,
            "attempt": result.attempt,
            "date_done": result.date_done.map(|date| date.to_string()),
            "error": result.error,
            "report": result.report,
        }))?
    );

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> impl Termination {
    Openlcsd::parse().run().await
}
