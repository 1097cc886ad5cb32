use std::path::PathBuf;
use url::Url;

#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Worker")]
pub struct WorkerConfig {
    /// Number of tasks processed concurrently
    #[arg(id = "workers", long, env = "OPENLCS_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Directory for per task scratch space
    #[arg(
        id = "scratch-dir",
        long,
        env = "OPENLCS_SCRATCH_DIR",
        default_value = "./.openlcs/scratch"
    )]
    pub scratch_dir: PathBuf,

    /// Hard time limit of a single task, also the lease of its identity lock
    #[arg(
        id = "task-time-limit",
        long,
        env = "OPENLCS_TASK_TIME_LIMIT",
        default_value = "2h"
    )]
    pub time_limit: humantime::Duration,

    /// Number of times a failed task gets re-run by the broker
    #[arg(id = "max-retries", long, env = "OPENLCS_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Delay before the first re-run of a failed task, doubling on each further attempt
    #[arg(
        id = "retry-delay",
        long,
        env = "OPENLCS_RETRY_DELAY",
        default_value = "30s"
    )]
    pub retry_delay: humantime::Duration,

    /// Interval for polling the queues when idle
    #[arg(
        id = "poll-interval",
        long,
        env = "OPENLCS_POLL_INTERVAL",
        default_value = "1s"
    )]
    pub poll_interval: humantime::Duration,

    /// Base name of the queues
    #[arg(id = "queue-base", long, env = "OPENLCS_QUEUE_BASE", default_value = "openlcs")]
    pub queue_base: String,

    /// Weights for draining the high, medium, and low priority queues
    #[arg(
        id = "queue-weights",
        long,
        env = "OPENLCS_QUEUE_WEIGHTS",
        value_delimiter = ',',
        default_values_t = [6, 3, 1]
    )]
    pub queue_weights: Vec<u32>,

    /// Prefix of the identity lock keys
    #[arg(
        id = "lock-prefix",
        long,
        env = "OPENLCS_LOCK_PREFIX",
        default_value = "openlcs:task-lock:"
    )]
    pub lock_prefix: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            scratch_dir: "./.openlcs/scratch".into(),
            time_limit: std::time::Duration::from_secs(2 * 60 * 60).into(),
            max_retries: 3,
            retry_delay: std::time::Duration::from_secs(30).into(),
            poll_interval: std::time::Duration::from_secs(1).into(),
            queue_base: "openlcs".into(),
            queue_weights: vec![6, 3, 1],
            lock_prefix: "openlcs:task-lock:".into(),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Scanner")]
pub struct ScannerConfig {
    /// Scanner executable, needs to understand the scancode command line options
    #[arg(
        id = "scanner-command",
        long,
        env = "OPENLCS_SCANNER_COMMAND",
        default_value = "scancode"
    )]
    pub command: String,

    /// Name and version of the detector, recorded in the scan flag
    #[arg(
        id = "scanner-detector",
        long,
        env = "OPENLCS_SCANNER_DETECTOR",
        default_value = "scancode-toolkit 30.1.0"
    )]
    pub detector: String,

    /// Number of scanner processes
    #[arg(
        id = "scanner-processes",
        long,
        env = "OPENLCS_SCANNER_PROCESSES",
        default_value_t = 4
    )]
    pub processes: usize,

    /// Timeout for scanning a single file
    #[arg(
        id = "scanner-timeout",
        long,
        env = "OPENLCS_SCANNER_TIMEOUT",
        default_value = "300s"
    )]
    pub timeout: humantime::Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            command: "scancode".into(),
            detector: "scancode-toolkit 30.1.0".into(),
            processes: 4,
            timeout: std::time::Duration::from_secs(300).into(),
        }
    }
}

#[derive(clap::Args, Debug, Clone, Default)]
#[command(next_help_heading = "Build system")]
pub struct BuildSystemConfig {
    /// JSON-RPC endpoint of the build system hub
    #[arg(id = "hub-url", long, env = "OPENLCS_HUB_URL")]
    pub hub_url: Option<Url>,

    /// Base URL for downloading build artifacts
    #[arg(id = "top-url", long, env = "OPENLCS_TOP_URL")]
    pub top_url: Option<Url>,
}

#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Unpack")]
pub struct UnpackConfig {
    /// Extraction command for archives the built-in extractor can't handle. `{archive}` and
    /// `{dest}` get replaced.
    #[arg(
        id = "unpack-fallback-command",
        long,
        env = "OPENLCS_UNPACK_FALLBACK_COMMAND",
        default_value = "7z x -y -o{dest} {archive}"
    )]
    pub fallback_command: String,

    /// Skip the fallback extractor when all failures are located in test data
    #[arg(
        id = "unpack-test-data-heuristic",
        long,
        env = "OPENLCS_UNPACK_TEST_DATA_HEURISTIC",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub test_data_heuristic: bool,

    /// Path components identifying test data
    #[arg(
        id = "unpack-test-data-markers",
        long,
        env = "OPENLCS_UNPACK_TEST_DATA_MARKERS",
        value_delimiter = ',',
        default_values_t = default_test_data_markers()
    )]
    pub test_data_markers: Vec<String>,

    /// Maximum nesting of archives
    #[arg(
        id = "unpack-max-depth",
        long,
        env = "OPENLCS_UNPACK_MAX_DEPTH",
        default_value_t = 8
    )]
    pub max_depth: usize,
}

fn default_test_data_markers() -> Vec<String> {
    ["test", "tests", "testdata", "test-data", "fixtures"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            fallback_command: "7z x -y -o{dest} {archive}".into(),
            test_data_heuristic: true,
            test_data_markers: default_test_data_markers(),
            max_depth: 8,
        }
    }
}
