use super::{Category, CopyrightFinding, FileFindings, LicenseFinding, ScanOutcome, Scanner};
use crate::config::ScannerConfig;
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tokio::process::Command;
use tracing::instrument;

#[derive(Debug, Deserialize)]
struct Output {
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    files: Vec<File>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct File {
    path: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    licenses: Vec<License>,
    #[serde(default)]
    copyrights: Vec<Copyright>,
    #[serde(default)]
    scan_errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct License {
    key: String,
    #[serde(default)]
    score: f64,
    start_line: i32,
    end_line: i32,
}

#[derive(Debug, Deserialize)]
struct Copyright {
    #[serde(alias = "copyright")]
    value: String,
    start_line: i32,
    end_line: i32,
}

/// Parse the JSON output of scancode.
pub fn parse_output(data: &[u8]) -> Result<ScanOutcome, serde_json::Error> {
    let output: Output = serde_json::from_slice(data)?;

    let errors = output
        .headers
        .into_iter()
        .flat_map(|header| header.errors)
        .collect();

    let files = output
        .files
        .into_iter()
        .filter(|file| file.kind != "directory")
        .map(|file| FileFindings {
            path: file.path,
            licenses: file
                .licenses
                .into_iter()
                .map(|license| LicenseFinding {
                    key: license.key,
                    score: license.score,
                    start_line: license.start_line,
                    end_line: license.end_line,
                })
                .collect(),
            copyrights: file
                .copyrights
                .into_iter()
                .map(|copyright| CopyrightFinding {
                    statement: copyright.value,
                    start_line: copyright.start_line,
                    end_line: copyright.end_line,
                })
                .collect(),
            errors: file.scan_errors,
        })
        .collect();

    Ok(ScanOutcome {
        files,
        errors,
        had_exception: false,
    })
}

/// Runs scancode as an external command.
#[derive(Clone, Debug)]
pub struct ScancodeScanner {
    config: ScannerConfig,
}

impl ScancodeScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    fn command(&self, category: Category, dir: &Path, output: &Path) -> Option<Command> {
        let mut parts = self.config.command.split_whitespace();
        let mut cmd = Command::new(parts.next()?);
        cmd.args(parts)
            .arg(match category {
                Category::License => "--license",
                Category::Copyright => "--copyright",
            })
            .arg("-n")
            .arg(self.config.processes.to_string())
            .arg("--timeout")
            .arg(self.config.timeout.as_secs().max(1).to_string())
            .arg("--strip-root")
            .arg("--quiet")
            .arg("--json")
            .arg(output)
            .arg(dir)
            .kill_on_drop(true);
        Some(cmd)
    }

    /// The time to wait for scancode, which has a timeout per file only.
    fn overall_timeout(&self) -> Duration {
        self.config.timeout.saturating_mul(100)
    }
}

#[async_trait::async_trait]
impl Scanner for ScancodeScanner {
    fn detector(&self) -> &str {
        &self.config.detector
    }

    #[instrument(skip(self))]
    async fn scan(&self, category: Category, dir: &Path) -> ScanOutcome {
        let output = match tempfile::Builder::new()
            .prefix("scancode-")
            .suffix(".json")
            .tempfile()
        {
            Ok(output) => output,
            Err(err) => return ScanOutcome::failed(vec![format!("failed to create output: {err}")]),
        };

        let Some(mut command) = self.command(category, dir, output.path()) else {
            return ScanOutcome::failed(vec!["no scanner command configured".into()]);
        };

        let result = match tokio::time::timeout(self.overall_timeout(), command.output()).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                return ScanOutcome::failed(vec![format!("failed to run scanner: {err}")]);
            }
            Err(_) => return ScanOutcome::failed(vec!["scanner timed out".into()]),
        };

        if !result.status.success() {
            let mut errors = vec![format!("scanner failed: {}", result.status)];
            errors.extend(
                String::from_utf8_lossy(&result.stderr)
                    .lines()
                    .filter(|line| !line.trim().is_empty())
                    .map(String::from),
            );
            return ScanOutcome::failed(errors);
        }

        let data = match tokio::fs::read(output.path()).await {
            Ok(data) => data,
            Err(err) => {
                return ScanOutcome::failed(vec![format!("failed to read scanner output: {err}")])
            }
        };

        match parse_output(&data) {
            Ok(outcome) => {
                log::debug!("Scanned {} files for {category}", outcome.files.len());
                outcome
            }
            Err(err) => ScanOutcome::failed(vec![format!("invalid scanner output: {err}")]),
        }
    }
}
