//! Coordinating license and copyright scans.

mod flag;
mod scancode;

pub use flag::*;
pub use scancode::*;

use crate::unpack::is_test_data;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, path::Path};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LicenseFinding {
    pub key: String,
    pub score: f64,
    pub start_line: i32,
    pub end_line: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyrightFinding {
    pub statement: String,
    pub start_line: i32,
    pub end_line: i32,
}

/// The findings for a single file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileFindings {
    /// The path, relative to the scanned directory
    pub path: String,
    pub licenses: Vec<LicenseFinding>,
    pub copyrights: Vec<CopyrightFinding>,
    pub errors: Vec<String>,
}

/// The outcome of a scan.
///
/// A failing scanner is not an error, but results in an outcome with `had_exception` set, and
/// the diagnostics in `errors`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanOutcome {
    pub files: Vec<FileFindings>,
    pub errors: Vec<String>,
    pub had_exception: bool,
}

impl ScanOutcome {
    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            files: vec![],
            errors,
            had_exception: true,
        }
    }

    /// Split up the problems of the scan into warnings and errors.
    ///
    /// If all files with errors are located in test data, they are only warnings.
    pub fn triage(&self, markers: &[String]) -> Triage {
        let file_errors = self
            .files
            .iter()
            .filter(|file| !file.errors.is_empty())
            .flat_map(|file| {
                file.errors
                    .iter()
                    .map(move |error| format!("{}: {error}", file.path))
            })
            .collect::<Vec<_>>();

        let in_test_data = self
            .files
            .iter()
            .filter(|file| !file.errors.is_empty())
            .all(|file| is_test_data(markers, Path::new(""), Path::new(&file.path)));

        let mut triage = Triage::default();

        if in_test_data {
            triage.warnings.extend(file_errors);
        } else {
            triage.errors.extend(file_errors);
        }
        triage.errors.extend(self.errors.iter().cloned());

        triage
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Triage {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// A scanner for licenses or copyrights.
#[async_trait::async_trait]
pub trait Scanner: Send + Sync + Debug {
    /// The name and version of the detector, as recorded in the scan flag
    fn detector(&self) -> &str;

    /// Scan all files in `dir`.
    async fn scan(&self, category: Category, dir: &Path) -> ScanOutcome;
}
