use std::{collections::BTreeMap, iter};
use time::OffsetDateTime;

/// The phase of processing
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Ord, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Resolving and downloading the build
    Download,
    /// Extracting the archives
    Unpack,
    /// Finding already known content
    Deduplicate,
    /// Running the detectors
    Scan,
    /// Storing the results
    Persist,
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Ord, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Start of the task
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    /// End of the task
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,

    /// Number of processed files
    #[serde(default)]
    pub number_of_items: usize,
    /// Messages emitted during processing
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub messages: BTreeMap<Phase, BTreeMap<String, Vec<Message>>>,
}

impl Report {
    pub fn count(&self, phase: Phase, severity: Severity) -> usize {
        self.messages
            .get(&phase)
            .map(|files| {
                files
                    .values()
                    .flatten()
                    .filter(|message| message.severity == severity)
                    .count()
            })
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Message {
    ///  The severity of the message
    pub severity: Severity,
    /// The message
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct ReportBuilder {
    report: Report,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self {
            report: Report {
                start_date: OffsetDateTime::now_utc(),
                end_date: OffsetDateTime::now_utc(),
                number_of_items: 0,
                messages: Default::default(),
            },
        }
    }

    pub fn add_items(&mut self, items: usize) {
        self.report.number_of_items += items;
    }

    /// Add a single message
    pub fn add_message(
        &mut self,
        phase: Phase,
        file: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.extend_messages(
            phase,
            file,
            [Message {
                severity,
                message: message.into(),
            }],
        )
    }

    /// Add a single error
    pub fn add_error(&mut self, phase: Phase, file: impl Into<String>, message: impl Into<String>) {
        self.add_message(phase, file, Severity::Error, message)
    }

    /// Add a single warning
    pub fn add_warning(
        &mut self,
        phase: Phase,
        file: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.add_message(phase, file, Severity::Warning, message)
    }

    pub fn extend_messages(
        &mut self,
        phase: Phase,
        file: impl Into<String>,
        messages: impl IntoIterator<Item = Message>,
    ) {
        let file = file.into();
        let mut messages = messages.into_iter();

        // don't create empty entries
        let Some(first) = messages.next() else {
            return;
        };

        self.report
            .messages
            .entry(phase)
            .or_default()
            .entry(file)
            .or_default()
            .extend(iter::once(first).chain(messages));
    }

    /// The report so far, without finishing it.
    pub fn current(&self) -> &Report {
        &self.report
    }

    pub fn build(mut self) -> Report {
        self.report.end_date = OffsetDateTime::now_utc();
        self.report
    }
}

impl Default for ReportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_messages_are_skipped() {
        let mut builder = ReportBuilder::new();
        builder.extend_messages(Phase::Unpack, "a.tar", []);
        builder.add_warning(Phase::Scan, "src/test/data.bin", "scan error");
        builder.add_items(3);

        let report = builder.build();
        assert!(!report.messages.contains_key(&Phase::Unpack));
        assert_eq!(report.count(Phase::Scan, Severity::Warning), 1);
        assert_eq!(report.count(Phase::Scan, Severity::Error), 0);
        assert_eq!(report.number_of_items, 3);

        let json = serde_json::to_value(&report).expect("must serialize");
        assert_eq!(json["numberOfItems"], 3);
        assert!(json["messages"]["scan"]["src/test/data.bin"].is_array());
    }
}
