//! The normalized report model shared by every decoder.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::teststatus::{Status, StatusClass};

/// Input formats understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    Tap13,
    #[serde(rename = "junit")]
    JUnit,
    SubunitV1,
    SubunitV2,
    Unknown,
}

/// One test result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Test {
    pub name: String,
    pub status: Status,
    /// Seconds.
    pub duration: Option<f64>,
    pub comment: Option<String>,
    pub error: Option<String>,
    pub system_out: Option<String>,
    pub system_err: Option<String>,
    pub tags: Vec<String>,
    /// How many identical consecutive results this entry stands for.
    pub repeat: u32,
}

impl Test {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Test {
            name: name.into(),
            status,
            duration: None,
            comment: None,
            error: None,
            system_out: None,
            system_err: None,
            tags: Vec::new(),
            repeat: 1,
        }
    }

    pub fn class(&self) -> StatusClass {
        self.status.class()
    }

    /// Append named attachment content to the field it belongs in. Only the
    /// part of `name` before the first `:` matters: `stderr`, `traceback` and
    /// `reason` go to `system_err`, `error` and `comment`, anything else to
    /// `system_out`.
    pub fn attach(&mut self, name: &str, content: &str) {
        let slot = match name.split(':').next().unwrap_or(name) {
            "stderr" => &mut self.system_err,
            "traceback" => &mut self.error,
            "reason" => &mut self.comment,
            _ => &mut self.system_out,
        };
        slot.get_or_insert_with(String::new).push_str(content);
    }
}

/// An ordered group of tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Suite {
    pub name: String,
    pub hostname: Option<String>,
    pub timestamp: Option<String>,
    pub failure_count: u32,
    pub error_count: u32,
    /// Seconds.
    pub duration: f64,
    pub tests: Vec<Test>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Suite {
            name: name.into(),
            ..Default::default()
        }
    }

    /// A suite for formats without suite metadata. Counts and duration are
    /// derived from the tests.
    pub fn from_tests(name: impl Into<String>, tests: Vec<Test>) -> Self {
        let failure_count = tests
            .iter()
            .filter(|test| test.class() == StatusClass::Fail && test.status != Status::Error)
            .count();
        let error_count = tests
            .iter()
            .filter(|test| test.status == Status::Error)
            .count();
        Suite {
            name: name.into(),
            failure_count: u32::try_from(failure_count).unwrap_or(u32::MAX),
            error_count: u32::try_from(error_count).unwrap_or(u32::MAX),
            duration: tests.iter().filter_map(|test| test.duration).sum(),
            tests,
            ..Default::default()
        }
    }
}

/// Pass/fail/skip tally of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounts {
    pub pass: usize,
    pub fail: usize,
    pub skip: usize,
}

impl ClassCounts {
    pub fn total(&self) -> usize {
        self.pass + self.fail + self.skip
    }
}

/// Everything decoded from one input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub format: Format,
    pub path: PathBuf,
    /// Stable identifier derived from the path.
    pub id: String,
    /// Modification time of the input file.
    pub created_at: Option<DateTime<Utc>>,
    pub suites: Vec<Suite>,
}

impl Report {
    pub fn tests(&self) -> impl Iterator<Item = &Test> {
        self.suites.iter().flat_map(|suite| suite.tests.iter())
    }

    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|suite| suite.tests.len()).sum()
    }

    pub fn count_by_class(&self, class: StatusClass) -> usize {
        self.tests().filter(|test| test.class() == class).count()
    }

    pub fn class_counts(&self) -> ClassCounts {
        let mut counts = ClassCounts::default();
        for test in self.tests() {
            match test.class() {
                StatusClass::Pass => counts.pass += 1,
                StatusClass::Fail => counts.fail += 1,
                StatusClass::Skip => counts.skip += 1,
            }
        }
        counts
    }

    /// True if any test name contains `query`.
    pub fn has_test_matching(&self, query: &str) -> bool {
        self.tests().any(|test| test.name.contains(query))
    }
}

/// Reports holding at least one test whose name contains `query`, in input
/// order.
pub fn filter_reports<'a>(reports: &'a [Report], query: &str) -> Vec<&'a Report> {
    reports
        .iter()
        .filter(|report| report.has_test_matching(query))
        .collect()
}

pub fn find_report<'a>(reports: &'a [Report], id: &str) -> Option<&'a Report> {
    reports.iter().find(|report| report.id == id)
}
