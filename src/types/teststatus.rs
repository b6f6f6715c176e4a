//! Test statuses: the Subunit wire status, the unified status every decoder
//! produces, and the pass/fail/skip classification.

use serde::Serialize;

/// Status of a test case as carried in the low three bits of a Subunit v2
/// flag word.
/// [Docs](https://github.com/testing-cabal/subunit/blob/fc698775674fcbdb9fcc8286d8358c7185647db4/README.rst?plain=1#L287)
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum SubunitStatus {
    /// The test case status is undefined or the packet was received outside of a test case
    Undefined = 0x0,
    /// The test was enumerated but not run
    Enumeration = 0x1,
    /// The test is in progress
    InProgress = 0x2,
    /// The test was successful
    Success = 0x3,
    /// The test was successful but was expected to fail
    UnexpectedSuccess = 0x4,
    /// The test was skipped
    Skipped = 0x5,
    /// The test failed
    Failed = 0x6,
    /// The test failed as was expected
    ExpectedFailure = 0x7,
}

impl From<u16> for SubunitStatus {
    fn from(value: u16) -> Self {
        match value & crate::constants::STATUS_MASK {
            0x0 => Self::Undefined,
            0x1 => Self::Enumeration,
            0x2 => Self::InProgress,
            0x3 => Self::Success,
            0x4 => Self::UnexpectedSuccess,
            0x5 => Self::Skipped,
            0x6 => Self::Failed,
            _ /* 0x7 */ => Self::ExpectedFailure,
        }
    }
}

/// Status of a normalized test, whatever format it came from.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    // TAP
    Ok,
    NotOk,
    Missing,
    Todo,
    Skip,
    // Subunit
    Undefined,
    Enumeration,
    InProgress,
    Success,
    UxSuccess,
    Skipped,
    Failed,
    XFailure,
    // JUnit
    Error,
    Failure,
    Pass,
}

/// Coarse outcome of a test.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    Pass,
    Fail,
    Skip,
}

impl Status {
    pub fn class(self) -> StatusClass {
        match self {
            Status::Ok | Status::Pass | Status::Success => StatusClass::Pass,
            Status::NotOk
            | Status::Error
            | Status::Failure
            | Status::Failed
            | Status::XFailure
            | Status::UxSuccess => StatusClass::Fail,
            Status::Missing
            | Status::Todo
            | Status::Skip
            | Status::Skipped
            | Status::Undefined
            | Status::Enumeration
            | Status::InProgress => StatusClass::Skip,
        }
    }
}

impl From<SubunitStatus> for Status {
    fn from(value: SubunitStatus) -> Self {
        match value {
            SubunitStatus::Undefined => Status::Undefined,
            SubunitStatus::Enumeration => Status::Enumeration,
            SubunitStatus::InProgress => Status::InProgress,
            SubunitStatus::Success => Status::Success,
            SubunitStatus::UnexpectedSuccess => Status::UxSuccess,
            SubunitStatus::Skipped => Status::Skipped,
            SubunitStatus::Failed => Status::Failed,
            SubunitStatus::ExpectedFailure => Status::XFailure,
        }
    }
}
