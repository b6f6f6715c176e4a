// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Test report ingestion. Reports in TAP13, JUnit XML, Subunit v1 and Subunit
//! v2 are decoded into one model ([`Report`] → [`Suite`] → [`Test`]) that
//! reporting tools can walk without caring where the results came from.
//!
//! For the Subunit protocol definition, see the [Subunit Protocol
//! Specification](https://github.com/testing-cabal/subunit/blob/main/README.rst).
//!
//! ```no_run
//! use testres::{config::Config, dispatch};
//!
//! let report = dispatch::process_file("results/unit.tap", &Config::default()).unwrap();
//! let counts = report.class_counts();
//! println!("{} passed, {} failed", counts.pass, counts.fail);
//! ```

pub mod types {
    pub mod number;
    pub mod packet;
    pub mod packetflags;
    pub mod report;
    pub mod teststatus;
    pub mod timestamp;
}

pub mod config;
pub mod deserialize;
pub mod dispatch;
pub mod junit;
pub mod tap;
pub mod v1;
pub mod v2;
pub mod constants {
    pub static V2_SIGNATURE: u8 = 0xb3;
    /// Exclusive upper bound on the total size of one v2 packet.
    pub static PACKET_MAX_LENGTH: u32 = 4194303;
    pub static MAX_NUMBER_VALUE: u32 = 0x3fffffff;
    pub static NUMBER_KIND_MASK: u8 = 0xc0;
    pub static NUMBER_VALUE_MASK: u8 = 0x3f;
    pub static VERSION2: u16 = 0x2000;
    pub static VERSION_MASK: u16 = 0xf000;
    pub static STATUS_MASK: u16 = 0x0007;
}

use std::fmt::Debug;

use thiserror::Error as ThisError;

pub use types::report::{Format, Report, Suite, Test};
pub use types::teststatus::{Status, StatusClass};

#[derive(ThisError)]
pub enum Error {
    #[error("Value is too large to encode")]
    TooLarge,
    #[error("Truncated input: need {} bytes, {} available", _0, _1)]
    TruncatedInput(usize, usize),
    #[error("Invalid signature {:#04x}", _0)]
    BadSignature(u8),
    #[error("Unsupported protocol version {}", _0)]
    UnsupportedVersion(u8),
    #[error("Reserved flag bit set")]
    ReservedFlag,
    #[error("Packet length {} exceeds the maximum", _0)]
    PacketTooLarge(u32),
    #[error("Invalid packet header: size {} < header size {}", _0, _1)]
    LengthTooSmall(u32, u32),
    #[error("Packet length {} does not match field bytes {}", _0, _1)]
    LengthMismatch(u32, u32),
    #[error("CRC32 Mismatch measured: {computed:#010x} != stored: {stored:#010x}")]
    ChecksumMismatch { computed: u32, stored: u32 },
    #[error("Invalid timestamp secs: {} nsecs: {}", _0, _1)]
    InvalidTimestamp(u32, u32),
    #[error("Malformed XML at line {line}: {message}")]
    MalformedDocument { line: usize, message: String },
    #[error("Malformed TAP result at line {line}: {text:?}")]
    MalformedResultLine { line: usize, text: String },
    #[error("TAP test {found} out of order at line {line}; expected {expected}")]
    OutOfOrderTest {
        line: usize,
        found: u32,
        expected: u32,
    },
    #[error("TAP numbering at line {line} skips from {from} to {to}, more than the allowed gap")]
    GapTooLarge { line: usize, from: u32, to: u32 },
    #[error("Duplicate TAP plan at line {}", _0)]
    DuplicatePlan(usize),
    #[error("Invalid TAP plan at line {line}: {text:?}")]
    InvalidPlan { line: usize, text: String },
    #[error("IO Error: {}", _0)]
    Io(#[from] std::io::Error),
}

impl Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
