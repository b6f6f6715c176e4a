//! Options shared by the decoders and the file drivers.

use serde::Deserialize;

/// Default for [`Config::max_gap`].
pub const DEFAULT_MAX_GAP: u32 = 100_000;

/// Decoder and driver options. Every field has a default, so an empty
/// configuration document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Coalesce consecutive identical TAP results into one test with a
    /// repeat count.
    pub fold_repeated: bool,
    /// Abort a directory scan on the first report that fails to decode
    /// instead of recording the failure and moving on.
    pub fail_fast: bool,
    /// Largest run of unreported TAP test numbers that is filled with
    /// `Missing` results. A wider gap fails the report.
    pub max_gap: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fold_repeated: false,
            fail_fast: false,
            max_gap: DEFAULT_MAX_GAP,
        }
    }
}

impl Config {
    #[must_use]
    pub fn with_fold_repeated(mut self, fold_repeated: bool) -> Self {
        self.fold_repeated = fold_repeated;
        self
    }

    #[must_use]
    pub fn with_max_gap(mut self, max_gap: u32) -> Self {
        self.max_gap = max_gap;
        self
    }

    #[must_use]
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}
