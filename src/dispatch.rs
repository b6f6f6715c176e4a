//! Format detection and the file and directory drivers.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::{
    config::Config,
    junit::parse_junit,
    tap::parse_tap,
    types::report::{Format, Report},
    v1::parse_subunit_v1,
    v2::{is_subunit_v2, parse_subunit_v2},
    Error, Result,
};

/// Decide the format of a file from its extension, ignoring case. `.subunit`
/// files are told apart by their first byte.
pub fn detect_format(path: impl AsRef<Path>) -> Result<Format> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
    Ok(match extension.as_deref() {
        Some("xml") => Format::JUnit,
        Some("tap") => Format::Tap13,
        Some("subunit") => {
            let mut first = [0u8; 1];
            let read = File::open(path)?.read(&mut first)?;
            if read == 1 && is_subunit_v2(&first) {
                Format::SubunitV2
            } else {
                Format::SubunitV1
            }
        }
        _ => Format::Unknown,
    })
}

/// Identifier of the report at `path`: the SHA-1 of the raw path bytes, each
/// digest byte rendered as unpadded lowercase hex.
pub fn report_id(path: impl AsRef<Path>) -> String {
    let digest = Sha1::digest(path.as_ref().as_os_str().as_encoded_bytes());
    digest.iter().map(|byte| format!("{byte:x}")).collect()
}

/// Decode one report file.
pub fn process_file(path: impl AsRef<Path>, config: &Config) -> Result<Report> {
    let path = path.as_ref();
    process_as(path, detect_format(path)?, config)
}

fn process_as(path: &Path, format: Format, config: &Config) -> Result<Report> {
    let created_at = std::fs::metadata(path)?
        .modified()
        .ok()
        .map(DateTime::<Utc>::from);

    let suites = match format {
        Format::Unknown => Vec::new(),
        Format::Tap13 => parse_tap(BufReader::new(File::open(path)?), config)?,
        Format::JUnit => parse_junit(File::open(path)?)?,
        Format::SubunitV1 => parse_subunit_v1(BufReader::new(File::open(path)?))?,
        Format::SubunitV2 => parse_subunit_v2(File::open(path)?)?,
    };
    debug!(
        path = %path.display(),
        format = ?format,
        suites = suites.len(),
        "processed report"
    );

    Ok(Report {
        format,
        path: path.to_path_buf(),
        id: report_id(path),
        created_at,
        suites,
    })
}

/// Outcome of a directory scan.
#[derive(Debug, Default)]
pub struct Scan {
    /// Decoded reports, ordered by file name.
    pub reports: Vec<Report>,
    /// Files that could not be decoded.
    pub failures: Vec<(PathBuf, Error)>,
}

/// Decode every report directly inside `dir`. Subdirectories are not
/// entered and files of unknown format are left out.
///
/// A file that fails to decode is recorded in [`Scan::failures`], unless
/// [`Config::fail_fast`] is set, in which case its error is returned.
pub fn process_dir(dir: impl AsRef<Path>, config: &Config) -> Result<Scan> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut scan = Scan::default();
    for path in paths {
        let result = detect_format(&path).and_then(|format| match format {
            Format::Unknown => Ok(None),
            _ => process_as(&path, format, config).map(Some),
        });
        match result {
            Ok(Some(report)) => scan.reports.push(report),
            Ok(None) => debug!(path = %path.display(), "skipping file of unknown format"),
            Err(e) if config.fail_fast => return Err(e),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to process report");
                scan.failures.push((path, e));
            }
        }
    }
    Ok(scan)
}
