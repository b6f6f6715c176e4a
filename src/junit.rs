//! JUnit XML.
//!
//! The document is read with a pull parser; all state lives in one
//! [`JunitState`] value threaded through the event loop. Nested
//! `<testsuite>` elements are flattened in the order they close.

use std::{fmt::Display, io::Read, num::IntErrorKind};

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use tracing::{debug, trace};

use crate::{
    types::{
        report::{Suite, Test},
        teststatus::Status,
    },
    Error, Result,
};

type XmlResult<T> = std::result::Result<T, quick_xml::Error>;

/// Which field text content is currently appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Error,
    SystemOut,
    SystemErr,
}

#[derive(Debug, Default)]
struct JunitState {
    /// Closed suites, in closing order.
    suites: Vec<Suite>,
    /// Suites still open, innermost last.
    open: Vec<Suite>,
    /// Holds testcases found outside any suite.
    implicit: Option<Suite>,
    test: Option<Test>,
    capture: Option<Capture>,
}

fn attribute(element: &BytesStart, key: &[u8]) -> XmlResult<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Parse a count attribute. Missing or malformed values count as zero,
/// values too large for a u32 as u32::MAX.
fn saturating_count(value: Option<&str>) -> u32 {
    let Some(text) = value.map(str::trim) else {
        return 0;
    };
    match text.parse::<u64>() {
        Ok(n) => u32::try_from(n).unwrap_or(u32::MAX),
        Err(e) if *e.kind() == IntErrorKind::PosOverflow => u32::MAX,
        Err(_) => {
            debug!(value = text, "treating malformed count as 0");
            0
        }
    }
}

/// Parse a `time` attribute in seconds.
fn seconds(value: Option<&str>) -> Option<f64> {
    let text = value?.trim();
    match text.parse::<f64>() {
        Ok(secs) if secs.is_finite() => Some(secs),
        _ => {
            debug!(value = text, "ignoring malformed time");
            None
        }
    }
}

impl JunitState {
    fn start(&mut self, element: &BytesStart) -> XmlResult<()> {
        match element.name().as_ref() {
            b"testsuite" => {
                let mut suite = Suite::new(attribute(element, b"name")?.unwrap_or_default());
                suite.hostname = attribute(element, b"hostname")?;
                suite.timestamp = attribute(element, b"timestamp")?;
                suite.error_count = saturating_count(attribute(element, b"errors")?.as_deref());
                suite.failure_count =
                    saturating_count(attribute(element, b"failures")?.as_deref());
                suite.duration = seconds(attribute(element, b"time")?.as_deref()).unwrap_or(0.0);
                self.open.push(suite);
            }
            b"testcase" => {
                let mut test = Test::new(
                    attribute(element, b"name")?.unwrap_or_default(),
                    Status::Pass,
                );
                test.duration = seconds(attribute(element, b"time")?.as_deref());
                if let Some(unclosed) = self.test.replace(test) {
                    debug!(test = %unclosed.name, "testcase nested in testcase");
                    self.append(unclosed);
                }
            }
            name @ (b"error" | b"failure" | b"skipped") => {
                let Some(test) = self.test.as_mut() else {
                    trace!("outcome element outside a testcase");
                    return Ok(());
                };
                test.status = match name {
                    b"error" => Status::Error,
                    b"failure" => Status::Failure,
                    _ => Status::Skipped,
                };
                let message = match attribute(element, b"message")? {
                    Some(message) => Some(message),
                    None => attribute(element, b"comment")?,
                };
                if message.is_some() {
                    test.comment = message;
                }
                if name != b"skipped" {
                    self.capture = Some(Capture::Error);
                }
            }
            b"system-out" => self.capture = Some(Capture::SystemOut),
            b"system-err" => self.capture = Some(Capture::SystemErr),
            _ => {}
        }
        Ok(())
    }

    fn end(&mut self, name: &[u8]) {
        match name {
            b"testsuite" => {
                if let Some(suite) = self.open.pop() {
                    self.suites.push(suite);
                }
            }
            b"testcase" => {
                if let Some(test) = self.test.take() {
                    self.append(test);
                }
                self.capture = None;
            }
            b"error" | b"failure" | b"system-out" | b"system-err" => self.capture = None,
            _ => {}
        }
    }

    fn append(&mut self, test: Test) {
        let suite = match self.open.last_mut() {
            Some(suite) => suite,
            None => self.implicit.get_or_insert_with(Suite::default),
        };
        suite.tests.push(test);
    }

    fn text(&mut self, text: &str) {
        let (Some(capture), Some(test)) = (self.capture, self.test.as_mut()) else {
            return;
        };
        let slot = match capture {
            Capture::Error => &mut test.error,
            Capture::SystemOut => &mut test.system_out,
            Capture::SystemErr => &mut test.system_err,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    fn finish(mut self) -> Vec<Suite> {
        if let Some(implicit) = self.implicit.take() {
            self.suites.push(implicit);
        }
        self.suites
    }
}

fn malformed(document: &[u8], position: u64, message: impl Display) -> Error {
    let end = usize::try_from(position)
        .unwrap_or(usize::MAX)
        .min(document.len());
    let line = 1 + document[..end].iter().filter(|&&b| b == b'\n').count();
    Error::MalformedDocument {
        line,
        message: message.to_string(),
    }
}

/// Decode a JUnit XML document into its suites.
pub fn parse_junit<R: Read>(mut reader: R) -> Result<Vec<Suite>> {
    let mut document = Vec::new();
    reader.read_to_end(&mut document)?;

    let mut xml = Reader::from_reader(&document[..]);
    let mut state = JunitState::default();
    let mut depth = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let event = xml
            .read_event_into(&mut buf)
            .map_err(|e| malformed(&document, xml.error_position() as u64, e))?;
        let handled = match event {
            Event::Start(element) => {
                depth += 1;
                state.start(&element)
            }
            Event::Empty(element) => {
                let result = state.start(&element);
                state.end(element.name().as_ref());
                result
            }
            Event::End(element) => {
                depth = depth.saturating_sub(1);
                state.end(element.name().as_ref());
                Ok(())
            }
            Event::Text(text) => text.unescape().map(|text| state.text(&text)),
            Event::CData(data) => {
                state.text(&String::from_utf8_lossy(&data.into_inner()));
                Ok(())
            }
            Event::Eof if depth > 0 => {
                return Err(malformed(
                    &document,
                    document.len() as u64,
                    "document ended inside an element",
                ));
            }
            Event::Eof => break,
            _ => Ok(()),
        };
        handled.map_err(|e| malformed(&document, xml.buffer_position() as u64, e))?;
    }
    Ok(state.finish())
}

#[cfg(test)]
mod tests {
    use super::{parse_junit, saturating_count};
    use crate::{types::teststatus::Status, Error};

    #[test]
    fn test_minimal_suite() {
        let xml = r#"<testsuite errors="1" failures="0"><testcase name="t1" time="0.5"/></testsuite>"#;
        let suites = parse_junit(xml.as_bytes()).unwrap();
        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].error_count, 1);
        assert_eq!(suites[0].failure_count, 0);
        let test = &suites[0].tests[0];
        assert_eq!(test.name, "t1");
        assert_eq!(test.status, Status::Pass);
        assert_eq!(test.duration, Some(0.5));
    }

    #[test]
    fn test_outcomes_and_output() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<testsuites>
  <testsuite name="pkg" hostname="ci-7" timestamp="2024-01-01T00:00:00" time="2.5" failures="1" errors="1">
    <testcase name="fails" time="1.0">
      <failure message="expected 1 &lt; 0" type="AssertionError">assert 1 &lt; 0</failure>
      <system-out><![CDATA[printed <raw>]]></system-out>
      <system-err>warning</system-err>
    </testcase>
    <testcase name="errors"><error message="boom"/></testcase>
    <testcase name="skips"><skipped/></testcase>
  </testsuite>
</testsuites>
"#;
        let suites = parse_junit(xml.as_bytes()).unwrap();
        assert_eq!(suites.len(), 1);
        let suite = &suites[0];
        assert_eq!(suite.name, "pkg");
        assert_eq!(suite.hostname.as_deref(), Some("ci-7"));
        assert_eq!(suite.timestamp.as_deref(), Some("2024-01-01T00:00:00"));
        assert_eq!(suite.duration, 2.5);

        let fails = &suite.tests[0];
        assert_eq!(fails.status, Status::Failure);
        assert_eq!(fails.comment.as_deref(), Some("expected 1 < 0"));
        assert_eq!(fails.error.as_deref(), Some("assert 1 < 0"));
        assert_eq!(fails.system_out.as_deref(), Some("printed <raw>"));
        assert_eq!(fails.system_err.as_deref(), Some("warning"));

        assert_eq!(suite.tests[1].status, Status::Error);
        assert_eq!(suite.tests[1].comment.as_deref(), Some("boom"));
        assert_eq!(suite.tests[1].error, None);
        assert_eq!(suite.tests[2].status, Status::Skipped);
        assert_eq!(suite.tests[2].duration, None);
    }

    #[test]
    fn test_nested_suites_flatten_in_closing_order() {
        let xml = r#"<testsuites>
<testsuite name="outer">
  <testsuite name="inner"><testcase name="a"/></testsuite>
  <testcase name="b"/>
</testsuite>
</testsuites>"#;
        let suites = parse_junit(xml.as_bytes()).unwrap();
        let names: Vec<_> = suites.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["inner", "outer"]);
        assert_eq!(suites[0].tests[0].name, "a");
        assert_eq!(suites[1].tests[0].name, "b");
    }

    #[test]
    fn test_orphan_testcase_gets_implicit_suite() {
        let xml = r#"<testsuites><testcase name="lonely"/></testsuites>"#;
        let suites = parse_junit(xml.as_bytes()).unwrap();
        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].name, "");
        assert_eq!(suites[0].tests[0].name, "lonely");
    }

    #[test]
    fn test_saturating_counts() {
        assert_eq!(saturating_count(None), 0);
        assert_eq!(saturating_count(Some("abc")), 0);
        assert_eq!(saturating_count(Some("-3")), 0);
        assert_eq!(saturating_count(Some(" 7 ")), 7);
        assert_eq!(saturating_count(Some("4294967296")), u32::MAX);
        assert_eq!(saturating_count(Some("99999999999999999999999")), u32::MAX);
    }

    #[test]
    fn test_malformed_attributes_are_tolerated() {
        let xml = r#"<testsuite failures="many" time="soon"><testcase name="t" time="x"/></testsuite>"#;
        let suites = parse_junit(xml.as_bytes()).unwrap();
        assert_eq!(suites[0].failure_count, 0);
        assert_eq!(suites[0].duration, 0.0);
        assert_eq!(suites[0].tests[0].duration, None);
    }

    #[test]
    fn test_mismatched_end_tag() {
        let xml = "<testsuite>\n<testcase>\n</testsuite>\n";
        assert!(matches!(
            parse_junit(xml.as_bytes()),
            Err(Error::MalformedDocument { line: 3, .. })
        ));
    }

    #[test]
    fn test_document_ends_inside_element() {
        let xml = "<testsuite name=\"x\">\n<testcase name=\"a\"/>\n";
        assert!(matches!(
            parse_junit(xml.as_bytes()),
            Err(Error::MalformedDocument { line: 3, .. })
        ));
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_junit(&b""[..]).unwrap().is_empty());
    }
}
