//! V1 protocol implementation.
//!
//! Subunit v1 is line oriented: each line starts with a directive such as
//! `test:`, `success:` or `time:`. Outcome lines may be followed by details,
//! either bracketed text running until a line holding only `]`, or
//! `[ multipart` details made of named parts in chunked encoding.
//!
//! [`parse_line`] decodes a single line; [`parse_subunit_v1`] folds a whole
//! stream into one suite, picking up durations, tags and details along the
//! way.

use std::{collections::HashMap, io::Read};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, trace, warn};
use winnow::Parser;

use crate::{
    types::{
        report::{Suite, Test},
        teststatus::Status,
    },
    Result,
};

/// A v1 line directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    Test,
    Success,
    Failure,
    Error,
    Skip,
    XFail,
    UxSuccess,
    Progress,
    Tags,
    Time,
}

impl Directive {
    /// Resolve the first token of a line, ignoring case.
    pub fn resolve(token: &str) -> Option<Directive> {
        let directive = match token.to_ascii_lowercase().as_str() {
            "test" | "test:" | "testing" | "testing:" => Directive::Test,
            "success" | "success:" | "successful" | "successful:" => Directive::Success,
            "failure:" => Directive::Failure,
            "error:" => Directive::Error,
            "skip" | "skip:" => Directive::Skip,
            "xfail" | "xfail:" => Directive::XFail,
            "uxsuccess" | "uxsuccess:" => Directive::UxSuccess,
            "progress:" => Directive::Progress,
            "tags:" => Directive::Tags,
            "time:" => Directive::Time,
            _ => return None,
        };
        Some(directive)
    }

    /// The status an outcome directive assigns, `None` for the others.
    pub fn status(self) -> Option<Status> {
        match self {
            Directive::Success => Some(Status::Success),
            Directive::Failure => Some(Status::Failure),
            Directive::Error => Some(Status::Failed),
            Directive::Skip => Some(Status::Skipped),
            Directive::XFail => Some(Status::XFailure),
            Directive::UxSuccess => Some(Status::UxSuccess),
            Directive::Test | Directive::Progress | Directive::Tags | Directive::Time => None,
        }
    }
}

/// How the details following an outcome line are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailStyle {
    Bracketed,
    MultiPart,
}

fn detail_style(line: &str) -> Option<DetailStyle> {
    let line = line.trim_end();
    if line.ends_with("[ multipart") {
        Some(DetailStyle::MultiPart)
    } else if line.ends_with('[') {
        Some(DetailStyle::Bracketed)
    } else {
        None
    }
}

/// One named part of multipart details.
#[derive(Debug, PartialEq)]
struct Part {
    name: String,
    content: Vec<u8>,
}

mod parser {
    //! Line and detail grammar.

    use winnow::{
        ascii::{hex_uint, line_ending, space0},
        combinator::{alt, eof, not, opt, preceded, repeat, repeat_till, terminated},
        error::{ContextError, ErrMode},
        token::{take, take_till, take_while},
        Parser,
    };

    use super::{Directive, Part};

    type PResult<T> = Result<T, ErrMode<ContextError>>;

    fn token<'s>(input: &mut &'s str) -> PResult<&'s str> {
        preceded(space0, take_till(1.., char::is_whitespace)).parse_next(input)
    }

    /// The leading directive of a line.
    pub fn directive(input: &mut &str) -> PResult<Directive> {
        token.verify_map(Directive::resolve).parse_next(input)
    }

    /// The test name after a directive. A literal `test` token in front of
    /// the name is dropped.
    pub fn test_name<'s>(input: &mut &'s str) -> PResult<&'s str> {
        let first = token.parse_next(input)?;
        if first == "test" {
            let mut after = *input;
            if let Ok(name) = token.parse_next(&mut after) {
                *input = after;
                return Ok(name);
            }
        }
        Ok(first)
    }

    /// One line without its `\n`. Fails only at the end of input.
    pub fn line<'s>(input: &mut &'s [u8]) -> PResult<&'s [u8]> {
        alt((
            terminated(take_till(0.., b'\n'), b"\n"),
            take_while(1.., |_: u8| true),
        ))
        .parse_next(input)
    }

    fn raw_line<'s>(input: &mut &'s [u8]) -> PResult<&'s [u8]> {
        alt((
            (take_till(0.., b'\n'), b"\n").take(),
            take_while(1.., |_: u8| true),
        ))
        .parse_next(input)
    }

    /// A line holding only `]`.
    fn close(input: &mut &[u8]) -> PResult<()> {
        (b"]", take_while(0.., (b' ', b'\t', b'\r')), alt((line_ending, eof)))
            .void()
            .parse_next(input)
    }

    /// Bracketed details, verbatim up to the closing line. The flag is false
    /// when the input ended before the closing line.
    pub fn bracketed<'s>(input: &mut &'s [u8]) -> PResult<(&'s [u8], bool)> {
        (
            repeat::<_, _, (), _, _>(0.., preceded(not(close), raw_line)).take(),
            opt(close).map(|closed| closed.is_some()),
        )
            .parse_next(input)
    }

    /// One length-prefixed chunk; the length is hexadecimal.
    fn chunk<'s>(input: &mut &'s [u8]) -> PResult<&'s [u8]> {
        let len: u32 = terminated(hex_uint, b"\r\n").parse_next(input)?;
        take(len as usize).parse_next(input)
    }

    /// `Content-Type:` line, part name line, then chunks up to an empty one.
    fn part(input: &mut &[u8]) -> PResult<Part> {
        let name = preceded((b"Content-Type: ", line), line).parse_next(input)?;
        let (chunks, _): (Vec<&[u8]>, _) =
            repeat_till(0.., chunk, b"0\r\n").parse_next(input)?;
        Ok(Part {
            name: String::from_utf8_lossy(name).trim_end().to_string(),
            content: chunks.concat(),
        })
    }

    /// Multipart details up to and including the closing line.
    pub fn multipart(input: &mut &[u8]) -> PResult<Vec<Part>> {
        repeat_till(0.., part, close)
            .map(|(parts, ())| parts)
            .parse_next(input)
    }

    #[cfg(test)]
    mod tests {
        use winnow::Parser;

        use super::{bracketed, directive, line, multipart, test_name};
        use crate::v1::{Directive, Part};

        #[test]
        fn test_directive_and_name() {
            let mut input = "  Failure: test mytest details";
            assert_eq!(directive.parse_next(&mut input).unwrap(), Directive::Failure);
            assert_eq!(test_name.parse_next(&mut input).unwrap(), "mytest");
            assert_eq!(input, " details");
            assert!(directive.parse_next(&mut "bogus: foo").is_err());
            assert!(test_name.parse_next(&mut "").is_err());
        }

        #[test]
        fn test_line() {
            let mut input = &b"one\r\ntwo"[..];
            assert_eq!(line.parse_next(&mut input).unwrap(), b"one\r");
            assert_eq!(line.parse_next(&mut input).unwrap(), b"two");
            assert!(line.parse_next(&mut input).is_err());
        }

        #[test]
        fn test_bracketed() {
            let mut input = &b"a\n ]\n]\r\nrest\n"[..];
            assert_eq!(bracketed.parse_next(&mut input).unwrap(), (&b"a\n ]\n"[..], true));
            assert_eq!(input, b"rest\n");
            let mut input = &b"cut\nshort"[..];
            assert_eq!(
                bracketed.parse_next(&mut input).unwrap(),
                (&b"cut\nshort"[..], false)
            );
        }

        #[test]
        fn test_multipart() {
            let mut input = &b"Content-Type: text/plain\ntraceback\n3\r\nboo2\r\n]\n0\r\nContent-Type: text/plain;charset=utf8\nreason\nC\r\n0123456789\r\n0\r\n]\nnext\n"[..];
            let parts = multipart.parse_next(&mut input).unwrap();
            assert_eq!(
                parts,
                vec![
                    Part {
                        name: "traceback".to_string(),
                        content: b"boo]\n".to_vec(),
                    },
                    Part {
                        name: "reason".to_string(),
                        content: b"0123456789\r\n".to_vec(),
                    },
                ]
            );
            assert_eq!(input, b"next\n");
        }

        #[test]
        fn test_multipart_malformed() {
            assert!(multipart.parse_next(&mut &b"no header\n]\n"[..]).is_err());
            assert!(multipart
                .parse_next(&mut &b"Content-Type: text/plain\nx\nff\r\nshort"[..])
                .is_err());
        }
    }
}

/// Decode one line. Only outcome lines with a test name produce a [`Test`];
/// everything else, including unknown directives, yields `None`.
pub fn parse_line(line: &str) -> Option<Test> {
    let mut input = line;
    let status = parser::directive.parse_next(&mut input).ok()?.status()?;
    let name = parser::test_name.parse_next(&mut input).ok()?;
    Some(Test::new(name, status))
}

/// Parse the timestamp of a `time:` line.
/// time: YYYY-MM-DD HH:MM:SSZ
pub fn parse_time(line: &str) -> Option<DateTime<Utc>> {
    let mut input = line;
    parser::directive
        .verify(|directive: &Directive| *directive == Directive::Time)
        .parse_next(&mut input)
        .ok()?;
    // Fractional seconds are optional.
    NaiveDateTime::parse_from_str(input.trim(), "%Y-%m-%d %H:%M:%S%.fZ")
        .ok()
        .map(|time| time.and_utc())
}

#[derive(Debug, Default)]
struct StreamState {
    tests: Vec<Test>,
    now: Option<DateTime<Utc>>,
    started: HashMap<String, DateTime<Utc>>,
    tags: Vec<String>,
}

impl StreamState {
    /// Handle one line. Details following an outcome are consumed from
    /// `input`.
    fn feed(&mut self, line: &str, input: &mut &[u8]) {
        let mut rest = line;
        let Ok(directive) = parser::directive.parse_next(&mut rest) else {
            trace!(line, "ignoring unrecognized line");
            return;
        };
        match directive {
            Directive::Test => {
                if let (Ok(name), Some(now)) = (parser::test_name.parse_next(&mut rest), self.now)
                {
                    self.started.insert(name.to_string(), now);
                }
            }
            Directive::Time => match parse_time(line) {
                Some(time) => self.now = Some(time),
                None => debug!(line, "ignoring malformed time"),
            },
            Directive::Tags => {
                for tag in rest.split_whitespace() {
                    if let Some(removed) = tag.strip_prefix('-') {
                        self.tags.retain(|t| t != removed);
                    } else if !self.tags.iter().any(|t| t == tag) {
                        self.tags.push(tag.to_string());
                    }
                }
            }
            Directive::Progress => trace!(line, "ignoring progress"),
            _ => self.outcome(line, input),
        }
    }

    fn outcome(&mut self, line: &str, input: &mut &[u8]) {
        let Some(mut test) = parse_line(line) else {
            debug!(line, "ignoring outcome without a test name");
            return;
        };
        if let (Some(start), Some(end)) = (self.started.remove(&test.name), self.now) {
            test.duration = (end - start).to_std().ok().map(|d| d.as_secs_f64());
        }
        test.tags = self.tags.clone();

        match detail_style(line) {
            Some(DetailStyle::MultiPart) => multipart_details(&mut test, input),
            Some(DetailStyle::Bracketed) => bracketed_details(&mut test, input),
            None => {}
        }
        self.tests.push(test);
    }

    fn finish(self) -> Suite {
        Suite::from_tests("", self.tests)
    }
}

fn bracketed_details(test: &mut Test, input: &mut &[u8]) {
    let Ok((details, closed)) = parser::bracketed.parse_next(input) else {
        return;
    };
    if !closed {
        warn!(test = %test.name, "stream ended inside bracketed details");
    }
    let details = String::from_utf8_lossy(details).into_owned();
    match test.status {
        Status::Failure | Status::Failed => test.error = Some(details),
        _ => test.comment = Some(details),
    }
}

/// Decode multipart details into the test's fields, keeping them verbatim
/// when they are not well formed.
fn multipart_details(test: &mut Test, input: &mut &[u8]) {
    let mut attempt = *input;
    match parser::multipart.parse_next(&mut attempt) {
        Ok(parts) => {
            *input = attempt;
            for part in parts {
                test.attach(&part.name, &String::from_utf8_lossy(&part.content));
            }
        }
        Err(_) => {
            debug!(test = %test.name, "malformed multipart details, keeping them as text");
            bracketed_details(test, input);
        }
    }
}

/// Decode a whole v1 stream into one synthesized suite. Text that is not
/// valid UTF-8 is decoded lossily; unrecognized lines are skipped.
pub fn parse_subunit_v1<R: Read>(mut reader: R) -> Result<Vec<Suite>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let mut input = &bytes[..];
    let mut state = StreamState::default();
    while let Ok(line) = parser::line.parse_next(&mut input) {
        let line = String::from_utf8_lossy(line);
        state.feed(line.trim_end_matches('\r'), &mut input);
    }
    Ok(vec![state.finish()])
}
