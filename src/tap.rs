//! TAP version 13.
//!
//! Decoding is done in two phases. [`parse_tap_raw`] turns the text into a
//! flat list of [`TapTest`] nodes, validating numbering against the plan and
//! filling gaps with `Missing` nodes. [`parse_tap`] then optionally folds
//! repeated results and converts the nodes into the report model.

use std::io::BufRead;

use tracing::{debug, trace, warn};
use winnow::Parser;

use crate::{
    config::Config,
    types::{
        report::{Suite, Test},
        teststatus::Status,
    },
    Error, Result,
};

/// Status of a raw TAP node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapStatus {
    Ok,
    NotOk,
    /// Announced by the plan or skipped over by numbering, never reported.
    Missing,
    Todo,
    Skip,
}

impl From<TapStatus> for Status {
    fn from(value: TapStatus) -> Self {
        match value {
            TapStatus::Ok => Status::Ok,
            TapStatus::NotOk => Status::NotOk,
            TapStatus::Missing => Status::Missing,
            TapStatus::Todo => Status::Todo,
            TapStatus::Skip => Status::Skip,
        }
    }
}

/// One node of the raw TAP stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TapTest {
    pub number: u32,
    /// The description, if the result line had one.
    pub name: Option<String>,
    pub status: TapStatus,
    pub repeat: u32,
    /// Indented annotation lines (usually YAML) following the result.
    pub lines: Vec<String>,
}

impl TapTest {
    fn new(number: u32, name: Option<String>, status: TapStatus) -> Self {
        TapTest {
            number,
            name,
            status,
            repeat: 1,
            lines: Vec::new(),
        }
    }

    fn into_test(self) -> Test {
        let name = self.name.unwrap_or_else(|| self.number.to_string());
        let mut test = Test::new(name, self.status.into());
        test.repeat = self.repeat;
        if !self.lines.is_empty() {
            test.comment = Some(self.lines.join("\n"));
        }
        test
    }
}

mod parser {
    //! Line grammar for plans and results.

    use winnow::{
        ascii::{digit1, space1},
        combinator::{alt, eof, peek, preceded, separated_pair, terminated},
        error::{ContextError, ErrMode},
        Parser,
    };

    use super::TapStatus;

    type PResult<T> = Result<T, ErrMode<ContextError>>;

    fn number(input: &mut &str) -> PResult<u32> {
        digit1.parse_to().parse_next(input)
    }

    /// `<start>..<end>` spanning the whole input.
    pub fn plan(input: &mut &str) -> PResult<(u32, u32)> {
        terminated(separated_pair(number, "..", number), eof).parse_next(input)
    }

    /// `ok <n>` or `not ok <n>`. The description is left in the input.
    pub fn result(input: &mut &str) -> PResult<(TapStatus, u32)> {
        let status = alt((
            "not ok".value(TapStatus::NotOk),
            "ok".value(TapStatus::Ok),
        ))
        .parse_next(input)?;
        let number =
            preceded(space1, terminated(number, peek(alt((space1, eof))))).parse_next(input)?;
        Ok((status, number))
    }

}

#[derive(Debug, Clone, Copy)]
struct Plan {
    end: u32,
}

#[derive(Debug)]
struct RawState {
    tests: Vec<TapTest>,
    /// Number the next result must have at least. Wider than u32 so that a
    /// result numbered u32::MAX does not overflow it.
    next: u64,
    plan: Option<Plan>,
    max_gap: u32,
    /// Number of the last line seen.
    line_no: usize,
}

impl RawState {
    fn new(max_gap: u32) -> Self {
        RawState {
            tests: Vec::new(),
            next: 1,
            plan: None,
            max_gap,
            line_no: 0,
        }
    }

    fn line(&mut self, line_no: usize, text: &str) -> Result<()> {
        self.line_no = line_no;
        let text = text.trim_end_matches(['\n', '\r']);
        if text.trim().is_empty() {
            return Ok(());
        }
        // Indented lines belong to the YAML block of the current test, `#`
        // included.
        if text.starts_with(char::is_whitespace) {
            self.annotation(text);
            return Ok(());
        }

        let (body, comment) = match text.split_once('#') {
            Some((body, comment)) => (body, Some(comment.trim_start())),
            None => (text, None),
        };
        let body = body.trim_end();

        match body.chars().next() {
            Some(c) if c.is_ascii_digit() => self.plan(line_no, body)?,
            Some(_) if body.starts_with("ok") || body.starts_with("not ok") => {
                self.result(line_no, body)?
            }
            Some(_) => trace!(line = line_no, text = body, "ignoring line"),
            None => {}
        }

        if let Some(comment) = comment {
            self.directive(comment);
        }
        Ok(())
    }

    fn plan(&mut self, line_no: usize, body: &str) -> Result<()> {
        if self.plan.is_some() {
            return Err(Error::DuplicatePlan(line_no));
        }
        let invalid = || Error::InvalidPlan {
            line: line_no,
            text: body.to_string(),
        };
        let (start, end) = parser::plan.parse_next(&mut &*body).map_err(|_| invalid())?;
        if end < start {
            return Err(invalid());
        }
        if self.tests.is_empty() {
            self.next = u64::from(start);
        }
        self.plan = Some(Plan { end });
        Ok(())
    }

    fn expected(&self) -> u32 {
        u32::try_from(self.next).unwrap_or(u32::MAX)
    }

    fn result(&mut self, line_no: usize, body: &str) -> Result<()> {
        let mut rest = body;
        let (status, number) =
            parser::result
                .parse_next(&mut rest)
                .map_err(|_| Error::MalformedResultLine {
                    line: line_no,
                    text: body.to_string(),
                })?;
        let beyond_plan = self.plan.is_some_and(|plan| number > plan.end);
        if u64::from(number) < self.next || beyond_plan {
            return Err(Error::OutOfOrderTest {
                line: line_no,
                found: number,
                expected: self.expected(),
            });
        }
        self.fill_missing(u64::from(number))?;

        let description = rest.trim_start();
        let description = description
            .strip_prefix('-')
            .unwrap_or(description)
            .trim();
        let name = (!description.is_empty()).then(|| description.to_string());
        self.tests.push(TapTest::new(number, name, status));
        self.next = u64::from(number) + 1;
        Ok(())
    }

    /// Push `Missing` nodes for every number from `next` up to, but not
    /// including, `below`.
    fn fill_missing(&mut self, below: u64) -> Result<()> {
        if below.saturating_sub(self.next) > u64::from(self.max_gap) {
            return Err(Error::GapTooLarge {
                line: self.line_no,
                from: self.expected(),
                // below is at least next + 1 and at most u32::MAX + 1
                to: (below - 1) as u32,
            });
        }
        while self.next < below {
            // below never exceeds u32::MAX + 1
            self.tests
                .push(TapTest::new(self.next as u32, None, TapStatus::Missing));
            self.next += 1;
        }
        Ok(())
    }

    fn annotation(&mut self, body: &str) {
        match self.tests.last_mut() {
            Some(test) => test.lines.push(body.to_string()),
            None => warn!(text = body, "ignoring stray text before the first test"),
        }
    }

    fn directive(&mut self, comment: &str) {
        let status = if starts_with_ignore_case(comment, "todo") {
            TapStatus::Todo
        } else if starts_with_ignore_case(comment, "skip") {
            TapStatus::Skip
        } else {
            return;
        };
        match self.tests.last_mut() {
            Some(test) => test.status = status,
            None => debug!(comment, "ignoring directive before the first test"),
        }
    }

    fn finish(mut self) -> Result<Vec<TapTest>> {
        if let Some(plan) = self.plan {
            self.fill_missing(u64::from(plan.end) + 1)?;
        }
        Ok(self.tests)
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Phase one: decode the stream into raw nodes in numbering order.
pub fn parse_tap_raw<R: BufRead>(mut reader: R, config: &Config) -> Result<Vec<TapTest>> {
    let mut state = RawState::new(config.max_gap);
    let mut buf = Vec::new();
    let mut line_no = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        state.line(line_no, &String::from_utf8_lossy(&buf))?;
    }
    state.finish()
}

/// Coalesce consecutive nodes with the same name and status and no
/// annotations into one node with a repeat count.
pub fn fold_repeated(tests: Vec<TapTest>) -> Vec<TapTest> {
    let mut folded: Vec<TapTest> = Vec::with_capacity(tests.len());
    for test in tests {
        if let Some(last) = folded.last_mut() {
            if last.name.is_some()
                && last.name == test.name
                && last.status == test.status
                && last.lines.is_empty()
                && test.lines.is_empty()
            {
                last.repeat += test.repeat;
                continue;
            }
        }
        folded.push(test);
    }
    folded
}

/// Phase two: decode the stream into one synthesized suite.
pub fn parse_tap<R: BufRead>(reader: R, config: &Config) -> Result<Vec<Suite>> {
    let mut tests = parse_tap_raw(reader, config)?;
    if config.fold_repeated {
        tests = fold_repeated(tests);
    }
    let tests = tests.into_iter().map(TapTest::into_test).collect();
    Ok(vec![Suite::from_tests("", tests)])
}
