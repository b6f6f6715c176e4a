//! Subunit v2 streams: packet iteration and folding into the report model.

use std::{collections::HashMap, io::Read};

use tracing::{debug, trace};

use crate::{
    constants::V2_SIGNATURE,
    types::{
        packet::{decode_packet, Packet},
        report::{Suite, Test},
        teststatus::Status,
    },
    Result,
};

/// True if `bytes` starts like a v2 stream.
pub fn is_subunit_v2(bytes: &[u8]) -> bool {
    bytes.first() == Some(&V2_SIGNATURE)
}

/// Iterator over the packets of a buffered stream.
#[derive(Debug)]
pub struct Packets<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

/// Iterate over back to back packets, stopping after the first error.
pub fn packets(bytes: &[u8]) -> Packets<'_> {
    Packets {
        bytes,
        offset: 0,
        failed: false,
    }
}

impl Iterator for Packets<'_> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        match decode_packet(&self.bytes[self.offset..]) {
            Ok((packet, used)) => {
                self.offset += used;
                Some(Ok(packet))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Per-test state while folding packets.
struct Tracked {
    index: usize,
    first_seen: Option<f64>,
}

#[derive(Default)]
struct Folder {
    tests: Vec<Test>,
    by_id: HashMap<String, Tracked>,
}

impl Folder {
    fn apply(&mut self, packet: Packet) {
        let Some(id) = packet.test_id_lossy() else {
            trace!(status = ?packet.status, "skipping packet without test id");
            return;
        };
        let status = Status::from(packet.status);
        let at = packet.timestamp.map(|ts| ts.as_secs_f64());
        let next_index = self.tests.len();
        let tracked = self.by_id.entry(id.clone()).or_insert(Tracked {
            index: next_index,
            first_seen: None,
        });
        if tracked.index == next_index {
            self.tests.push(Test::new(id, status));
        }
        let test = &mut self.tests[tracked.index];
        if status != Status::Undefined {
            test.status = status;
        }
        if let Some(at) = at {
            match tracked.first_seen {
                Some(first) => test.duration = Some((at - first).max(0.0)),
                None => tracked.first_seen = Some(at),
            }
        }
        for tag in packet.tags_lossy() {
            if !test.tags.contains(&tag) {
                test.tags.push(tag);
            }
        }
        if let Some(file) = &packet.file {
            let name = String::from_utf8_lossy(&file.name);
            test.attach(&name, &String::from_utf8_lossy(&file.content));
        }
    }
}

/// Decode a whole v2 stream into one synthesized suite. Packets are folded
/// by test id; any malformed packet fails the parse.
pub fn parse_subunit_v2<R: Read>(mut reader: R) -> Result<Vec<Suite>> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let mut folder = Folder::default();
    let mut count = 0usize;
    for packet in packets(&bytes) {
        folder.apply(packet?);
        count += 1;
    }
    debug!(packets = count, tests = folder.tests.len(), "decoded subunit v2 stream");
    Ok(vec![Suite::from_tests("", folder.tests)])
}
