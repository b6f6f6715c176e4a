//! Subunit v2 packet decoding
use crc32fast::Hasher;
use enumset::EnumSet;

use crate::{
    constants::{self, V2_SIGNATURE},
    deserialize::Deserializable,
    Error, Result,
};

use super::{
    number::SubunitNumber,
    packetflags::{self, PacketFlag},
    teststatus::SubunitStatus,
    timestamp::Timestamp,
};

/// Size of the trailing CRC32.
const CRC_SIZE: usize = 4;

/// An attached file chunk: a name and opaque content.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContent {
    pub name: Vec<u8>,
    pub content: Vec<u8>,
}

/// A decoded subunit v2 packet
///
/// Blobs are kept as the bytes found on the wire; the protocol does not
/// promise they are UTF-8.
///
/// [Docs](https://github.com/testing-cabal/subunit/blob/fc698775674fcbdb9fcc8286d8358c7185647db4/README.rst?plain=1#L147)
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub signature: u8,
    /// Field-presence flags, without the version and status bits.
    pub flags: EnumSet<PacketFlag>,
    pub version: u8,
    pub status: SubunitStatus,
    /// Total size on the wire, signature and CRC included.
    pub length: u32,
    pub timestamp: Option<Timestamp>,
    pub test_id: Option<Vec<u8>>,
    pub tags: Option<Vec<Vec<u8>>>,
    pub mime_type: Option<Vec<u8>>,
    pub file: Option<FileContent>,
    /// Routing codes are used to route IO back to test sources
    pub route_code: Option<Vec<u8>>,
    /// Last chunk of the file stream for this test.
    pub eof: bool,
    /// When true indicates that this test (route_code + test_id) is individually runnable
    pub runnable: bool,
    pub crc32: u32,
}

impl Packet {
    /// The test id as text, replacing invalid UTF-8.
    pub fn test_id_lossy(&self) -> Option<String> {
        self.test_id
            .as_deref()
            .map(|id| String::from_utf8_lossy(id).into_owned())
    }

    /// Tags as text, replacing invalid UTF-8.
    pub fn tags_lossy(&self) -> Vec<String> {
        self.tags
            .iter()
            .flatten()
            .map(|tag| String::from_utf8_lossy(tag).into_owned())
            .collect()
    }
}

struct Header {
    flags: u16,
    length: u32,
}

/// Read and validate everything up to and including the packet length.
fn read_header(reader: &mut Reader) -> Result<Header> {
    let signature = reader.read::<u8>()?;
    if signature != V2_SIGNATURE {
        return Err(Error::BadSignature(signature));
    }
    let flags = reader.read::<u16>()?;
    if flags & constants::VERSION_MASK != constants::VERSION2 {
        return Err(Error::UnsupportedVersion((flags >> 12) as u8));
    }
    if packetflags::from_flag_word(flags).contains(PacketFlag::Reserved) {
        return Err(Error::ReservedFlag);
    }
    let length = reader.read::<SubunitNumber>()?.as_u32();
    if length >= constants::PACKET_MAX_LENGTH {
        return Err(Error::PacketTooLarge(length));
    }
    let minimum = (reader.bytes_read + CRC_SIZE) as u32;
    if length < minimum {
        return Err(Error::LengthTooSmall(length, minimum));
    }
    Ok(Header { flags, length })
}

impl Deserializable for Packet {
    fn required_bytes(bytes: &[u8]) -> Result<usize> {
        //  PACKET = SIGNATURE FLAGS PACKET_LENGTH TIMESTAMP? TESTID? TAGS?
        //           MIME? FILECONTENT? ROUTING_CODE? CRC32
        let mut reader = Reader::new(bytes);
        match read_header(&mut reader) {
            Ok(header) => Ok(header.length as usize),
            Err(Error::TruncatedInput(needed, _)) => Ok(reader.bytes_read + needed),
            Err(e) => Err(e),
        }
    }

    fn deserialize(bytes: &[u8]) -> Result<(Self, usize)> {
        //  PACKET = SIGNATURE FLAGS PACKET_LENGTH TIMESTAMP? TESTID? TAGS?
        //           MIME? FILECONTENT? ROUTING_CODE? CRC32
        let mut reader = Reader::new(bytes);
        let Header { flags, length } = read_header(&mut reader)?;
        let packet_length = length as usize;
        let fields_end = packet_length - CRC_SIZE;
        if bytes.len() < packet_length {
            return Err(Error::TruncatedInput(packet_length, bytes.len()));
        }
        // Fields may not run into the CRC.
        reader.set_slice_end(fields_end)?;

        let features = packetflags::from_flag_word(flags);
        let mut result = Packet {
            signature: V2_SIGNATURE,
            flags: features,
            version: (flags >> 12) as u8,
            status: SubunitStatus::from(flags),
            length,
            timestamp: None,
            test_id: None,
            tags: None,
            mime_type: None,
            file: None,
            route_code: None,
            eof: features.contains(PacketFlag::Eof),
            runnable: features.contains(PacketFlag::Runnable),
            crc32: 0,
        };

        // Wire order, not bit order.
        if features.contains(PacketFlag::Timestamp) {
            result.timestamp = Some(reader.read::<Timestamp>()?);
        }
        if features.contains(PacketFlag::TestId) {
            result.test_id = Some(reader.read::<Vec<u8>>()?);
        }
        if features.contains(PacketFlag::Tags) {
            result.tags = Some(reader.read::<Vec<Vec<u8>>>()?);
        }
        if features.contains(PacketFlag::MimeType) {
            result.mime_type = Some(reader.read::<Vec<u8>>()?);
        }
        if features.contains(PacketFlag::FileContent) {
            let name = reader.read::<Vec<u8>>()?;
            let content = reader.read::<Vec<u8>>()?;
            result.file = Some(FileContent { name, content });
        }
        if features.contains(PacketFlag::RouteCode) {
            result.route_code = Some(reader.read::<Vec<u8>>()?);
        }

        if reader.bytes_read != fields_end {
            return Err(Error::LengthMismatch(
                length,
                (reader.bytes_read + CRC_SIZE) as u32,
            ));
        }

        let (stored, _) = u32::deserialize(&bytes[fields_end..packet_length])?;
        let computed = reader.finalize();
        if computed != stored {
            return Err(Error::ChecksumMismatch { computed, stored });
        }
        result.crc32 = stored;

        Ok((result, packet_length))
    }
}

/// Decode one packet from the front of `bytes`, returning it and the number of
/// bytes it occupied.
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize)> {
    Packet::deserialize(bytes)
}

/// Helper to avoid some boilerplate in deserialization. Every byte read is
/// fed to the CRC.
struct Reader<'a> {
    bytes: &'a [u8],
    bytes_read: usize,
    hasher: Hasher,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            bytes_read: 0,
            hasher: Hasher::new(),
        }
    }

    fn read<T>(&mut self) -> Result<T>
    where
        T: Deserializable,
    {
        let (val, used) = T::deserialize(&self.bytes[self.bytes_read..])?;
        self.hasher
            .update(&self.bytes[self.bytes_read..self.bytes_read + used]);
        self.bytes_read += used;
        Ok(val)
    }

    fn finalize(self) -> u32 {
        self.hasher.finalize()
    }

    /// Sets the slice end to a given length: this prevents reading past the end of the length.
    fn set_slice_end(&mut self, length: usize) -> Result<()> {
        if length > self.bytes.len() {
            return Err(Error::TruncatedInput(length, self.bytes.len()));
        }
        self.bytes = &self.bytes[..length];
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        decode_packet,
        testing::{blob, build_packet},
        FileContent, Packet,
    };
    use crate::{
        deserialize::Deserializable,
        types::{packetflags::PacketFlag, teststatus::SubunitStatus},
        Error,
    };

    #[test]
    fn test_decode_enumeration() {
        let bytes = b"\xb3\x29\x01\x0c\x03foo\x08\x55\x5f\x1b";
        let (packet, used) = decode_packet(bytes).unwrap();
        assert_eq!(used, 12);
        assert_eq!(packet.signature, 0xb3);
        assert_eq!(packet.version, 2);
        assert!(packet.runnable);
        assert!(packet.flags.contains(PacketFlag::TestId));
        assert_eq!(packet.status, SubunitStatus::Enumeration);
        assert_eq!(packet.length, 12);
        assert_eq!(packet.test_id.as_deref(), Some(&b"foo"[..]));
        assert_eq!(packet.crc32, 0x08555f1b);
    }

    #[test]
    fn test_reference_values() {
        #[track_caller]
        fn assert_status(buffer: &[u8], status: SubunitStatus) {
            let (parsed, length) = Packet::deserialize(buffer).unwrap();
            assert_eq!(length, buffer.len());
            assert_eq!(parsed.status, status);
            assert_eq!(parsed.test_id_lossy().as_deref(), Some("foo"));
        }

        // Constants from the reference implementation
        assert_status(b"\xb3)\x02\x0c\x03foo\x8e\xc1-\xb5", SubunitStatus::InProgress);
        assert_status(b"\xb3)\x03\x0c\x03fooE\x9d\xfe\x10", SubunitStatus::Success);
        assert_status(
            b"\xb3)\x04\x0c\x03fooX\x98\xce\xa8",
            SubunitStatus::UnexpectedSuccess,
        );
        assert_status(b"\xb3)\x05\x0c\x03foo\x93\xc4\x1d\r", SubunitStatus::Skipped);
        assert_status(b"\xb3)\x06\x0c\x03foo\x15Po\xa3", SubunitStatus::Failed);
        assert_status(
            b"\xb3)\x07\x0c\x03foo\xde\x0c\xbc\x06",
            SubunitStatus::ExpectedFailure,
        );

        let (eof, _) = decode_packet(b"\xb3!\x10\x08S\x15\x88\xdc").unwrap();
        assert!(eof.eof);
        assert!(eof.runnable);
        assert_eq!(eof.test_id, None);

        let (file, _) = decode_packet(b"\xb3!@\x13\x06barney\x03wooA5\xe3\x8c").unwrap();
        assert_eq!(
            file.file,
            Some(FileContent {
                name: b"barney".to_vec(),
                content: b"woo".to_vec(),
            })
        );

        let (mime, _) = decode_packet(b"\xb3! #\x1aapplication/foo; charset=1x3Q\x15").unwrap();
        assert_eq!(
            mime.mime_type.as_deref(),
            Some(&b"application/foo; charset=1"[..])
        );

        let (timestamp, _) =
            decode_packet(b"\xb3+\x03\x13<\x17T\xcf\x80\xaf\xc8\x03barI\x96>-").unwrap();
        let ts = timestamp.timestamp.unwrap();
        assert_eq!(ts.seconds, 1008161999);
        assert_eq!(u32::from(ts.nanoseconds), 45000);
        assert_eq!(timestamp.test_id_lossy().as_deref(), Some("bar"));

        let (route_code, _) =
            decode_packet(b"\xb3-\x03\x13\x03bar\x06source\x9cY9\x19").unwrap();
        assert_eq!(route_code.route_code.as_deref(), Some(&b"source"[..]));

        let (not_runnable, _) = decode_packet(b"\xb3(\x03\x0c\x03foo\xe3\xea\xf5\xa4").unwrap();
        assert!(!not_runnable.runnable);

        let (tags, _) =
            decode_packet(b"\xb3)\x80\x15\x03bar\x02\x03foo\x03barTHn\xb4").unwrap();
        assert_eq!(tags.tags_lossy(), vec!["foo", "bar"]);
        assert_eq!(tags.status, SubunitStatus::Undefined);
    }

    #[test]
    fn test_back_to_back() {
        let mut stream = b"\xb3)\x02\x0c\x03foo\x8e\xc1-\xb5".to_vec();
        stream.extend_from_slice(b"\xb3)\x03\x0c\x03fooE\x9d\xfe\x10");
        let (first, used) = decode_packet(&stream).unwrap();
        let (second, _) = decode_packet(&stream[used..]).unwrap();
        assert_eq!(first.status, SubunitStatus::InProgress);
        assert_eq!(second.status, SubunitStatus::Success);
    }

    #[test]
    fn test_bad_signature() {
        assert!(matches!(
            decode_packet(b"\xb2\x29\x01\x0c\x03foo\x08\x55\x5f\x1b"),
            Err(Error::BadSignature(0xb2))
        ));
    }

    #[test]
    fn test_unsupported_version() {
        assert!(matches!(
            decode_packet(b"\xb3\x19\x01\x0c\x03foo\x08\x55\x5f\x1b"),
            Err(Error::UnsupportedVersion(1))
        ));
    }

    #[test]
    fn test_reserved_flag() {
        let packet = build_packet(0x2008, &[]);
        assert!(matches!(decode_packet(&packet), Err(Error::ReservedFlag)));
    }

    #[test]
    fn test_length_limits() {
        // Exactly the maximum is already too large.
        assert!(matches!(
            decode_packet(b"\xb3\x20\x00\xbf\xff\xff"),
            Err(Error::PacketTooLarge(4194303))
        ));
        assert!(matches!(
            decode_packet(b"\xb3\x20\x00\xff\xff\xff\xff"),
            Err(Error::PacketTooLarge(0x3fffffff))
        ));
        assert!(matches!(
            decode_packet(b"\xb3\x20\x00\x03\x00\x00\x00\x00"),
            Err(Error::LengthTooSmall(3, 8))
        ));
    }

    #[test]
    fn test_truncated() {
        let full = b"\xb3\x29\x01\x0c\x03foo\x08\x55\x5f\x1b";
        for end in 0..full.len() {
            assert!(
                matches!(decode_packet(&full[..end]), Err(Error::TruncatedInput(..))),
                "prefix of {end} bytes"
            );
        }
        assert_eq!(Packet::required_bytes(&full[..2]).unwrap(), 3);
        assert_eq!(Packet::required_bytes(&full[..4]).unwrap(), 12);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut packet = b"\xb3\x29\x01\x0c\x03foo\x08\x55\x5f\x1b".to_vec();
        packet[5] = b'g';
        assert!(matches!(
            decode_packet(&packet),
            Err(Error::ChecksumMismatch {
                stored: 0x08555f1b,
                ..
            })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let mut fields = blob(b"foo");
        fields.push(0);
        let packet = build_packet(0x2800, &fields);
        assert!(matches!(
            decode_packet(&packet),
            Err(Error::LengthMismatch(13, 12))
        ));
    }

    #[test]
    fn test_field_overruns_length() {
        // The test id claims more bytes than the packet holds before its CRC.
        let packet = build_packet(0x2800, b"\x09foo");
        assert!(matches!(
            decode_packet(&packet),
            Err(Error::TruncatedInput(..))
        ));
    }

    #[test]
    fn test_all_fields() {
        let mut fields = vec![0x65, 0x92, 0x00, 0x80, 0x00];
        fields.extend(blob(b"pkg.test"));
        fields.push(2);
        fields.extend(blob(b"slow"));
        fields.extend(blob(b"net"));
        fields.extend(blob(b"text/plain"));
        fields.extend(blob(b"stdout"));
        fields.extend(blob(b"hello\n"));
        fields.extend(blob(b"0"));
        let packet = build_packet(0x2ef6, &fields);
        let (decoded, used) = decode_packet(&packet).unwrap();
        assert_eq!(used, packet.len());
        assert_eq!(decoded.status, SubunitStatus::Failed);
        assert!(decoded.eof);
        assert!(!decoded.runnable);
        assert_eq!(decoded.timestamp.unwrap().seconds, 1704067200);
        assert_eq!(decoded.test_id_lossy().as_deref(), Some("pkg.test"));
        assert_eq!(decoded.tags_lossy(), vec!["slow", "net"]);
        assert_eq!(decoded.mime_type.as_deref(), Some(&b"text/plain"[..]));
        assert_eq!(decoded.file.unwrap().content, b"hello\n");
        assert_eq!(decoded.route_code.as_deref(), Some(&b"0"[..]));
    }

    #[test]
    fn test_invalid_utf8_test_id() {
        let packet = build_packet(0x2803, &blob(b"t\xffx"));
        let (decoded, _) = decode_packet(&packet).unwrap();
        assert_eq!(decoded.test_id_lossy().as_deref(), Some("t\u{fffd}x"));
    }

    proptest! {
        #[test]
        fn never_panics(bytes in prop::collection::vec(any::<u8>(), 0..96)) {
            let _ = decode_packet(&bytes);
            let _ = Packet::required_bytes(&bytes);
        }

        #[test]
        fn never_panics_with_valid_header(
            flags in any::<u16>(),
            tail in prop::collection::vec(any::<u8>(), 0..96),
        ) {
            let mut bytes = vec![0xb3];
            bytes.extend_from_slice(&(0x2000 | (flags & 0x0ff7)).to_be_bytes());
            bytes.extend(tail);
            let _ = decode_packet(&bytes);
        }
    }
}
