//! Subunit variable-width numbers.
//!
//! The two most significant bits of the first byte give the total width, one
//! to four bytes. The low 6 bits of that byte are the top bits of the value,
//! and any further bytes follow in network order. This is not LEB128.
//!
//! [Docs](https://github.com/testing-cabal/subunit/blob/fc698775674fcbdb9fcc8286d8358c7185647db4/README.rst?plain=1#L199)

use crate::{
    constants::{MAX_NUMBER_VALUE, NUMBER_KIND_MASK, NUMBER_VALUE_MASK},
    deserialize::{ensure, Deserializable},
    Error, Result,
};

/// Width in bytes announced by the first byte of a number.
fn width_of(first: u8) -> usize {
    usize::from((first & NUMBER_KIND_MASK) >> 6) + 1
}

/// Narrowest width that can hold `value`.
fn minimal_width(value: u32) -> usize {
    match value {
        0..=0x3f => 1,
        0x40..=0x3fff => 2,
        0x4000..=0x3f_ffff => 3,
        _ => 4,
    }
}

/// A number as it appears on the wire: its value and how many bytes it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubunitNumber {
    value: u32,
    width: u8,
}

impl SubunitNumber {
    /// Wrap `value` with the narrowest width that holds it.
    pub fn new(value: u32) -> Result<Self> {
        if value > MAX_NUMBER_VALUE {
            return Err(Error::TooLarge);
        }
        Ok(SubunitNumber {
            value,
            width: minimal_width(value) as u8,
        })
    }

    pub fn as_u32(&self) -> u32 {
        self.value
    }

    /// Number of bytes this number occupies on the wire.
    pub fn wire_size(&self) -> usize {
        usize::from(self.width)
    }

    /// The wire form: width marker, then the value in network order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let width = self.wire_size();
        let mut bytes = self.value.to_be_bytes()[4 - width..].to_vec();
        bytes[0] |= ((width - 1) as u8) << 6;
        bytes
    }
}

impl TryFrom<u32> for SubunitNumber {
    type Error = Error;
    fn try_from(value: u32) -> Result<Self> {
        SubunitNumber::new(value)
    }
}

impl TryFrom<usize> for SubunitNumber {
    type Error = Error;
    fn try_from(value: usize) -> Result<Self> {
        SubunitNumber::new(u32::try_from(value).map_err(|_| Error::TooLarge)?)
    }
}

impl From<SubunitNumber> for u32 {
    fn from(value: SubunitNumber) -> Self {
        value.value
    }
}

impl Deserializable for SubunitNumber {
    fn required_bytes(bytes: &[u8]) -> Result<usize> {
        Ok(bytes.first().map_or(1, |&first| width_of(first)))
    }

    fn deserialize(bytes: &[u8]) -> Result<(SubunitNumber, usize)> {
        ensure(bytes, 1)?;
        let width = width_of(bytes[0]);
        ensure(bytes, width)?;
        let value = bytes[1..width]
            .iter()
            .fold(u32::from(bytes[0] & NUMBER_VALUE_MASK), |acc, &b| {
                acc << 8 | u32::from(b)
            });
        Ok((
            SubunitNumber {
                value,
                width: width as u8,
            },
            width,
        ))
    }
}

/// Encode `value` into its minimal wire form.
pub fn encode(value: u32) -> Result<Vec<u8>> {
    Ok(SubunitNumber::new(value)?.to_bytes())
}

/// Decode a number from the front of `buffer`, returning the value and the
/// number of bytes consumed.
pub fn decode(buffer: &[u8]) -> Result<(u32, usize)> {
    let (number, used) = SubunitNumber::deserialize(buffer)?;
    Ok((number.as_u32(), used))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{decode, encode, minimal_width, width_of, SubunitNumber};
    use crate::{constants::MAX_NUMBER_VALUE, deserialize::Deserializable, Error};

    #[test]
    fn test_width_of() {
        assert_eq!(width_of(0x00), 1);
        assert_eq!(width_of(0x3f), 1);
        assert_eq!(width_of(0x40), 2);
        assert_eq!(width_of(0x7f), 2);
        assert_eq!(width_of(0x80), 3);
        assert_eq!(width_of(0xbf), 3);
        assert_eq!(width_of(0xc0), 4);
        assert_eq!(width_of(0xff), 4);
    }

    #[test]
    fn test_encode_class_boundaries() {
        let cases: [(u32, &[u8]); 8] = [
            (0, &[0x00]),
            (63, &[0x3f]),
            (64, &[0x40, 0x40]),
            (16383, &[0x7f, 0xff]),
            (16384, &[0x80, 0x40, 0x00]),
            (4194303, &[0xbf, 0xff, 0xff]),
            (4194304, &[0xc0, 0x40, 0x00, 0x00]),
            (0x3fffffff, &[0xff, 0xff, 0xff, 0xff]),
        ];
        for (value, bytes) in cases {
            assert_eq!(encode(value).unwrap(), bytes, "{value}");
            assert_eq!(decode(bytes).unwrap(), (value, bytes.len()), "{value}");
        }
    }

    #[test]
    fn test_too_large() {
        assert!(matches!(SubunitNumber::new(0x40000000), Err(Error::TooLarge)));
        assert!(matches!(encode(u32::MAX), Err(Error::TooLarge)));
        assert!(matches!(
            SubunitNumber::try_from(usize::MAX),
            Err(Error::TooLarge)
        ));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(decode(&[0x0c, 0x03, 0x66]).unwrap(), (12, 1));
        assert_eq!(decode(&[0x80, 0xaf, 0xc8, 0x03]).unwrap(), (45000, 3));
    }

    #[test]
    fn test_decode_keeps_wire_width() {
        // A non-minimal encoding still reports the bytes it used.
        let (number, used) = SubunitNumber::deserialize(&[0x40, 0x05]).unwrap();
        assert_eq!(number.as_u32(), 5);
        assert_eq!(number.wire_size(), 2);
        assert_eq!(used, 2);
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(decode(&[]), Err(Error::TruncatedInput(1, 0))));
        assert!(matches!(decode(&[0x40]), Err(Error::TruncatedInput(2, 1))));
        assert!(matches!(
            decode(&[0x80, 0x01]),
            Err(Error::TruncatedInput(3, 2))
        ));
        assert!(matches!(
            decode(&[0xc0, 0x01, 0x02]),
            Err(Error::TruncatedInput(4, 3))
        ));
    }

    proptest! {
        #[test]
        fn encode_decode_round_trip(value in 0..=MAX_NUMBER_VALUE) {
            let encoded = encode(value).unwrap();
            prop_assert_eq!(encoded.len(), minimal_width(value));
            let (decoded, used) = decode(&encoded).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(used, encoded.len());
        }
    }
}
