//! Deserialization of Subunit wire types

use crate::{types::number::SubunitNumber, Error, Result};

/// Deserialization of Subunit types from a byte slice.
pub trait Deserializable {
    /// The minimum number of bytes that might be required to deserialize this
    /// type from the front of the slice. If the type cannot be deserialized at
    /// all, return an error.
    ///
    /// The count is a minimum because additional bytes may be required once the
    /// actual value is available. For instance a length-prefixed blob needs
    /// one byte to learn the width of its prefix, then the prefix, and only
    /// then knows its full size.
    fn required_bytes(bytes: &[u8]) -> Result<usize>;
    /// Deserialize the type from the slice, returning the value and the number
    /// of bytes consumed.
    fn deserialize(bytes: &[u8]) -> Result<(Self, usize)>
    where
        Self: Sized;
}

/// Fail with `TruncatedInput` unless `bytes` holds at least `required` bytes.
pub(crate) fn ensure(bytes: &[u8], required: usize) -> Result<()> {
    if bytes.len() < required {
        return Err(Error::TruncatedInput(required, bytes.len()));
    }
    Ok(())
}

impl Deserializable for u8 {
    fn required_bytes(_bytes: &[u8]) -> Result<usize> {
        Ok(1)
    }

    fn deserialize(bytes: &[u8]) -> Result<(u8, usize)> {
        ensure(bytes, 1)?;
        Ok((bytes[0], 1))
    }
}

impl Deserializable for u16 {
    fn required_bytes(_bytes: &[u8]) -> Result<usize> {
        Ok(2)
    }

    fn deserialize(bytes: &[u8]) -> Result<(u16, usize)> {
        ensure(bytes, 2)?;
        Ok((u16::from_be_bytes([bytes[0], bytes[1]]), 2))
    }
}

impl Deserializable for u32 {
    fn required_bytes(_bytes: &[u8]) -> Result<usize> {
        Ok(4)
    }

    fn deserialize(bytes: &[u8]) -> Result<(u32, usize)> {
        ensure(bytes, 4)?;
        Ok((
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            4,
        ))
    }
}

/// A varint length prefix followed by that many opaque bytes.
impl Deserializable for Vec<u8> {
    fn required_bytes(bytes: &[u8]) -> Result<usize> {
        let required = SubunitNumber::required_bytes(bytes)?;
        if bytes.len() < required {
            return Ok(required);
        }
        let (length, required) = SubunitNumber::deserialize(bytes)?;
        // The length is the number of bytes in the blob, plus the length of the number prefixing it
        Ok(length.as_u32() as usize + required)
    }

    fn deserialize(bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
        let (length, prefix) = SubunitNumber::deserialize(bytes)?;
        let end = prefix + length.as_u32() as usize;
        ensure(bytes, end)?;
        Ok((bytes[prefix..end].to_vec(), end))
    }
}

/// A varint count followed by that many length-prefixed blobs.
impl Deserializable for Vec<Vec<u8>> {
    fn required_bytes(bytes: &[u8]) -> Result<usize> {
        SubunitNumber::required_bytes(bytes)
    }

    fn deserialize(bytes: &[u8]) -> Result<(Vec<Vec<u8>>, usize)> {
        let (count, mut offset) = SubunitNumber::deserialize(bytes)?;
        // Every element takes at least one byte, so a count larger than the
        // remaining input is truncated before anything is allocated.
        ensure(bytes, offset + count.as_u32() as usize)?;
        let mut result = Vec::with_capacity(count.as_u32() as usize);
        for _ in 0..count.as_u32() {
            let (blob, size) = Vec::<u8>::deserialize(&bytes[offset..])?;
            result.push(blob);
            offset += size;
        }
        Ok((result, offset))
    }
}
