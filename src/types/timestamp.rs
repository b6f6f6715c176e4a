//! Subunit timestamps

use chrono::{DateTime, Utc};

use crate::{
    deserialize::{ensure, Deserializable},
    types::number::SubunitNumber,
    Error, Result,
};

/// Width of the seconds component.
const SECONDS_SIZE: usize = 4;

/// A point in time as carried by a v2 packet: u32 seconds since the Unix
/// epoch (UTC) followed by a variable-width nanoseconds component.
///
/// [Docs](https://github.com/testing-cabal/subunit/blob/fc698775674fcbdb9fcc8286d8358c7185647db4/README.rst?plain=1#L315)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    pub seconds: u32,
    pub nanoseconds: SubunitNumber,
}

impl Timestamp {
    /// Seconds since the epoch as a float, for duration arithmetic.
    pub fn as_secs_f64(&self) -> f64 {
        f64::from(self.seconds) + f64::from(self.nanoseconds.as_u32()) / 1e9
    }
}

impl Deserializable for Timestamp {
    fn required_bytes(bytes: &[u8]) -> Result<usize> {
        match bytes.get(SECONDS_SIZE..) {
            Some(rest) if !rest.is_empty() => {
                Ok(SECONDS_SIZE + SubunitNumber::required_bytes(rest)?)
            }
            _ => Ok(SECONDS_SIZE + 1),
        }
    }

    fn deserialize(bytes: &[u8]) -> Result<(Timestamp, usize)> {
        ensure(bytes, Timestamp::required_bytes(bytes)?)?;
        let (seconds, _) = u32::deserialize(bytes)?;
        let (nanoseconds, used) = SubunitNumber::deserialize(&bytes[SECONDS_SIZE..])?;
        Ok((
            Timestamp {
                seconds,
                nanoseconds,
            },
            SECONDS_SIZE + used,
        ))
    }
}

impl TryFrom<DateTime<Utc>> for Timestamp {
    type Error = Error;
    fn try_from(dt: DateTime<Utc>) -> Result<Self> {
        let nanos = dt.timestamp_subsec_nanos();
        // Representable range ends at 2106-02-07 06:28:15 UTC.
        let seconds = u32::try_from(dt.timestamp())
            .map_err(|_| Error::InvalidTimestamp(dt.timestamp() as u32, nanos))?;
        Ok(Timestamp {
            seconds,
            nanoseconds: SubunitNumber::new(nanos)?,
        })
    }
}

impl TryFrom<Timestamp> for DateTime<Utc> {
    type Error = Error;
    fn try_from(ts: Timestamp) -> Result<Self> {
        let nanos = ts.nanoseconds.as_u32();
        DateTime::from_timestamp(i64::from(ts.seconds), nanos)
            .ok_or(Error::InvalidTimestamp(ts.seconds, nanos))
    }
}
