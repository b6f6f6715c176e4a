//! Field-presence bits of the Subunit v2 flag word.

use enumset::{EnumSet, EnumSetType};

/// Flags of a subunit packet
/// [Docs](https://github.com/testing-cabal/subunit/blob/fc698775674fcbdb9fcc8286d8358c7185647db4/README.rst?plain=1#L262)
#[derive(EnumSetType, Debug)]
// Discriminants are bit indices, not masks. See
// `https://docs.rs/enumset/latest/enumset/struct.EnumSet.html#numeric-representation`
#[enumset(repr = "u16")]
pub enum PacketFlag {
    /// Must be zero in version 2.
    Reserved = 3, // 0x0008
    /// Last chunk of the test's file stream.
    Eof = 4, // 0x0010
    MimeType = 5,    // 0x0020
    FileContent = 6, // 0x0040
    Tags = 7,        // 0x0080
    /// Test is 'runnable'.
    Runnable = 8, // 0x0100
    Timestamp = 9, // 0x0200
    RouteCode = 10, // 0x0400
    TestId = 11,    // 0x0800
}

/// Extract the field-presence bits from a raw flag word. The version nibble
/// and status bits are masked off.
pub fn from_flag_word(flags: u16) -> EnumSet<PacketFlag> {
    EnumSet::<PacketFlag>::from_repr_truncated(flags)
}
