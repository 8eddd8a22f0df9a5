/// Decoded header records handed over by the field extractor.
///
/// The extractor parses the A-field of each packet into the handful of values
/// the tracker needs. Identity bits may arrive over several packets, so an
/// [`IdentityBits`] carries how many leading bits are known so far.
use core::fmt;

use thiserror::Error;

use crate::dect::{FRAME_CYCLE, PAIR_FRAGMENT_BITS, PART_ID_BITS, PART_ID_LEN};

/// Which side of the link transmitted the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartType {
    /// Radio fixed part (base station)
    FixedPart,
    /// Portable part (handset)
    PortablePart,
}

impl PartType {
    pub fn is_fixed(self) -> bool {
        matches!(self, PartType::FixedPart)
    }

    /// Dense index for per-type tables.
    pub fn index(self) -> usize {
        match self {
            PartType::FixedPart => 0,
            PartType::PortablePart => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            PartType::FixedPart => PartType::PortablePart,
            PartType::PortablePart => PartType::FixedPart,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PartType::FixedPart => "fp",
            PartType::PortablePart => "pp",
        }
    }
}

/// A complete 40-bit part identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartId(pub [u8; PART_ID_LEN]);

impl PartId {
    /// Identity as a 40-bit big-endian integer.
    pub fn to_u64(self) -> u64 {
        self.0.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; PART_ID_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = (value >> (8 * (PART_ID_LEN - 1 - i))) as u8;
        }
        PartId(bytes)
    }

    /// Whether both identities agree on the fixed/portable pairing fragment.
    pub fn shares_fragment(self, other: PartId) -> bool {
        let mask = prefix_mask(PAIR_FRAGMENT_BITS);
        self.to_u64() & mask == other.to_u64() & mask
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Mask selecting the `len` leading bits of a 40-bit identity.
fn prefix_mask(len: u8) -> u64 {
    let len = len.min(PART_ID_BITS) as u32;
    if len == 0 {
        0
    } else {
        ((1u64 << len) - 1) << (PART_ID_BITS as u32 - len)
    }
}

/// Leading identity bits known so far, MSB first.
///
/// Always well formed: `len <= 40` and no bit is set past `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentityBits {
    value: u64,
    len: u8,
}

impl IdentityBits {
    /// Build from the first `len` bits of `bytes`.
    pub fn new(bytes: [u8; PART_ID_LEN], len: u8) -> Result<Self, HeaderError> {
        if len > PART_ID_BITS {
            return Err(HeaderError::IdentityTooLong(len));
        }
        let value = PartId(bytes).to_u64();
        if value & !prefix_mask(len) != 0 {
            return Err(HeaderError::StrayIdentityBits(len));
        }
        Ok(Self { value, len })
    }

    /// No identity bits (a tail carrying other channel data).
    pub const fn none() -> Self {
        Self { value: 0, len: 0 }
    }

    pub fn complete(id: PartId) -> Self {
        Self {
            value: id.to_u64(),
            len: PART_ID_BITS,
        }
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_complete(&self) -> bool {
        self.len == PART_ID_BITS
    }

    /// The full identity once all 40 bits are known.
    pub fn part_id(&self) -> Option<PartId> {
        self.is_complete().then(|| PartId::from_u64(self.value))
    }

    /// Known bits padded with zeros, for reporting a partial identity.
    pub fn padded(&self) -> PartId {
        PartId::from_u64(self.value)
    }

    /// Whether the two agree on every bit both of them know.
    pub fn agrees_with(&self, other: &IdentityBits) -> bool {
        let mask = prefix_mask(self.len.min(other.len));
        self.value & mask == other.value & mask
    }

    /// Number of leading bits both sides know and agree on, `None` on conflict.
    pub fn overlap(&self, other: &IdentityBits) -> Option<u8> {
        self.agrees_with(other).then(|| self.len.min(other.len))
    }
}

/// Reasons a header record is rejected before it touches the part table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("identity length {0} exceeds 40 bits")]
    IdentityTooLong(u8),
    #[error("identity has bits set beyond its {0}-bit length")]
    StrayIdentityBits(u8),
    #[error("frame number {0} outside the multiframe")]
    FrameNumber(u8),
}

/// One packet's header fields, as produced by the field extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRecord {
    pub part_type: PartType,
    pub identity: IdentityBits,
    pub frame_number: u8,
    pub crc_valid: bool,
    pub voice_present: bool,
    /// Q-channel system information received in this packet
    pub qt_received: bool,
    /// Receiver sample counter at the start of the packet
    pub timestamp: u64,
}

impl HeaderRecord {
    /// A CRC-valid, silent header with a complete identity.
    pub fn new(part_type: PartType, id: PartId, frame_number: u8, timestamp: u64) -> Self {
        Self {
            part_type,
            identity: IdentityBits::complete(id),
            frame_number,
            crc_valid: true,
            voice_present: false,
            qt_received: false,
            timestamp,
        }
    }

    /// Reject values no well-behaved extractor produces.
    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.frame_number >= FRAME_CYCLE {
            return Err(HeaderError::FrameNumber(self.frame_number));
        }
        Ok(())
    }
}

/// A header record together with the packet's payload bits.
#[derive(Debug, Clone, Copy)]
pub struct DecodedPacket<'a> {
    pub header: HeaderRecord,
    /// B-field bits, forwarded untouched when this part is selected
    pub payload: &'a [u8],
}

impl<'a> DecodedPacket<'a> {
    pub fn new(header: HeaderRecord, payload: &'a [u8]) -> Self {
        Self { header, payload }
    }
}
