/// Part descriptors: one slot of the part table and its lifecycle.
///
/// A slot moves through `Free -> Partial -> Identified` as identity bits are
/// assembled. Only an identified part can carry a pair link, so the tagged
/// state rules out combinations such as "paired but identity unknown".
use crate::header::{IdentityBits, PartId, PartType};

/// Handle to a tracked part.
///
/// The generation is bumped every time the slot is released, so a handle kept
/// across an eviction no longer resolves to whatever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRef {
    pub slot: u8,
    pub generation: u32,
}

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Free,
    /// Some identity bits seen, still assembling
    Partial { identity: IdentityBits },
    /// Full 40-bit identity known
    Identified {
        id: PartId,
        /// Q-channel system information confirmed
        qt_confirmed: bool,
        pair: Option<PartRef>,
    },
}

/// Immutable snapshot handed to event sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartInfo {
    pub rx_id: u32,
    pub part_id: PartId,
    pub is_fixed_part: bool,
    pub voice_present: bool,
}

/// One tracked radio part.
#[derive(Debug, Clone, Copy)]
pub struct PartDescriptor {
    slot: u8,
    generation: u32,
    pub(crate) state: PartState,
    pub(crate) part_type: PartType,
    pub(crate) frame_number: u8,
    pub(crate) frame_number_corrected: bool,
    /// Tracker-wide accepted-packet stamp of the last accepted packet
    pub(crate) rx_sequence: u64,
    /// Sample timestamp of the last accepted packet
    pub(crate) last_seen: u64,
    pub(crate) packet_count: u64,
    /// Outcomes of the most recent attributed packets, newest in bit 0; a set
    /// bit is a CRC failure
    pub(crate) crc_history: u64,
    /// Valid bits in `crc_history`
    pub(crate) history_len: u32,
    pub(crate) voice_present: bool,
    pub(crate) log_update: bool,
}

impl PartDescriptor {
    pub const fn free(slot: u8) -> Self {
        Self {
            slot,
            generation: 0,
            state: PartState::Free,
            part_type: PartType::FixedPart,
            frame_number: 0,
            frame_number_corrected: false,
            rx_sequence: 0,
            last_seen: 0,
            packet_count: 0,
            crc_history: 0,
            history_len: 0,
            voice_present: false,
            log_update: false,
        }
    }

    /// Bind a free slot to a newly observed part.
    pub(crate) fn activate(&mut self, part_type: PartType, identity: IdentityBits) {
        let (slot, generation) = (self.slot, self.generation);
        *self = Self::free(slot);
        self.generation = generation;
        self.part_type = part_type;
        self.state = match identity.part_id() {
            Some(id) => {
                self.log_update = true;
                PartState::Identified {
                    id,
                    qt_confirmed: false,
                    pair: None,
                }
            }
            None => PartState::Partial { identity },
        };
    }

    /// Return the slot to the free pool. Pair links must be cleared first.
    pub(crate) fn release(&mut self) {
        let (slot, generation) = (self.slot, self.generation);
        *self = Self::free(slot);
        self.generation = generation.wrapping_add(1);
    }

    /// Merge newly received identity bits. Returns true when this completes the
    /// identity.
    pub(crate) fn refine(&mut self, identity: &IdentityBits) -> bool {
        let PartState::Partial { identity: known } = self.state else {
            return false;
        };
        if identity.len() <= known.len() {
            return false;
        }
        match identity.part_id() {
            Some(id) => {
                self.state = PartState::Identified {
                    id,
                    qt_confirmed: false,
                    pair: None,
                };
                self.log_update = true;
                true
            }
            None => {
                self.state = PartState::Partial {
                    identity: *identity,
                };
                false
            }
        }
    }

    pub(crate) fn set_pair(&mut self, link: Option<PartRef>) {
        if let PartState::Identified { ref mut pair, .. } = self.state {
            *pair = link;
        }
    }

    pub(crate) fn confirm_qt(&mut self) {
        if let PartState::Identified {
            ref mut qt_confirmed,
            ..
        } = self.state
        {
            *qt_confirmed = true;
        }
    }

    /// Record the voice indicator, flagging an update when it flips.
    pub(crate) fn note_voice(&mut self, voice_present: bool) {
        if self.voice_present != voice_present {
            self.voice_present = voice_present;
            self.log_update = true;
        }
    }

    // ── Read access ─────────────────────────────────────────────────

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn part_ref(&self) -> PartRef {
        PartRef {
            slot: self.slot,
            generation: self.generation,
        }
    }

    pub fn state(&self) -> &PartState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, PartState::Free)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.state, PartState::Partial { .. })
    }

    /// Full identity received (`part_id_rcvd`).
    pub fn part_id_received(&self) -> bool {
        matches!(self.state, PartState::Identified { .. })
    }

    pub fn part_type(&self) -> PartType {
        self.part_type
    }

    pub fn part_id(&self) -> Option<PartId> {
        match self.state {
            PartState::Identified { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Identity bits known so far, empty for a free slot.
    pub fn identity(&self) -> IdentityBits {
        match self.state {
            PartState::Free => IdentityBits::none(),
            PartState::Partial { identity } => identity,
            PartState::Identified { id, .. } => IdentityBits::complete(id),
        }
    }

    pub fn qt_received(&self) -> bool {
        matches!(
            self.state,
            PartState::Identified {
                qt_confirmed: true,
                ..
            }
        )
    }

    /// Stored pair link. Use `PartTable::pair_of` for a validated partner.
    pub fn pair(&self) -> Option<PartRef> {
        match self.state {
            PartState::Identified { pair, .. } => pair,
            _ => None,
        }
    }

    pub fn frame_number(&self) -> u8 {
        self.frame_number
    }

    pub fn frame_number_corrected(&self) -> bool {
        self.frame_number_corrected
    }

    pub fn rx_sequence(&self) -> u64 {
        self.rx_sequence
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    /// CRC failures among the packets in the quality window.
    pub fn bad_crc_count(&self) -> u32 {
        (self.crc_history & history_mask(self.history_len)).count_ones()
    }

    /// Accepted packets among the packets in the quality window.
    pub fn window_accepted(&self) -> u32 {
        self.history_len - self.bad_crc_count()
    }

    pub fn voice_present(&self) -> bool {
        self.voice_present
    }

    /// Snapshot for event sinks; `None` until the identity is complete.
    pub fn info(&self) -> Option<PartInfo> {
        self.part_id().map(|part_id| PartInfo {
            rx_id: self.slot as u32,
            part_id,
            is_fixed_part: self.part_type.is_fixed(),
            voice_present: self.voice_present,
        })
    }
}

/// Mask selecting the `len` newest outcomes of a CRC history.
pub(crate) fn history_mask(len: u32) -> u64 {
    if len >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << len) - 1
    }
}
