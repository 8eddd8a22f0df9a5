/// Fixed-capacity part table and the matcher/allocator over it.
///
/// Incoming identity bits are matched against active descriptors of the same
/// part type. Partial identities match by prefix agreement so bits spread over
/// several packets accumulate in one slot. When every slot is taken the least
/// recently updated part is evicted to make room.
use heapless::Vec;

use crate::dect::MAX_PARTS;
use crate::header::{IdentityBits, PartType};
use crate::part::{PartDescriptor, PartInfo, PartRef};

/// What `resolve` did with a header's identity bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// An active descriptor matched; `completed` when these bits finished its
    /// identity.
    Matched { slot: usize, completed: bool },
    /// No identity bits; attributed to the current part.
    Continued { slot: usize },
    /// A slot was (re)bound to a new part.
    Allocated {
        slot: usize,
        /// Reported part evicted to make room
        evicted: Option<PartInfo>,
        /// A conflicting partial assembly was dropped first
        restarted: bool,
    },
    /// No identity bits and no current part to attribute them to.
    Unmatched,
}

/// The set of tracked parts.
pub struct PartTable {
    pub(crate) parts: [PartDescriptor; MAX_PARTS],
    /// Last stamp handed out by `next_sequence`
    rx_sequence: u64,
}

impl PartTable {
    pub const fn new() -> Self {
        let mut parts = [PartDescriptor::free(0); MAX_PARTS];
        let mut i = 0;
        while i < MAX_PARTS {
            parts[i] = PartDescriptor::free(i as u8);
            i += 1;
        }
        Self {
            parts,
            rx_sequence: 0,
        }
    }

    /// Descriptor in `slot`, active or not.
    pub fn slot(&self, slot: usize) -> Option<&PartDescriptor> {
        self.parts.get(slot)
    }

    /// Slot index behind a handle, if the handle is still live.
    pub fn index_of(&self, part: PartRef) -> Option<usize> {
        let slot = part.slot as usize;
        let d = self.parts.get(slot)?;
        (d.is_active() && d.generation() == part.generation).then_some(slot)
    }

    pub fn get(&self, part: PartRef) -> Option<&PartDescriptor> {
        self.index_of(part).map(|slot| &self.parts[slot])
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &PartDescriptor> {
        self.parts.iter().filter(|d| d.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.iter_active().count()
    }

    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.rx_sequence += 1;
        self.rx_sequence
    }

    /// Best active match for `identity` among parts of `part_type`.
    ///
    /// Longest agreeing prefix wins (a complete identity beats any partial),
    /// ties go to the lowest slot.
    pub fn find(&self, part_type: PartType, identity: &IdentityBits) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for (slot, d) in self.parts.iter().enumerate() {
            if !d.is_active() || d.part_type != part_type {
                continue;
            }
            let Some(overlap) = d.identity().overlap(identity) else {
                continue;
            };
            if best.map_or(true, |(_, o)| overlap > o) {
                best = Some((slot, overlap));
            }
        }
        best.map(|(slot, _)| slot)
    }

    /// Map a CRC-valid header's identity bits to a descriptor.
    ///
    /// `current` is the part the previous packet of this type resolved to;
    /// identity-less tails are attributed to it, and a complete identity that
    /// conflicts with its partial assembly restarts that assembly.
    pub fn resolve(
        &mut self,
        part_type: PartType,
        identity: &IdentityBits,
        current: Option<PartRef>,
    ) -> Resolution {
        let current = current.and_then(|r| self.index_of(r));

        if identity.is_empty() {
            return match current {
                Some(slot) if self.parts[slot].part_type == part_type => {
                    Resolution::Continued { slot }
                }
                _ => Resolution::Unmatched,
            };
        }

        if let Some(slot) = self.find(part_type, identity) {
            let completed = self.parts[slot].refine(identity);
            return Resolution::Matched { slot, completed };
        }

        let mut restarted = false;
        if identity.is_complete() {
            if let Some(slot) = current {
                let d = &self.parts[slot];
                if d.part_type == part_type && d.is_partial() {
                    log::debug!(
                        "rx {}: identity {} conflicts with partial assembly, restarting",
                        slot,
                        identity.padded()
                    );
                    // Partial parts are never reported, so no loss event
                    let _ = self.release(slot);
                    restarted = true;
                }
            }
        }

        let (slot, evicted) = self.allocate(part_type, *identity);
        Resolution::Allocated {
            slot,
            evicted,
            restarted,
        }
    }

    /// Bind a slot to a new part, evicting the least recently updated part
    /// when the table is full.
    pub(crate) fn allocate(
        &mut self,
        part_type: PartType,
        identity: IdentityBits,
    ) -> (usize, Option<PartInfo>) {
        let (slot, evicted) = match self.parts.iter().position(|d| !d.is_active()) {
            Some(slot) => (slot, None),
            None => {
                let slot = self.least_recently_updated().unwrap_or(0);
                log::debug!("part table full, evicting rx {}", slot);
                (slot, self.release(slot))
            }
        };
        self.parts[slot].activate(part_type, identity);
        log::trace!(
            "rx {}: allocated {} {}/{} bits",
            slot,
            part_type.as_str(),
            identity.len(),
            crate::dect::PART_ID_BITS
        );
        (slot, evicted)
    }

    /// Active slot with the smallest `rx_sequence`, lowest slot on ties.
    pub fn least_recently_updated(&self) -> Option<usize> {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_active())
            .min_by_key(|(slot, d)| (d.rx_sequence, *slot))
            .map(|(slot, _)| slot)
    }

    /// Deactivate a slot, unlinking its partner. Returns the final snapshot of
    /// a reported part.
    pub(crate) fn release(&mut self, slot: usize) -> Option<PartInfo> {
        if !self.parts.get(slot)?.is_active() {
            return None;
        }
        self.unpair(slot);
        let info = self.parts[slot].info();
        self.parts[slot].release();
        info
    }

    /// Deactivate every slot. Returns the snapshots of reported parts.
    pub(crate) fn clear(&mut self) -> Vec<PartInfo, MAX_PARTS> {
        let mut lost = Vec::new();
        for slot in 0..MAX_PARTS {
            if let Some(info) = self.release(slot) {
                let _ = lost.push(info);
            }
        }
        lost
    }
}

impl Default for PartTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::PartId;

    fn full(last: u8) -> IdentityBits {
        IdentityBits::complete(PartId([0x10, 0x20, 0x30, 0x40, last]))
    }

    fn partial(bytes: [u8; 5], len: u8) -> IdentityBits {
        IdentityBits::new(bytes, len).unwrap()
    }

    /// Resolve and stamp like the tracker does for an accepted packet.
    fn accept(table: &mut PartTable, part_type: PartType, identity: IdentityBits) -> Resolution {
        let res = table.resolve(part_type, &identity, None);
        let slot = match res {
            Resolution::Matched { slot, .. } | Resolution::Allocated { slot, .. } => slot,
            _ => panic!("unexpected {res:?}"),
        };
        let seq = table.next_sequence();
        table.parts[slot].rx_sequence = seq;
        res
    }

    // ── Matching ────────────────────────────────────────────────────

    #[test]
    fn new_identity_takes_lowest_free_slot() {
        let mut table = PartTable::new();
        let res = accept(&mut table, PartType::FixedPart, full(1));
        assert_eq!(
            res,
            Resolution::Allocated {
                slot: 0,
                evicted: None,
                restarted: false
            }
        );
        let res = accept(&mut table, PartType::FixedPart, full(2));
        assert!(matches!(res, Resolution::Allocated { slot: 1, .. }));
        assert_eq!(table.active_count(), 2);
    }

    #[test]
    fn same_identity_matches_existing_slot() {
        let mut table = PartTable::new();
        accept(&mut table, PartType::FixedPart, full(1));
        let res = accept(&mut table, PartType::FixedPart, full(1));
        assert_eq!(
            res,
            Resolution::Matched {
                slot: 0,
                completed: false
            }
        );
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn part_type_separates_identical_ids() {
        let mut table = PartTable::new();
        accept(&mut table, PartType::FixedPart, full(1));
        let res = accept(&mut table, PartType::PortablePart, full(1));
        assert!(matches!(res, Resolution::Allocated { slot: 1, .. }));
    }

    #[test]
    fn partial_bits_accumulate_into_one_slot() {
        let mut table = PartTable::new();
        accept(&mut table, PartType::FixedPart, partial([0x10, 0, 0, 0, 0], 8));
        accept(&mut table, PartType::FixedPart, partial([0x10, 0x20, 0x30, 0, 0], 24));
        let res = accept(&mut table, PartType::FixedPart, full(7));
        assert_eq!(
            res,
            Resolution::Matched {
                slot: 0,
                completed: true
            }
        );
        assert_eq!(table.active_count(), 1);
        assert_eq!(
            table.slot(0).unwrap().part_id(),
            Some(PartId([0x10, 0x20, 0x30, 0x40, 7]))
        );
    }

    #[test]
    fn complete_match_beats_partial_prefix() {
        let mut table = PartTable::new();
        table.allocate(PartType::FixedPart, partial([0x10, 0, 0, 0, 0], 8));
        table.allocate(PartType::FixedPart, full(1));
        assert_eq!(table.find(PartType::FixedPart, &full(1)), Some(1));
        // A short prefix agrees with both, lowest slot wins
        assert_eq!(
            table.find(PartType::FixedPart, &partial([0x10, 0, 0, 0, 0], 8)),
            Some(0)
        );
    }

    #[test]
    fn conflicting_full_identity_restarts_current_partial() {
        let mut table = PartTable::new();
        accept(&mut table, PartType::FixedPart, partial([0x55, 0, 0, 0, 0], 8));
        let current = Some(table.slot(0).unwrap().part_ref());
        let res = table.resolve(PartType::FixedPart, &full(1), current);
        assert_eq!(
            res,
            Resolution::Allocated {
                slot: 0,
                evicted: None,
                restarted: true
            }
        );
        assert_eq!(table.active_count(), 1);
        assert!(table.slot(0).unwrap().part_id_received());
        // The old handle is dead
        assert_eq!(table.index_of(current.unwrap()), None);
    }

    #[test]
    fn empty_identity_continues_current_part() {
        let mut table = PartTable::new();
        accept(&mut table, PartType::PortablePart, full(1));
        let current = Some(table.slot(0).unwrap().part_ref());
        assert_eq!(
            table.resolve(PartType::PortablePart, &IdentityBits::none(), current),
            Resolution::Continued { slot: 0 }
        );
        assert_eq!(
            table.resolve(PartType::FixedPart, &IdentityBits::none(), current),
            Resolution::Unmatched
        );
        assert_eq!(
            table.resolve(PartType::PortablePart, &IdentityBits::none(), None),
            Resolution::Unmatched
        );
    }

    // ── Capacity and eviction ───────────────────────────────────────

    #[test]
    fn full_table_evicts_least_recently_updated() {
        let mut table = PartTable::new();
        for i in 0..MAX_PARTS as u8 {
            accept(&mut table, PartType::FixedPart, full(i));
        }
        // Refresh slot 0 so slot 1 becomes the oldest
        accept(&mut table, PartType::FixedPart, full(0));
        let res = accept(&mut table, PartType::FixedPart, full(0xFF));
        match res {
            Resolution::Allocated {
                slot,
                evicted: Some(info),
                ..
            } => {
                assert_eq!(slot, 1);
                assert_eq!(info.rx_id, 1);
                assert_eq!(info.part_id, PartId([0x10, 0x20, 0x30, 0x40, 1]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(table.active_count(), MAX_PARTS);
    }

    #[test]
    fn eviction_of_partial_part_reports_nothing() {
        let mut table = PartTable::new();
        accept(&mut table, PartType::PortablePart, partial([0x99, 0, 0, 0, 0], 8));
        for i in 1..MAX_PARTS as u8 {
            accept(&mut table, PartType::FixedPart, full(i));
        }
        let res = accept(&mut table, PartType::FixedPart, full(0xFF));
        assert_eq!(
            res,
            Resolution::Allocated {
                slot: 0,
                evicted: None,
                restarted: false
            }
        );
    }

    #[test]
    fn capacity_never_exceeded() {
        let mut table = PartTable::new();
        for i in 0..40u8 {
            accept(&mut table, PartType::PortablePart, full(i));
            assert!(table.active_count() <= MAX_PARTS);
        }
    }

    #[test]
    fn clear_reports_only_identified_parts() {
        let mut table = PartTable::new();
        accept(&mut table, PartType::FixedPart, full(1));
        accept(&mut table, PartType::FixedPart, partial([0x77, 0, 0, 0, 0], 8));
        accept(&mut table, PartType::PortablePart, full(2));
        let lost = table.clear();
        assert_eq!(lost.len(), 2);
        assert_eq!(table.active_count(), 0);
    }
}
