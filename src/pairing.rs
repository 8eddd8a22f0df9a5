/// Fixed/portable pairing.
///
/// A portable part locked to a base station carries the base's identity
/// fragment in its own identity. Once both are identified they are linked in
/// both directions; the fixed side then serves as the timing reference for
/// the portable side.
use crate::part::PartState;
use crate::table::PartTable;

impl PartTable {
    /// Validated partner of `slot`: live, identified, and linked back.
    pub fn pair_of(&self, slot: usize) -> Option<usize> {
        let link = self.parts.get(slot)?.pair()?;
        let partner = self.index_of(link)?;
        let back = self.parts[partner].pair()?;
        (self.index_of(back) == Some(slot)).then_some(partner)
    }

    /// Link an identified part with an identified part of the opposite type
    /// sharing its identity fragment. Returns the partner slot.
    ///
    /// An existing link that is dead or no longer shares the fragment is
    /// dropped on both sides first. Parts already linked elsewhere are skipped.
    pub fn try_pair(&mut self, slot: usize) -> Option<usize> {
        let d = self.parts.get(slot)?;
        let id = d.part_id()?;
        let wanted = d.part_type().opposite();

        if let Some(partner) = self.pair_of(slot) {
            let still_shared = self.parts[partner]
                .part_id()
                .is_some_and(|other| other.shares_fragment(id));
            if still_shared {
                return Some(partner);
            }
        }
        self.unpair(slot);

        let candidate = self.parts.iter().position(|other| {
            other.part_type() == wanted
                && other.part_id().is_some_and(|other_id| other_id.shares_fragment(id))
                && other.pair().is_none()
        })?;

        let here = self.parts[slot].part_ref();
        let there = self.parts[candidate].part_ref();
        self.parts[slot].set_pair(Some(there));
        self.parts[candidate].set_pair(Some(here));
        log::debug!("rx {} paired with rx {} ({})", slot, candidate, id);
        Some(candidate)
    }

    /// Drop the link of `slot` and the partner's link back to it.
    pub(crate) fn unpair(&mut self, slot: usize) {
        let Some(link) = self.parts.get(slot).and_then(|d| d.pair()) else {
            return;
        };
        let here = self.parts[slot].part_ref();
        if let Some(partner) = self.index_of(link) {
            if self.parts[partner].pair() == Some(here) {
                self.parts[partner].set_pair(None);
            }
        }
        self.parts[slot].set_pair(None);
    }

    /// Every stored link points at a live part that links straight back.
    pub fn pairs_consistent(&self) -> bool {
        self.parts.iter().enumerate().all(|(slot, d)| match d.state() {
            PartState::Identified { pair: Some(_), .. } => self.pair_of(slot).is_some(),
            _ => true,
        })
    }
}
