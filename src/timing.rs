/// Frame-number reconciliation.
///
/// Each part's frame number is predicted from the time elapsed since its last
/// accepted packet. A portable whose own frame number drifts away from the
/// prediction is pulled back onto its paired fixed part, which defines the
/// frame timing of the link.
use crate::dect::{FRAME_CYCLE, INTER_FRAME_TIME, TIME_TOL};
use crate::table::PartTable;

/// Outcome of checking an observed frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// Observed value matched the prediction (or set the first baseline)
    Accepted,
    /// Replaced with the value derived from the paired fixed part
    Corrected { observed: u8, corrected: u8 },
    /// Diverged with no reference to correct from; adopted as new baseline
    Unreliable { observed: u8, expected: u8 },
}

/// Whole frames in `elapsed` samples, rounded, and the distance to that grid.
fn frames_elapsed(elapsed: u64) -> (u64, u64) {
    let frames = elapsed.saturating_add(INTER_FRAME_TIME / 2) / INTER_FRAME_TIME;
    let residual = elapsed.abs_diff(frames * INTER_FRAME_TIME);
    (frames, residual)
}

fn advance(frame_number: u8, frames: u64) -> u8 {
    ((frame_number as u64 + frames) % FRAME_CYCLE as u64) as u8
}

impl PartTable {
    /// Frame number `slot` should carry at sample time `now`.
    ///
    /// `None` while no packet has been accepted, or when `now` is off the
    /// frame grid by more than `TIME_TOL`.
    pub fn expected_frame_number(&self, slot: usize, now: u64) -> Option<u8> {
        let d = self.parts.get(slot)?;
        if !d.is_active() || d.packet_count == 0 {
            return None;
        }
        let (frames, residual) = frames_elapsed(now.saturating_sub(d.last_seen));
        (residual <= TIME_TOL).then(|| advance(d.frame_number, frames))
    }

    /// Frame number a paired fixed part implies for a packet at `now`.
    ///
    /// The portable transmits in the second half of the frame the fixed part
    /// opened, so the count is truncated rather than rounded.
    fn frame_number_from_pair(&self, slot: usize, now: u64) -> Option<u8> {
        let partner = self.pair_of(slot)?;
        let reference = &self.parts[partner];
        if !reference.part_type().is_fixed() || reference.packet_count == 0 {
            return None;
        }
        let frames = now.saturating_sub(reference.last_seen) / INTER_FRAME_TIME;
        Some(advance(reference.frame_number, frames))
    }

    /// Check `observed` against the prediction for `slot` and store the
    /// frame number the part is taken to be on.
    pub fn reconcile(&mut self, slot: usize, observed: u8, now: u64) -> FrameCheck {
        let Some(d) = self.parts.get(slot) else {
            return FrameCheck::Accepted;
        };
        let first = d.packet_count == 0;
        let expected = self.expected_frame_number(slot, now);

        if first || expected == Some(observed) {
            let d = &mut self.parts[slot];
            d.frame_number = observed;
            d.frame_number_corrected = false;
            return FrameCheck::Accepted;
        }

        if let Some(corrected) = self.frame_number_from_pair(slot, now) {
            let d = &mut self.parts[slot];
            d.frame_number = corrected;
            d.frame_number_corrected = true;
            log::debug!(
                "rx {}: frame number {} corrected to {} from pair",
                slot,
                observed,
                corrected
            );
            return FrameCheck::Corrected {
                observed,
                corrected,
            };
        }

        let d = &mut self.parts[slot];
        let expected = expected.unwrap_or(d.frame_number);
        d.frame_number = observed;
        d.frame_number_corrected = false;
        log::trace!(
            "rx {}: frame number {} unreliable, expected {}",
            slot,
            observed,
            expected
        );
        FrameCheck::Unreliable { observed, expected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dect::INTER_SLOT_TIME;
    use crate::header::{IdentityBits, PartId, PartType};

    const FP: PartId = PartId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
    const PP: PartId = PartId([0xAA, 0xBB, 0xCC, 0xDD, 0x01]);

    /// Add a part and record one accepted packet at `now` with `fn_`.
    fn seen(table: &mut PartTable, part_type: PartType, id: PartId, fn_: u8, now: u64) -> usize {
        let slot = table.allocate(part_type, IdentityBits::complete(id)).0;
        table.reconcile(slot, fn_, now);
        table.parts[slot].packet_count = 1;
        table.parts[slot].last_seen = now;
        slot
    }

    fn touch(table: &mut PartTable, slot: usize, now: u64) {
        table.parts[slot].packet_count += 1;
        table.parts[slot].last_seen = now;
    }

    #[test]
    fn rounding_tolerates_small_jitter() {
        assert_eq!(frames_elapsed(INTER_FRAME_TIME * 3 + 4), (3, 4));
        assert_eq!(frames_elapsed(INTER_FRAME_TIME * 3 - 4), (3, 4));
        assert_eq!(frames_elapsed(0), (0, 0));
    }

    #[test]
    fn huge_gap_does_not_overflow() {
        let (frames, _) = frames_elapsed(u64::MAX);
        assert_eq!(frames, u64::MAX / INTER_FRAME_TIME);
        assert!(advance(15, frames) < FRAME_CYCLE);

        let mut table = PartTable::new();
        let fp = seen(&mut table, PartType::FixedPart, FP, 0, 0);
        let pp = seen(&mut table, PartType::PortablePart, PP, 0, 12 * INTER_SLOT_TIME);
        table.try_pair(pp);
        assert!(table.expected_frame_number(fp, u64::MAX).is_none());
        table.reconcile(pp, 3, u64::MAX);
    }

    #[test]
    fn first_packet_sets_baseline() {
        let mut table = PartTable::new();
        let slot = table.allocate(PartType::FixedPart, IdentityBits::complete(FP)).0;
        assert_eq!(table.reconcile(slot, 9, 1_000), FrameCheck::Accepted);
        assert_eq!(table.slot(slot).unwrap().frame_number(), 9);
    }

    #[test]
    fn frame_number_wraps_over_multiframe() {
        let mut table = PartTable::new();
        let fp = seen(&mut table, PartType::FixedPart, FP, 14, 0);
        let now = 3 * INTER_FRAME_TIME;
        assert_eq!(table.expected_frame_number(fp, now), Some(1));
        assert_eq!(table.reconcile(fp, 1, now), FrameCheck::Accepted);
    }

    #[test]
    fn within_tolerance_is_accepted_unmodified() {
        let mut table = PartTable::new();
        let fp = seen(&mut table, PartType::FixedPart, FP, 2, 0);
        let pp = seen(&mut table, PartType::PortablePart, PP, 2, 12 * INTER_SLOT_TIME);
        table.try_pair(pp);

        let now = 12 * INTER_SLOT_TIME + INTER_FRAME_TIME + TIME_TOL;
        assert_eq!(table.reconcile(pp, 3, now), FrameCheck::Accepted);
        let d = table.slot(pp).unwrap();
        assert_eq!(d.frame_number(), 3);
        assert!(!d.frame_number_corrected());
        assert_eq!(table.pair_of(fp), Some(pp));
    }

    #[test]
    fn divergent_portable_is_corrected_from_fixed_part() {
        let mut table = PartTable::new();
        let fp = seen(&mut table, PartType::FixedPart, FP, 2, 0);
        let pp = seen(&mut table, PartType::PortablePart, PP, 2, 12 * INTER_SLOT_TIME);
        table.try_pair(pp);

        // Fixed part moves on to frame 4
        let fp_time = 2 * INTER_FRAME_TIME;
        table.reconcile(fp, 4, fp_time);
        touch(&mut table, fp, fp_time);

        // Portable claims frame 9 in the second half of that frame
        let now = fp_time + 12 * INTER_SLOT_TIME;
        assert_eq!(
            table.reconcile(pp, 9, now),
            FrameCheck::Corrected {
                observed: 9,
                corrected: 4
            }
        );
        let d = table.slot(pp).unwrap();
        assert_eq!(d.frame_number(), 4);
        assert!(d.frame_number_corrected());
    }

    #[test]
    fn off_grid_timing_is_corrected_too() {
        let mut table = PartTable::new();
        seen(&mut table, PartType::FixedPart, FP, 0, 0);
        let pp = seen(&mut table, PartType::PortablePart, PP, 0, 12 * INTER_SLOT_TIME);
        table.try_pair(pp);

        // Right frame number, but 100 samples off the frame grid
        let now = 12 * INTER_SLOT_TIME + INTER_FRAME_TIME + 100;
        assert!(matches!(
            table.reconcile(pp, 1, now),
            FrameCheck::Corrected { corrected: 1, .. }
        ));
    }

    #[test]
    fn accepted_packet_clears_correction_flag() {
        let mut table = PartTable::new();
        seen(&mut table, PartType::FixedPart, FP, 0, 0);
        let pp = seen(&mut table, PartType::PortablePart, PP, 0, 12 * INTER_SLOT_TIME);
        table.try_pair(pp);

        let t1 = 12 * INTER_SLOT_TIME + INTER_FRAME_TIME;
        table.reconcile(pp, 7, t1);
        touch(&mut table, pp, t1);
        assert!(table.slot(pp).unwrap().frame_number_corrected());

        let t2 = t1 + INTER_FRAME_TIME;
        assert_eq!(table.reconcile(pp, 2, t2), FrameCheck::Accepted);
        assert!(!table.slot(pp).unwrap().frame_number_corrected());
    }

    #[test]
    fn unpaired_divergence_is_unreliable_and_resyncs() {
        let mut table = PartTable::new();
        let pp = seen(&mut table, PartType::PortablePart, PP, 5, 0);
        let now = INTER_FRAME_TIME;
        assert_eq!(
            table.reconcile(pp, 11, now),
            FrameCheck::Unreliable {
                observed: 11,
                expected: 6
            }
        );
        assert_eq!(table.slot(pp).unwrap().frame_number(), 11);
        assert!(!table.slot(pp).unwrap().frame_number_corrected());
    }

    #[test]
    fn fixed_part_is_never_corrected_from_portable() {
        let mut table = PartTable::new();
        let fp = seen(&mut table, PartType::FixedPart, FP, 0, 0);
        let pp = seen(&mut table, PartType::PortablePart, PP, 0, 12 * INTER_SLOT_TIME);
        table.try_pair(pp);
        assert!(matches!(
            table.reconcile(fp, 9, INTER_FRAME_TIME),
            FrameCheck::Unreliable { observed: 9, .. }
        ));
    }
}
