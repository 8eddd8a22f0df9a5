/// Packet quality and part lifetime.
///
/// Accepted packets refresh a part; CRC failures count against it inside a
/// sliding window over its most recent attributed packets. A part that falls
/// silent or whose window is dominated by CRC failures is stale.
use crate::dect::INTER_FRAME_TIME;
use crate::part::{history_mask, PartDescriptor};
use crate::table::PartTable;

/// Longest quality window the per-part history can hold.
pub const MAX_QUALITY_WINDOW: u32 = u64::BITS;

/// Thresholds of the lifetime monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityConfig {
    /// Frames without an accepted packet before a part is dropped
    pub stale_frames: u64,
    /// Most recent attributed packets (accepted + failed) judged together,
    /// capped at `MAX_QUALITY_WINDOW`
    pub window: u32,
    /// CRC failures needed in the window before the ratio counts
    pub min_bad_crc: u32,
}

impl QualityConfig {
    pub const fn new() -> Self {
        Self {
            stale_frames: 32,
            window: 32,
            min_bad_crc: 4,
        }
    }

    /// Inactivity threshold in samples.
    pub fn stale_after(&self) -> u64 {
        self.stale_frames.saturating_mul(INTER_FRAME_TIME)
    }

    fn window_len(&self) -> u32 {
        self.window.clamp(1, MAX_QUALITY_WINDOW)
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a part was judged stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No accepted packet within the inactivity window
    Silent,
    /// CRC failures outnumber accepted packets in the window
    BadCrc,
}

impl StaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleReason::Silent => "silent",
            StaleReason::BadCrc => "bad crc",
        }
    }
}

impl PartTable {
    /// Count an accepted packet for `slot` received at `now`.
    pub fn on_accepted(&mut self, slot: usize, now: u64, config: &QualityConfig) {
        if !self.parts.get(slot).is_some_and(|d| d.is_active()) {
            return;
        }
        let seq = self.next_sequence();
        let d = &mut self.parts[slot];
        d.packet_count += 1;
        d.rx_sequence = seq;
        d.last_seen = now;
        record_outcome(d, false, config);
    }

    /// Count a CRC failure attributed to `slot`.
    pub fn on_bad_crc(&mut self, slot: usize, config: &QualityConfig) {
        if let Some(d) = self.parts.get_mut(slot).filter(|d| d.is_active()) {
            record_outcome(d, true, config);
        }
    }

    /// Whether `slot` should be dropped at sample time `now`.
    pub fn stale_reason(&self, slot: usize, now: u64, config: &QualityConfig) -> Option<StaleReason> {
        let d = self.parts.get(slot).filter(|d| d.is_active())?;
        if now.saturating_sub(d.last_seen) > config.stale_after() {
            return Some(StaleReason::Silent);
        }
        let bad = d.bad_crc_count();
        if bad >= config.min_bad_crc && bad > d.window_accepted() {
            return Some(StaleReason::BadCrc);
        }
        None
    }
}

/// Push one outcome into the part's history; the oldest falls out once the
/// window is full.
fn record_outcome(d: &mut PartDescriptor, failed: bool, config: &QualityConfig) {
    let len = config.window_len();
    d.crc_history = ((d.crc_history << 1) | failed as u64) & history_mask(len);
    d.history_len = (d.history_len + 1).min(len);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{IdentityBits, PartId, PartType};

    const ID: PartId = PartId([0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);

    fn table_with_part() -> (PartTable, usize) {
        let mut table = PartTable::new();
        let slot = table.allocate(PartType::FixedPart, IdentityBits::complete(ID)).0;
        (table, slot)
    }

    #[test]
    fn accepted_packet_refreshes_part() {
        let config = QualityConfig::new();
        let (mut table, slot) = table_with_part();
        table.on_accepted(slot, 500, &config);
        table.on_accepted(slot, 900, &config);
        let d = table.slot(slot).unwrap();
        assert_eq!(d.packet_count(), 2);
        assert_eq!(d.last_seen(), 900);
        assert_eq!(d.rx_sequence(), 2);
    }

    #[test]
    fn rx_sequence_orders_parts_by_recency() {
        let config = QualityConfig::new();
        let mut table = PartTable::new();
        let a = table.allocate(PartType::FixedPart, IdentityBits::complete(ID)).0;
        let b = table
            .allocate(PartType::PortablePart, IdentityBits::complete(ID))
            .0;
        table.on_accepted(a, 0, &config);
        table.on_accepted(b, 0, &config);
        table.on_accepted(a, 0, &config);
        assert!(table.slot(b).unwrap().rx_sequence() < table.slot(a).unwrap().rx_sequence());
        assert_eq!(table.least_recently_updated(), Some(b));
    }

    #[test]
    fn silence_boundary() {
        let config = QualityConfig::new();
        let (mut table, slot) = table_with_part();
        table.on_accepted(slot, 1_000, &config);
        let limit = 1_000 + config.stale_after();
        assert_eq!(table.stale_reason(slot, limit, &config), None);
        assert_eq!(
            table.stale_reason(slot, limit + 1, &config),
            Some(StaleReason::Silent)
        );
    }

    #[test]
    fn bad_crc_majority_is_stale() {
        let config = QualityConfig::new();
        let (mut table, slot) = table_with_part();
        for _ in 0..3 {
            table.on_accepted(slot, 0, &config);
        }
        for _ in 0..3 {
            table.on_bad_crc(slot, &config);
        }
        // Three failures against three good packets: not a majority yet
        assert_eq!(table.stale_reason(slot, 0, &config), None);
        table.on_bad_crc(slot, &config);
        assert_eq!(table.stale_reason(slot, 0, &config), Some(StaleReason::BadCrc));
    }

    #[test]
    fn few_failures_on_a_fresh_part_are_tolerated() {
        let config = QualityConfig::new();
        let (mut table, slot) = table_with_part();
        table.on_bad_crc(slot, &config);
        table.on_bad_crc(slot, &config);
        table.on_bad_crc(slot, &config);
        assert_eq!(table.stale_reason(slot, 0, &config), None);
    }

    #[test]
    fn old_failures_slide_out_of_the_window() {
        let config = QualityConfig::new();
        let (mut table, slot) = table_with_part();
        for _ in 0..3 {
            table.on_bad_crc(slot, &config);
        }
        for _ in 0..config.window {
            table.on_accepted(slot, 0, &config);
        }
        let d = table.slot(slot).unwrap();
        assert_eq!(d.bad_crc_count(), 0);
        assert_eq!(table.stale_reason(slot, 0, &config), None);
    }

    #[test]
    fn few_failures_after_clean_window_are_tolerated() {
        let config = QualityConfig::new();
        let (mut table, slot) = table_with_part();
        for _ in 0..config.window {
            table.on_accepted(slot, 0, &config);
        }
        for _ in 0..4 {
            table.on_bad_crc(slot, &config);
        }
        // 4 failures against the 28 good packets still in the window
        let d = table.slot(slot).unwrap();
        assert_eq!(d.bad_crc_count(), 4);
        assert_eq!(d.window_accepted(), config.window - 4);
        assert_eq!(table.stale_reason(slot, 0, &config), None);
    }

    #[test]
    fn failure_burst_after_long_clean_run_is_stale() {
        let config = QualityConfig::new();
        let (mut table, slot) = table_with_part();
        for _ in 0..100 {
            table.on_accepted(slot, 0, &config);
        }
        for _ in 0..config.window / 2 + 1 {
            table.on_bad_crc(slot, &config);
        }
        assert_eq!(table.stale_reason(slot, 0, &config), Some(StaleReason::BadCrc));
    }

    #[test]
    fn oversized_window_is_capped() {
        let config = QualityConfig {
            window: 1_000,
            ..QualityConfig::new()
        };
        let (mut table, slot) = table_with_part();
        for _ in 0..200 {
            table.on_accepted(slot, 0, &config);
        }
        assert_eq!(table.slot(slot).unwrap().window_accepted(), MAX_QUALITY_WINDOW);
    }

    #[test]
    fn stale_after_saturates() {
        let config = QualityConfig {
            stale_frames: u64::MAX,
            ..QualityConfig::new()
        };
        assert_eq!(config.stale_after(), u64::MAX);
    }

    #[test]
    fn free_slot_is_ignored() {
        let config = QualityConfig::new();
        let mut table = PartTable::new();
        table.on_accepted(0, 0, &config);
        table.on_bad_crc(0, &config);
        assert_eq!(table.slot(0).unwrap().packet_count(), 0);
        assert_eq!(table.stale_reason(0, u64::MAX, &config), None);
    }
}
