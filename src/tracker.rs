/// The part tracker: one owned engine per receiver.
///
/// Every decoded packet passes through [`PartTracker::process`]:
///
/// 1. the header is validated; malformed records are discarded untouched,
/// 2. CRC failures count against the current part of the same type (the one
///    the previous valid packet of that type resolved to),
/// 3. identity bits are matched or allocated in the [`PartTable`],
/// 4. the frame number is reconciled, the part refreshed and paired,
/// 5. pending updates are reported to the sink,
/// 6. stale parts are dropped.
///
/// Controller commands arrive through [`HostCommand`], either directly via
/// [`PartTracker::apply`] or queued on a [`ControlChannel`] and drained by
/// [`PartTracker::poll_control`] before each packet.
use crate::comm::ControlChannel;
use crate::dect::MAX_PARTS;
use crate::header::{DecodedPacket, HeaderError, PartType};
use crate::notify::{PartEventSink, TrackerStatus};
use crate::part::PartRef;
use crate::protocol::HostCommand;
use crate::quality::QualityConfig;
use crate::table::{PartTable, Resolution};
use crate::timing::FrameCheck;

/// Tracker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub quality: QualityConfig,
    /// Slot whose payload is forwarded at startup
    pub selected_rx_id: u32,
}

impl TrackerConfig {
    pub const fn new() -> Self {
        Self {
            quality: QualityConfig::new(),
            selected_rx_id: 0,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a packet left no trace in the part table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    Malformed(HeaderError),
    /// CRC failure or identity-less tail with no current part of that type
    NoCurrentPart,
}

/// What the tracker did with one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Attributed to `rx_id` and counted as a good packet
    Accepted { rx_id: u32, frame: FrameCheck },
    /// Counted as a CRC failure of `rx_id`
    BadCrc { rx_id: u32 },
    Discarded(DiscardReason),
}

/// Result of [`PartTracker::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketOutcome<'a> {
    pub disposition: Disposition,
    /// Payload of the selected part
    pub forwarded: Option<&'a [u8]>,
}

impl<'a> PacketOutcome<'a> {
    fn discarded(reason: DiscardReason) -> Self {
        Self {
            disposition: Disposition::Discarded(reason),
            forwarded: None,
        }
    }
}

pub struct PartTracker<S: PartEventSink> {
    table: PartTable,
    sink: S,
    config: TrackerConfig,
    /// Part the previous CRC-valid packet of each type resolved to, indexed
    /// by `PartType::index`
    current: [Option<PartRef>; 2],
    selected_rx_id: u32,
}

impl<S: PartEventSink> PartTracker<S> {
    pub fn new(sink: S) -> Self {
        Self::with_config(sink, TrackerConfig::new())
    }

    pub fn with_config(sink: S, config: TrackerConfig) -> Self {
        Self {
            table: PartTable::new(),
            sink,
            config,
            current: [None; 2],
            selected_rx_id: config.selected_rx_id,
        }
    }

    /// Run one decoded packet through the tracker.
    pub fn process<'a>(&mut self, packet: &DecodedPacket<'a>) -> PacketOutcome<'a> {
        let header = &packet.header;
        if let Err(e) = header.validate() {
            log::debug!("discarding {} header: {}", header.part_type.as_str(), e);
            return PacketOutcome::discarded(DiscardReason::Malformed(e));
        }

        let outcome = if header.crc_valid {
            self.accept(packet)
        } else {
            self.count_bad_crc(packet)
        };

        self.check_staleness(header.timestamp);
        debug_assert!(self.table.pairs_consistent());
        outcome
    }

    fn accept<'a>(&mut self, packet: &DecodedPacket<'a>) -> PacketOutcome<'a> {
        let header = &packet.header;
        let slot = match self
            .table
            .resolve(header.part_type, &header.identity, self.current(header.part_type))
        {
            Resolution::Matched { slot, .. } | Resolution::Continued { slot } => slot,
            Resolution::Allocated { slot, evicted, .. } => {
                if let Some(info) = evicted {
                    log::info!("rx {}: {} evicted", info.rx_id, info.part_id);
                    self.sink.on_lost(&info);
                }
                slot
            }
            Resolution::Unmatched => {
                log::trace!("identity-less {} tail dropped", header.part_type.as_str());
                return PacketOutcome::discarded(DiscardReason::NoCurrentPart);
            }
        };
        self.current[header.part_type.index()] = Some(self.table.parts[slot].part_ref());

        if self.table.parts[slot].part_id_received() {
            self.table.try_pair(slot);
        }
        let frame = self
            .table
            .reconcile(slot, header.frame_number, header.timestamp);
        self.table
            .on_accepted(slot, header.timestamp, &self.config.quality);

        let d = &mut self.table.parts[slot];
        d.note_voice(header.voice_present);
        if header.qt_received {
            d.confirm_qt();
        }
        if d.log_update {
            if let Some(info) = d.info() {
                d.log_update = false;
                log::info!(
                    "rx {}: {} {}{}",
                    info.rx_id,
                    header.part_type.as_str(),
                    info.part_id,
                    if info.voice_present { " voice" } else { "" }
                );
                self.sink.on_updated(&info);
            }
        }

        let rx_id = slot as u32;
        let forwarded = (rx_id == self.selected_rx_id && !packet.payload.is_empty())
            .then_some(packet.payload);
        PacketOutcome {
            disposition: Disposition::Accepted { rx_id, frame },
            forwarded,
        }
    }

    fn count_bad_crc<'a>(&mut self, packet: &DecodedPacket<'a>) -> PacketOutcome<'a> {
        let part_type = packet.header.part_type;
        let slot = self
            .current(part_type)
            .and_then(|r| self.table.index_of(r));
        match slot {
            Some(slot) => {
                self.table.on_bad_crc(slot, &self.config.quality);
                PacketOutcome {
                    disposition: Disposition::BadCrc { rx_id: slot as u32 },
                    forwarded: None,
                }
            }
            None => PacketOutcome::discarded(DiscardReason::NoCurrentPart),
        }
    }

    /// Drop every part that is stale at sample time `now`. Returns how many
    /// parts were dropped.
    pub fn check_staleness(&mut self, now: u64) -> usize {
        let mut dropped = 0;
        for slot in 0..MAX_PARTS {
            let Some(reason) = self.table.stale_reason(slot, now, &self.config.quality) else {
                continue;
            };
            log::debug!("rx {}: stale ({})", slot, reason.as_str());
            if let Some(info) = self.table.release(slot) {
                self.sink.on_lost(&info);
            }
            dropped += 1;
        }
        dropped
    }

    /// Forget every part. Reported parts are announced as lost; the
    /// selection is kept.
    pub fn clear_parts(&mut self) {
        for info in self.table.clear() {
            self.sink.on_lost(&info);
        }
        self.current = [None; 2];
        log::debug!("part table cleared");
    }

    /// Choose the slot whose payload is forwarded. Any value is accepted; an
    /// inactive slot simply forwards nothing.
    pub fn select_rx_part(&mut self, rx_id: u32) {
        if rx_id as usize >= MAX_PARTS {
            log::warn!("rx {} out of range, nothing will be forwarded", rx_id);
        }
        self.selected_rx_id = rx_id;
    }

    pub fn apply(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::SelectRxPart { rx_id } => self.select_rx_part(rx_id),
            HostCommand::ClearParts => self.clear_parts(),
            HostCommand::GetStatus => {
                let status = self.status();
                self.sink.on_status(&status);
            }
        }
    }

    /// Apply every queued command. Returns how many were applied.
    pub fn poll_control(&mut self, control: &ControlChannel) -> usize {
        let mut applied = 0;
        while let Ok(cmd) = control.try_receive() {
            self.apply(cmd);
            applied += 1;
        }
        applied
    }

    pub fn status(&self) -> TrackerStatus {
        let mut status = TrackerStatus {
            selected_rx_id: self.selected_rx_id,
            ..TrackerStatus::default()
        };
        for (slot, d) in self.table.parts.iter().enumerate() {
            if !d.is_active() {
                continue;
            }
            status.active += 1;
            if d.part_id_received() {
                status.identified += 1;
            }
            if self.table.pair_of(slot).is_some() {
                status.paired += 1;
            }
        }
        status
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn table(&self) -> &PartTable {
        &self.table
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn selected_rx_id(&self) -> u32 {
        self.selected_rx_id
    }

    /// Part the previous CRC-valid packet of `part_type` resolved to.
    pub fn current(&self, part_type: PartType) -> Option<PartRef> {
        self.current[part_type.index()]
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Install a new sink, returning the previous one.
    pub fn set_sink(&mut self, sink: S) -> S {
        core::mem::replace(&mut self.sink, sink)
    }
}
