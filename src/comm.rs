/// Communication layer: NDJSON parsing and formatting, and the control handoff.
///
/// The scanner reads decoded packets and controller commands as
/// newline-delimited JSON and reports parts either as NDJSON or as the
/// classic one-line `scan-report:` text. Commands may arrive on a different
/// thread than packets; they are queued on a [`ControlChannel`] that the
/// packet thread drains before every packet.
use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::dect::{channel_frequency, PART_ID_LEN};
use crate::header::{DecodedPacket, HeaderRecord, IdentityBits, PartId, PartType};
use crate::notify::{PartEvent, TrackerStatus};
use crate::part::PartInfo;
use crate::protocol::{
    HostCommand, PartIdString, Payload, RawCommand, RawPacket, ReportMessage, MAX_MSG_LEN, VERSION,
};

/// Command queue from the controller thread to the packet thread
pub type ControlChannel = Channel<CriticalSectionRawMutex, HostCommand, 8>;

/// One `scan-report:` text line
pub type ReportLine = heapless::String<64>;

// ── Serialization helpers ──────────────────────────────────────────────

/// Serialize a ReportMessage to JSON bytes and write to the output buffer.
/// Returns the number of bytes written, or None if serialization failed.
pub fn serialize_message(msg: &ReportMessage, buf: &mut [u8]) -> Option<usize> {
    match serde_json_core::to_slice(msg, buf) {
        Ok(len) => {
            // Append newline for NDJSON
            if len < buf.len() {
                buf[len] = b'\n';
                Some(len + 1)
            } else {
                Some(len)
            }
        }
        Err(_) => None,
    }
}

/// Format a part identity as ten lowercase hex digits.
pub fn format_part_id(id: &PartId, buf: &mut PartIdString) {
    buf.clear();
    let _ = write!(buf, "{}", id);
}

/// Build the NDJSON message for a part event. `id_buf` must hold the
/// formatted identity of `event`.
pub fn event_message<'a>(event: &PartEvent, id_buf: &'a PartIdString, channel: u8) -> ReportMessage<'a> {
    match event {
        PartEvent::Updated(info) => ReportMessage::PartUpdated {
            rx_id: info.rx_id,
            part_id: id_buf,
            fixed: info.is_fixed_part,
            voice: info.voice_present,
            ch: channel,
        },
        PartEvent::Lost(info) => ReportMessage::PartLost {
            rx_id: info.rx_id,
            part_id: id_buf,
            fixed: info.is_fixed_part,
            voice: info.voice_present,
            ch: channel,
        },
    }
}

pub fn status_message(status: &TrackerStatus, channel: u8) -> ReportMessage<'static> {
    ReportMessage::Status {
        active: status.active,
        identified: status.identified,
        paired: status.paired,
        selected: status.selected_rx_id,
        ch: channel,
        version: VERSION,
    }
}

/// Format the text report:
/// `scan-report: U <chan> <MHz> <rx_id> <part id> F|P V|-`.
pub fn format_scan_report(event: &PartEvent, channel: usize, out: &mut ReportLine) {
    let (kind, info): (char, &PartInfo) = match event {
        PartEvent::Updated(info) => ('U', info),
        PartEvent::Lost(info) => ('L', info),
    };
    let hz = channel_frequency(channel).unwrap_or(0);
    out.clear();
    let _ = write!(
        out,
        "scan-report: {} {} {}.{:06} {} {} {} {}",
        kind,
        channel,
        hz / 1_000_000,
        hz % 1_000_000,
        info.rx_id,
        info.part_id,
        if info.is_fixed_part { 'F' } else { 'P' },
        if info.voice_present { 'V' } else { '-' },
    );
}

// ── Parsing ─────────────────────────────────────────────────────────────

/// A decoded packet read from the wire, owning its payload.
#[derive(Debug, Clone)]
pub struct PacketLine {
    pub header: HeaderRecord,
    pub payload: Payload,
}

impl PacketLine {
    pub fn as_packet(&self) -> DecodedPacket<'_> {
        DecodedPacket::new(self.header, &self.payload)
    }
}

/// One input line: a packet or a controller command.
#[derive(Debug, Clone)]
pub enum InputLine {
    Packet(PacketLine),
    Command(HostCommand),
}

/// Deserialize a HostCommand from a JSON byte slice.
pub fn parse_command(data: &[u8]) -> Option<HostCommand> {
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return None;
    }
    let (raw, _) = serde_json_core::from_slice::<RawCommand>(trimmed).ok()?;
    match raw.cmd.as_str() {
        "select" => raw.rx_id.map(|rx_id| HostCommand::SelectRxPart { rx_id }),
        "clear" => Some(HostCommand::ClearParts),
        "status" => Some(HostCommand::GetStatus),
        _ => None,
    }
}

/// Deserialize a decoded packet from a JSON byte slice.
///
/// Lines whose identity is inconsistent (bits set past the declared length,
/// more than 40 bits) are rejected here, before they reach the tracker.
pub fn parse_packet(data: &[u8]) -> Option<PacketLine> {
    let trimmed = trim_trailing_whitespace(data);
    if trimmed.is_empty() {
        return None;
    }
    let (raw, _) = serde_json_core::from_slice::<RawPacket>(trimmed).ok()?;

    let part_type = match raw.part.as_str() {
        "fp" => PartType::FixedPart,
        "pp" => PartType::PortablePart,
        _ => return None,
    };

    let identity = match raw.id {
        Some(ref hex) => {
            let (bytes, digits) = decode_identity(hex.as_bytes())?;
            let bits = raw.bits.unwrap_or(digits * 4);
            IdentityBits::new(bytes, bits).ok()?
        }
        None => IdentityBits::none(),
    };

    let mut payload = Payload::new();
    if let Some(ref hex) = raw.b {
        decode_hex(hex.as_bytes(), &mut payload)?;
    }

    Some(PacketLine {
        header: HeaderRecord {
            part_type,
            identity,
            frame_number: raw.frame_number,
            crc_valid: raw.crc,
            voice_present: raw.voice,
            qt_received: raw.qt,
            timestamp: raw.ts,
        },
        payload,
    })
}

/// Parse one input line, trying the command form first.
pub fn parse_line(data: &[u8]) -> Option<InputLine> {
    if let Some(cmd) = parse_command(data) {
        return Some(InputLine::Command(cmd));
    }
    parse_packet(data).map(InputLine::Packet)
}

fn hex_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Up to ten hex digits, left aligned into identity bytes.
fn decode_identity(hex: &[u8]) -> Option<([u8; PART_ID_LEN], u8)> {
    if hex.len() > PART_ID_LEN * 2 {
        return None;
    }
    let mut bytes = [0u8; PART_ID_LEN];
    for (i, &c) in hex.iter().enumerate() {
        let nibble = hex_nibble(c)?;
        bytes[i / 2] |= if i % 2 == 0 { nibble << 4 } else { nibble };
    }
    Some((bytes, hex.len() as u8))
}

fn decode_hex(hex: &[u8], out: &mut Payload) -> Option<()> {
    if hex.len() % 2 != 0 {
        return None;
    }
    for pair in hex.chunks(2) {
        let byte = (hex_nibble(pair[0])? << 4) | hex_nibble(pair[1])?;
        out.push(byte).ok()?;
    }
    Some(())
}

// ── NDJSON line reader ─────────────────────────────────────────────────

/// NDJSON reader state machine.
/// Accumulates bytes until a newline is found, then yields the line.
pub struct LineReader {
    buf: [u8; MAX_MSG_LEN],
    pos: usize,
    overflowed: bool,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: [0; MAX_MSG_LEN],
            pos: 0,
            overflowed: false,
        }
    }

    /// Feed a byte into the reader. Returns a complete line (without newline)
    /// when one is detected.
    pub fn feed(&mut self, byte: u8) -> Option<&[u8]> {
        if byte == b'\n' || byte == b'\r' {
            let was_overflowed = core::mem::replace(&mut self.overflowed, false);
            let len = core::mem::replace(&mut self.pos, 0);
            if len > 0 && !was_overflowed {
                Some(&self.buf[..len])
            } else {
                None
            }
        } else if self.overflowed {
            None
        } else if self.pos < self.buf.len() {
            self.buf[self.pos] = byte;
            self.pos += 1;
            None
        } else {
            // Overflow: drop the rest of this line
            self.overflowed = true;
            self.pos = 0;
            None
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_trailing_whitespace(data: &[u8]) -> &[u8] {
    let mut end = data.len();
    while end > 0 && matches!(data[end - 1], b' ' | b'\n' | b'\r' | b'\t') {
        end -= 1;
    }
    &data[..end]
}
