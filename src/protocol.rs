/// JSON message protocol between the scanner and its controller.
///
/// All messages are newline-delimited JSON (NDJSON).
/// Uses `heapless` types for no_std/no-alloc operation.
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

use crate::dect::B_FIELD_BITS;

/// Part identity as ten lowercase hex digits ("aabbccddee")
pub type PartIdString = String<10>;

/// B-field payload length in bytes
pub const PAYLOAD_LEN: usize = B_FIELD_BITS / 8;

/// Payload bytes of one packet
pub type Payload = Vec<u8, PAYLOAD_LEN>;

/// Hex-encoded payload as it appears on the wire
pub type HexPayload = String<{ PAYLOAD_LEN * 2 }>;

/// Messages sent from the scanner to the controller
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ReportMessage<'a> {
    /// A part appeared or changed
    #[serde(rename = "updated")]
    PartUpdated {
        rx_id: u32,
        part_id: &'a PartIdString,
        fixed: bool,
        voice: bool,
        /// DECT carrier index the part was seen on
        ch: u8,
    },
    /// A part went away
    #[serde(rename = "lost")]
    PartLost {
        rx_id: u32,
        part_id: &'a PartIdString,
        fixed: bool,
        voice: bool,
        ch: u8,
    },
    /// Tracker status report
    #[serde(rename = "status")]
    Status {
        active: u8,
        identified: u8,
        paired: u8,
        selected: u32,
        ch: u8,
        version: &'static str,
    },
}

/// Commands sent from the controller to the scanner.
///
/// Deserialized manually via [`RawCommand`] in `comm::parse_command()` because
/// `serde_json_core` does not support internally tagged enums (`deserialize_any`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Forward the payload of this part
    SelectRxPart { rx_id: u32 },
    /// Forget every tracked part (retune, explicit reset)
    ClearParts,
    /// Request current status
    GetStatus,
}

/// Wire format for host commands: a flat struct that `serde_json_core` can
/// deserialize without `deserialize_any`. Converted to [`HostCommand`] in
/// `comm::parse_command()`.
#[derive(Deserialize)]
pub(crate) struct RawCommand {
    pub cmd: String<16>,
    #[serde(default)]
    pub rx_id: Option<u32>,
}

/// Wire format for one decoded packet from the field extractor.
/// Converted to a `HeaderRecord` in `comm::parse_packet()`.
#[derive(Deserialize)]
pub(crate) struct RawPacket {
    /// "fp" or "pp"
    pub part: String<4>,
    /// Known identity bits as hex, MSB first
    #[serde(default)]
    pub id: Option<PartIdString>,
    /// Number of valid identity bits (defaults to 4 per hex digit)
    #[serde(default)]
    pub bits: Option<u8>,
    #[serde(rename = "fn")]
    pub frame_number: u8,
    #[serde(default = "crc_ok")]
    pub crc: bool,
    #[serde(default)]
    pub voice: bool,
    #[serde(default)]
    pub qt: bool,
    /// Receiver sample counter
    pub ts: u64,
    /// B-field payload as hex
    #[serde(default)]
    pub b: Option<HexPayload>,
}

fn crc_ok() -> bool {
    true
}

/// Scanner version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum size of a serialized JSON message
pub const MAX_MSG_LEN: usize = 512;

/// Buffer type for serialized JSON messages
pub type MsgBuffer = Vec<u8, MAX_MSG_LEN>;
