//! dectscan library: DECT part identity tracking engine.
//!
//! Receives decoded DECT packet headers from an upstream field extractor and
//! keeps track of which fixed parts (base stations) and portable parts
//! (handsets) are on the air: assembling their identities, pairing handsets
//! with their base, keeping frame numbers consistent and dropping parts that
//! went silent. This crate contains all tracking, protocol and command logic
//! with no platform dependencies, testable on any host with `cargo test`.
//! Binaries (the `scanner-std` host tool) are thin consumers that provide the
//! packet source and output sinks.
//!
//! Layout:
//! - `dect`, `header`: air-interface constants and the decoded header record
//! - `part`, `table`, `pairing`, `timing`, `quality`: the part table and the
//!   rules applied to it
//! - `tracker`, `notify`: the owned engine and its event sinks
//! - `protocol`, `comm`: NDJSON wire format and the control handoff

#![cfg_attr(not(test), no_std)]

pub mod comm;
pub mod dect;
pub mod header;
pub mod notify;
pub mod pairing;
pub mod part;
pub mod protocol;
pub mod quality;
pub mod table;
pub mod timing;
pub mod tracker;

pub use header::{DecodedPacket, HeaderError, HeaderRecord, IdentityBits, PartId, PartType};
pub use notify::{EventLog, PartEvent, PartEventSink, TrackerStatus};
pub use part::{PartInfo, PartRef};
pub use tracker::{Disposition, PacketOutcome, PartTracker, TrackerConfig};
