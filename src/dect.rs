/// DECT air-interface constants and the band plan the scanner hops over.
///
/// Timing is expressed in receiver samples: the upstream receiver runs at four
/// samples per symbol (1.152 Msym/s), so one slot of 480 symbols spans
/// `480 * 4` samples and one TDMA frame of 24 slots spans 10 ms.

/// Maximum number of DECT parts tracked at once.
pub const MAX_PARTS: usize = 8;

/// Timing tolerance in samples when checking a packet against the frame grid.
pub const TIME_TOL: u64 = 10;

/// Samples between the starts of two consecutive slots.
pub const INTER_SLOT_TIME: u64 = 480 * 4;

/// Samples between the starts of two consecutive frames.
pub const INTER_FRAME_TIME: u64 = INTER_SLOT_TIME * 24;

/// Frame numbers count modulo one multiframe.
pub const FRAME_CYCLE: u8 = 16;

/// Length of a part identity in bits (RFPI / portable identity).
pub const PART_ID_BITS: u8 = 40;

/// Length of a part identity in bytes.
pub const PART_ID_LEN: usize = 5;

/// Leading identity bits shared by a fixed part and the portables locked to it.
pub const PAIR_FRAGMENT_BITS: u8 = 32;

/// A-field (header) length in bits.
pub const A_FIELD_BITS: usize = 64;

/// B-field (payload) length in bits for a full slot.
pub const B_FIELD_BITS: usize = 320;

/// Number of DECT carriers in the European band.
pub const DECT_CHANNEL_COUNT: usize = 10;

/// DECT carrier centre frequencies in Hz, channel 0 first.
pub const DECT_CHANNELS: [u32; DECT_CHANNEL_COUNT] = [
    1_881_792_000,
    1_883_520_000,
    1_885_248_000,
    1_886_976_000,
    1_888_704_000,
    1_890_432_000,
    1_892_160_000,
    1_893_888_000,
    1_895_616_000,
    1_897_344_000,
];

/// Default dwell time per carrier in milliseconds.
/// Ten frames is enough to see every active fixed part beacon at least once.
pub const DEFAULT_DWELL_MS: u64 = 100;

/// Centre frequency of a carrier, `None` for an index outside the band.
pub fn channel_frequency(index: usize) -> Option<u32> {
    DECT_CHANNELS.get(index).copied()
}

/// Carrier index following `index`, wrapping back to channel 0.
pub fn next_channel(index: usize) -> usize {
    if index + 1 >= DECT_CHANNEL_COUNT {
        0
    } else {
        index + 1
    }
}
