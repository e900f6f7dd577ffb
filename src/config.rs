/// Maximum number of card slots the driver keeps a sequence counter for.
///
/// If only the contactless slot of a device is used, 1 is enough.
pub const MAX_SLOT_COUNT: usize = 6;

/// Maximum payload carried by a single frame.
///
/// SpringCore-class couplers support extended APDUs with up to 64 kB of
/// data, which makes payloads of up to 65545 bytes. Short APDUs (255 bytes
/// of data) are generally enough on a constrained host and make payloads of
/// up to 261 bytes.
pub const MAX_PAYLOAD_LEN: usize = 261;

/// Maximum payload of a slot-change notification: 2 bits per slot, so 4
/// bytes fit any device.
pub const MAX_INTERRUPT_PAYLOAD_LEN: usize = 4;

/// Per-response timeout for control exchanges, in milliseconds.
pub const CONTROL_TIMEOUT_MS: u64 = 200;

/// Per-response timeout for bulk exchanges, in milliseconds.
pub const BULK_TIMEOUT_MS: u64 = 1200;

/// How many consecutive time extensions the exchange engine absorbs before
/// giving up. At one-second granularity this is roughly two minutes.
pub const TIME_EXTENSION_LIMIT: u16 = 120;
