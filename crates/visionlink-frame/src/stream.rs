//! Reserved stream ids.
//!
//! Ids below [`FIRST_DYNAMIC_STREAM`] belong to the link itself. Named
//! streams opened by the host are assigned ids from that point upward.

/// Link management: hello exchange, stream announcements, boot control.
pub const CONTROL: u16 = 0;

/// Firmware image bytes sent while booting a device.
pub const BOOT: u16 = 1;

/// First id handed out to a named stream.
pub const FIRST_DYNAMIC_STREAM: u16 = 256;

/// Returns true if the id belongs to the link rather than a named stream.
pub fn is_reserved(id: u16) -> bool {
    id < FIRST_DYNAMIC_STREAM
}

/// Human-readable name for a reserved id.
pub fn reserved_name(id: u16) -> Option<&'static str> {
    match id {
        CONTROL => Some("CONTROL"),
        BOOT => Some("BOOT"),
        _ => None,
    }
}
