use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Size of the host's clock reply.
pub const PACKET_LEN: usize = 16;

/// Encode a monotonic reading as `sec i64 LE | nsec i32 LE | 4 zero bytes`.
pub fn encode(elapsed: Duration) -> [u8; PACKET_LEN] {
    let mut out = [0u8; PACKET_LEN];
    let secs = i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX);
    out[..8].copy_from_slice(&secs.to_le_bytes());
    out[8..12].copy_from_slice(&(elapsed.subsec_nanos() as i32).to_le_bytes());
    out
}

pub fn decode(bytes: &[u8]) -> Result<Duration> {
    if bytes.len() < PACKET_LEN {
        return Err(ProtocolError::Truncated {
            what: "timesync packet",
            expected: PACKET_LEN,
            actual: bytes.len(),
        });
    }
    let mut sec = [0u8; 8];
    sec.copy_from_slice(&bytes[..8]);
    let mut nsec = [0u8; 4];
    nsec.copy_from_slice(&bytes[8..12]);
    let sec = i64::from_le_bytes(sec).max(0) as u64;
    let nsec = i32::from_le_bytes(nsec).clamp(0, 999_999_999) as u32;
    Ok(Duration::new(sec, nsec))
}
