/// DJB2 hash (`h = h * 33 + b`, seeded with 5381) with 32-bit wraparound.
pub fn djb2(data: &[u8]) -> u32 {
    data.iter().fold(5381u32, |hash, &byte| {
        hash.wrapping_mul(33).wrapping_add(u32::from(byte))
    })
}
