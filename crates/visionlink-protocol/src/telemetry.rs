use serde::{Deserialize, Serialize};

/// Memory pool usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub remaining: i64,
    pub used: i64,
    pub total: i64,
}

/// Die temperatures in degrees Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ChipTemperature {
    pub css: f32,
    pub mss: f32,
    pub upa: f32,
    pub dss: f32,
    pub average: f32,
}

/// Processor load over the last sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Fraction in `0.0..=1.0`.
    pub average: f32,
    /// Length of the sampling window in milliseconds.
    pub ms_time: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsbSpeed {
    Unknown,
    Low,
    Full,
    High,
    Super,
    SuperPlus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraBoardSocket {
    Rgb,
    Left,
    Right,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&UsbSpeed::SuperPlus).unwrap(),
            "\"SUPER_PLUS\""
        );
        let cams: Vec<CameraBoardSocket> = serde_json::from_str(r#"["RGB","LEFT"]"#).unwrap();
        assert_eq!(cams, [CameraBoardSocket::Rgb, CameraBoardSocket::Left]);
    }
}
