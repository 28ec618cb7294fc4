use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Device log severity, least to most severe. `Off` silences everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    #[serde(rename = "err")]
    Error,
    Critical,
    Off,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "err",
            Self::Critical => "critical",
            Self::Off => "off",
        }
    }

    /// Whether a record at `self` passes a filter set to `threshold`.
    pub fn passes(self, threshold: LogLevel) -> bool {
        threshold != LogLevel::Off && self != LogLevel::Off && self >= threshold
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "err" | "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i64,
}

/// One log record produced on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub node_id_name: String,
    pub level: LogLevel,
    pub time: Timestamp,
    /// Byte range of `payload` the device wanted highlighted.
    #[serde(default)]
    pub color_range_start: usize,
    #[serde(default)]
    pub color_range_end: usize,
    pub payload: String,
}

/// Decode one `__log` packet into its records, in device order.
pub fn parse_batch(bytes: &[u8]) -> Result<Vec<LogMessage>> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_batch(records: &[LogMessage]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(records)?)
}
