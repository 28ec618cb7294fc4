use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

/// Firmware version `major.minor.patch`.
///
/// Ordering compares major, then minor, then patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidVersion(s.to_string());
        let mut parts = s.split('.');
        let mut next = || -> Result<u32, ProtocolError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };
        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let v: Version = "1.2.3".parse().unwrap();
        assert_eq!(v, Version::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn malformed_strings_rejected() {
        for bad in ["1.2", "1.2.3.4", "", "1..3", "a.b.c", "1.2.-3", " 1.2.3", "1.2.3 "] {
            assert!(bad.parse::<Version>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn ordering_is_lexicographic() {
        let older = Version::new(0, 9, 9);
        let newer = Version::new(1, 0, 0);
        assert!(older < newer);
        assert!(newer > older);
        // A larger minor does not outweigh a smaller major.
        assert!(Version::new(1, 5, 0) < Version::new(2, 0, 0));
        assert!(Version::new(2, 0, 1) > Version::new(2, 0, 0));
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Version::new(0, 0, 15)).unwrap();
        assert_eq!(json, "\"0.0.15\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Version::new(0, 0, 15));
    }
}
