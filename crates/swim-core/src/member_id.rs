//! MemberId: Unique identifier for a node in the cluster.
//!
//! Wraps a u64 internally but displays as a 16-character hex string
//! for human readability. Broker-style decimal ids ("0", "1", ...) are
//! accepted when parsing so operators can keep their existing node numbering.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemberIdError {
    #[error("Invalid member ID format: expected 16 hex chars or a decimal node number")]
    InvalidFormat,
    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
}

/// A unique identifier for a member of the cluster.
///
/// # Examples
/// ```
/// use swim_core::MemberId;
///
/// let parsed: MemberId = "a1b2c3d4e5f67890".parse().unwrap();
/// assert_eq!(parsed.as_u64(), 0xa1b2c3d4e5f67890);
///
/// let broker: MemberId = "2".parse().unwrap();
/// assert_eq!(broker.to_string(), "0000000000000002");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(u64);

impl MemberId {
    /// Generate a new random member ID. Never returns zero.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for MemberId {
    type Err = MemberIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 16 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            let id = u64::from_str_radix(&s.to_ascii_lowercase(), 16)?;
            return Ok(Self(id));
        }

        // Decimal node numbers never reach 16 digits in practice, so the two
        // forms cannot collide.
        if !s.is_empty() && s.len() < 16 && s.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self(s.parse()?));
        }

        Err(MemberIdError::InvalidFormat)
    }
}

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<MemberId> for u64 {
    fn from(id: MemberId) -> u64 {
        id.0
    }
}

// Serialize as hex string for consistency in logs, errors, JSON
impl serde::Serialize for MemberId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for MemberId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hex() {
        let id = MemberId(0xa1b2c3d4e5f67890);
        assert_eq!(id.to_string(), "a1b2c3d4e5f67890");
    }

    #[test]
    fn test_display_zero_padded() {
        let id = MemberId(0xff);
        assert_eq!(id.to_string(), "00000000000000ff");
    }

    #[test]
    fn test_parse_hex() {
        let id: MemberId = "a1b2c3d4e5f67890".parse().unwrap();
        assert_eq!(id.as_u64(), 0xa1b2c3d4e5f67890);
    }

    #[test]
    fn test_parse_uppercase_hex() {
        let id: MemberId = "A1B2C3D4E5F67890".parse().unwrap();
        assert_eq!(id.as_u64(), 0xa1b2c3d4e5f67890);
    }

    #[test]
    fn test_parse_decimal_node_number() {
        let id: MemberId = "0".parse().unwrap();
        assert_eq!(id.as_u64(), 0);

        let id: MemberId = "42".parse().unwrap();
        assert_eq!(id.as_u64(), 42);
    }

    #[test]
    fn test_display_roundtrip() {
        let original = MemberId::generate();
        let parsed: MemberId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_invalid_format() {
        assert!("too_short".parse::<MemberId>().is_err());
        assert!("ghijklmnopqrstuv".parse::<MemberId>().is_err());
        assert!("".parse::<MemberId>().is_err());
        assert!("-1".parse::<MemberId>().is_err());
    }

    #[test]
    fn test_reject_wrong_length_hex() {
        assert!("a1b2c3d4e5f678901".parse::<MemberId>().is_err());
        assert!("a1b2c3d4e5f6789".parse::<MemberId>().is_err());
    }

    #[test]
    fn test_generate_not_zero() {
        for _ in 0..1000 {
            assert_ne!(MemberId::generate().as_u64(), 0);
        }
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = MemberId(0x10);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0000000000000010\"");
        let parsed: MemberId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }
}
