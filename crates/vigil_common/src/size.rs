//! Byte sizes with unit parsing and display.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// A size in bytes.
///
/// Parses from strings like "50MB", "64KB", "1GB", "512B" and bare integers
/// (interpreted as bytes). Units are binary multiples: `1KB == 1024` bytes.
/// Deserializes from either a TOML/JSON integer or a suffixed string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Creates a size from a raw byte count.
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Creates a size from a count of kibibytes.
    pub const fn kib(n: u64) -> Self {
        Self(n * KIB)
    }

    /// Creates a size from a count of mebibytes.
    pub const fn mib(n: u64) -> Self {
        Self(n * MIB)
    }

    /// Returns the size in bytes.
    pub fn bytes(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteSize({self})")
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        if b >= GIB && b % GIB == 0 {
            write!(f, "{}GB", b / GIB)
        } else if b >= MIB && b % MIB == 0 {
            write!(f, "{}MB", b / MIB)
        } else if b >= KIB && b % KIB == 0 {
            write!(f, "{}KB", b / KIB)
        } else {
            write!(f, "{b}B")
        }
    }
}

/// Error type for parsing size strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid byte size: '{input}'")]
pub struct ParseByteSizeError {
    /// The input string that failed to parse.
    pub input: String,
}

impl FromStr for ByteSize {
    type Err = ParseByteSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || ParseByteSizeError {
            input: s.to_string(),
        };

        let lower = s.to_ascii_lowercase();
        for (suffix, mult) in [("gb", GIB), ("mb", MIB), ("kb", KIB), ("b", 1)] {
            if let Some(num) = lower.strip_suffix(suffix) {
                let val: u64 = num.trim().parse().map_err(|_| err())?;
                return val.checked_mul(mult).map(ByteSize).ok_or_else(err);
            }
        }

        // Bare number: interpreted as bytes
        let val: u64 = s.parse().map_err(|_| err())?;
        Ok(ByteSize(val))
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ByteSizeVisitor;

        impl<'de> de::Visitor<'de> for ByteSizeVisitor {
            type Value = ByteSize;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a byte count or a size string like \"50MB\"")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ByteSize(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(ByteSize)
                    .map_err(|_| E::custom(format!("negative byte size: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ByteSizeVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_units() {
        assert_eq!("1GB".parse::<ByteSize>().unwrap().bytes(), GIB);
        assert_eq!("50MB".parse::<ByteSize>().unwrap().bytes(), 50 * MIB);
        assert_eq!("64kb".parse::<ByteSize>().unwrap().bytes(), 64 * KIB);
        assert_eq!("512B".parse::<ByteSize>().unwrap().bytes(), 512);
    }

    #[test]
    fn parse_bare_number() {
        assert_eq!("100".parse::<ByteSize>().unwrap().bytes(), 100);
    }

    #[test]
    fn parse_with_whitespace() {
        assert_eq!(" 2 MB ".parse::<ByteSize>().unwrap(), ByteSize::mib(2));
    }

    #[test]
    fn parse_invalid() {
        assert!("lots".parse::<ByteSize>().is_err());
        assert!("1.5MB".parse::<ByteSize>().is_err());
        assert!("".parse::<ByteSize>().is_err());
    }

    #[test]
    fn parse_overflow_rejected() {
        assert!("99999999999999999GB".parse::<ByteSize>().is_err());
    }

    #[test]
    fn display_picks_exact_unit() {
        assert_eq!(ByteSize::mib(50).to_string(), "50MB");
        assert_eq!(ByteSize::kib(64).to_string(), "64KB");
        assert_eq!(ByteSize::new(1500).to_string(), "1500B");
    }

    #[test]
    fn deserialize_number_or_string() {
        let a: ByteSize = serde_json::from_str("4096").unwrap();
        let b: ByteSize = serde_json::from_str("\"4KB\"").unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_str::<ByteSize>("-1").is_err());
    }
}
