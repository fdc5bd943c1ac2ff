//! Content checksums for transferred files.
//!
//! Wraps Blake3 with a strong type and an incremental builder so a file can
//! be hashed chunk by chunk as it is spooled.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte Blake3 checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(pub [u8; 32]);

impl Checksum {
    /// Checksum of a complete buffer.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental checksum over a sequence of chunks.
#[derive(Default)]
pub struct ChecksumBuilder {
    hasher: blake3::Hasher,
}

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finalize(&self) -> Checksum {
        Checksum(*self.hasher.finalize().as_bytes())
    }
}

impl fmt::Debug for ChecksumBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChecksumBuilder")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_matches_whole() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let mut builder = ChecksumBuilder::new();
        for chunk in data.chunks(4096) {
            builder.update(chunk);
        }

        assert_eq!(builder.finalize(), Checksum::of(&data));
    }

    #[test]
    fn test_hex_roundtrip() {
        let sum = Checksum::of(b"graft");
        assert_eq!(Checksum::from_hex(&sum.to_hex()).unwrap(), sum);
        assert!(Checksum::from_hex("abcd").is_err());
    }
}
