//! Fixed-width SHA-256 digest types with provenance metadata.
//!
//! Three distinct digest roles, kept as separate types so they cannot be
//! confused at a call site:
//! - `BlockHash`: identity of one block's payload bytes, the cache key.
//! - `DataHash`: digest of a whole logical source plus its declared
//!   length; may be computed from bytes we saw, or merely claimed.
//! - `SegmentHash`: digest of one constituent list's byte range.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::size::DIGEST_LEN;

/// Digest of one block's payload bytes; identity and cache key.
///
/// Immutable once constructed. Equality and ordering are by digest bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHash([u8; DIGEST_LEN]);

impl BlockHash {
    /// Hash the given payload bytes.
    pub fn compute(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(digest.into())
    }

    pub fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let digest: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Self(digest))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}..)", &self.to_hex()[..8])
    }
}

/// Whether a digest was verified against actual bytes or merely claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashProvenance {
    /// Computed by us over bytes we read.
    Computed,
    /// Supplied by a caller or peer; not yet verified.
    Provided,
}

/// Digest of an entire logical source, carrying its declared length.
///
/// Two `DataHash` values are equal only when both the digest bytes and
/// the length match; provenance does not participate in equality.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct DataHash {
    digest: [u8; DIGEST_LEN],
    length: u64,
    provenance: HashProvenance,
}

impl DataHash {
    /// Compute over a full in-memory buffer.
    pub fn compute(bytes: &[u8]) -> Self {
        Self {
            digest: Sha256::digest(bytes).into(),
            length: bytes.len() as u64,
            provenance: HashProvenance::Computed,
        }
    }

    /// Wrap a claimed digest and length without verifying it.
    pub fn provided(digest: [u8; DIGEST_LEN], length: u64) -> Self {
        Self {
            digest,
            length,
            provenance: HashProvenance::Provided,
        }
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn provenance(&self) -> HashProvenance {
        self.provenance
    }

    pub fn is_computed(&self) -> bool {
        self.provenance == HashProvenance::Computed
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Key bytes for indexing handles by source id: digest then length,
    /// big endian, 40 bytes total.
    pub fn index_key(&self) -> [u8; DIGEST_LEN + 8] {
        let mut key = [0u8; DIGEST_LEN + 8];
        key[..DIGEST_LEN].copy_from_slice(&self.digest);
        key[DIGEST_LEN..].copy_from_slice(&self.length.to_be_bytes());
        key
    }
}

impl PartialEq for DataHash {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest && self.length == other.length
    }
}

impl Eq for DataHash {}

impl fmt::Debug for DataHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DataHash({}.., len={}, {:?})",
            &self.to_hex()[..8],
            self.length,
            self.provenance
        )
    }
}

/// Incremental builder for a `DataHash` over a byte stream.
#[derive(Default)]
pub struct DataHasher {
    inner: Sha256,
    length: u64,
}

impl DataHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
        self.length += bytes.len() as u64;
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn finalize(self) -> DataHash {
        DataHash {
            digest: self.inner.finalize().into(),
            length: self.length,
            provenance: HashProvenance::Computed,
        }
    }
}

/// Digest over one constituent block list's byte range.
///
/// Verifies a single segment of a larger file independently of the
/// whole-file `DataHash`.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHash([u8; DIGEST_LEN]);

impl SegmentHash {
    pub fn compute(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    pub fn from_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SegmentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentHash({}..)", &self.to_hex()[..8])
    }
}

/// Incremental builder for a `SegmentHash`.
#[derive(Default)]
pub struct SegmentHasher {
    inner: Sha256,
}

impl SegmentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> SegmentHash {
        SegmentHash(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_hash_hex_roundtrip() {
        let hash = BlockHash::compute(b"lumen");
        let parsed = BlockHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_block_hash_is_deterministic() {
        assert_eq!(BlockHash::compute(b"abc"), BlockHash::compute(b"abc"));
        assert_ne!(BlockHash::compute(b"abc"), BlockHash::compute(b"abd"));
    }

    #[test]
    fn test_data_hash_equality_requires_length() {
        let computed = DataHash::compute(b"some source bytes");
        let same = DataHash::provided(*computed.digest(), computed.length());
        let wrong_len = DataHash::provided(*computed.digest(), computed.length() + 1);

        // Provenance is ignored, length is not.
        assert_eq!(computed, same);
        assert_ne!(computed, wrong_len);
    }

    #[test]
    fn test_data_hasher_matches_one_shot() {
        let mut hasher = DataHasher::new();
        hasher.update(b"some ");
        hasher.update(b"source ");
        hasher.update(b"bytes");
        let streamed = hasher.finalize();

        assert_eq!(streamed, DataHash::compute(b"some source bytes"));
        assert!(streamed.is_computed());
    }

    #[test]
    fn test_segment_hasher_matches_one_shot() {
        let mut hasher = SegmentHasher::new();
        hasher.update(b"seg");
        hasher.update(b"ment");
        assert_eq!(hasher.finalize(), SegmentHash::compute(b"segment"));
    }
}
