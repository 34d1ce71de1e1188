//! Block size table.
//!
//! Every block in the store has one of a small set of fixed byte lengths.
//! The size also determines how many 32-byte hash references fit into one
//! payload, which bounds the capacity of a constituent block list and,
//! transitively, the largest file one super list can represent.

use serde::{Deserialize, Serialize};

use crate::BlockError;

/// Length in bytes of a SHA-256 digest, the unit all capacities are
/// measured in.
pub const DIGEST_LEN: usize = 32;

/// Enumerated fixed block sizes.
///
/// `Unknown` is the uninitialized state and has no byte length; every
/// operation that needs a length treats it as an error.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u32)]
pub enum BlockSize {
    #[default]
    Unknown = 0,
    /// 64 bytes. Two hash references per payload; mostly useful in tests.
    Micro = 1,
    /// 512 bytes, one short message.
    Message = 2,
    /// 1 KiB.
    Tiny = 3,
    /// 4 KiB, one filesystem page.
    Small = 4,
    /// 1 MiB.
    Medium = 5,
    /// 4 MiB.
    Large = 6,
}

impl BlockSize {
    /// All sizes that carry a byte length, smallest first.
    pub const KNOWN: [BlockSize; 6] = [
        BlockSize::Micro,
        BlockSize::Message,
        BlockSize::Tiny,
        BlockSize::Small,
        BlockSize::Medium,
        BlockSize::Large,
    ];

    /// Payload length in bytes, or `None` for `Unknown`.
    pub const fn length(self) -> Option<usize> {
        match self {
            BlockSize::Unknown => None,
            BlockSize::Micro => Some(64),
            BlockSize::Message => Some(512),
            BlockSize::Tiny => Some(1024),
            BlockSize::Small => Some(4096),
            BlockSize::Medium => Some(1 << 20),
            BlockSize::Large => Some(1 << 22),
        }
    }

    /// Payload length in bytes, erroring on `Unknown`.
    pub fn length_or_err(self) -> Result<usize, BlockError> {
        self.length().ok_or(BlockError::UnknownSize)
    }

    /// How many hash references fit in one payload of this size.
    pub fn hashes_per_block(self) -> Option<u64> {
        self.length().map(|len| (len / DIGEST_LEN) as u64)
    }

    /// Map an exact byte length back to its size, if it is one of ours.
    pub fn from_length(len: usize) -> Option<Self> {
        Self::KNOWN.iter().copied().find(|s| s.length() == Some(len))
    }

    /// Smallest size whose payload can hold `len` bytes.
    ///
    /// Used to materialize constituent block lists, whose serialized
    /// header does not line up with any fixed size on its own.
    pub fn smallest_for(len: usize) -> Option<Self> {
        Self::KNOWN
            .iter()
            .copied()
            .find(|s| s.length().is_some_and(|l| l >= len))
    }
}

impl TryFrom<u32> for BlockSize {
    type Error = BlockError;

    /// Recover a size from its wire discriminant.
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BlockSize::Micro),
            2 => Ok(BlockSize::Message),
            3 => Ok(BlockSize::Tiny),
            4 => Ok(BlockSize::Small),
            5 => Ok(BlockSize::Medium),
            6 => Ok(BlockSize::Large),
            _ => Err(BlockError::UnknownSize),
        }
    }
}

/// Ceiling on the representable length of one super list of lists:
/// `hashes_per_block^2 * block_size` bytes.
///
/// One constituent block list can reference `hashes_per_block` tuples,
/// one super list can reference `hashes_per_block` lists, and each tuple
/// reconstructs one block of payload.
pub fn max_storage_length(size: BlockSize) -> Option<u64> {
    let hpb = size.hashes_per_block()?;
    let len = size.length()? as u64;
    Some(hpb * hpb * len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        assert_eq!(BlockSize::Micro.length(), Some(64));
        assert_eq!(BlockSize::Message.length(), Some(512));
        assert_eq!(BlockSize::Large.length(), Some(1 << 22));
        assert_eq!(BlockSize::Unknown.length(), None);
    }

    #[test]
    fn test_hashes_per_block() {
        assert_eq!(BlockSize::Micro.hashes_per_block(), Some(2));
        assert_eq!(BlockSize::Tiny.hashes_per_block(), Some(32));
        assert_eq!(BlockSize::Unknown.hashes_per_block(), None);
    }

    #[test]
    fn test_from_length_roundtrip() {
        for size in BlockSize::KNOWN {
            assert_eq!(BlockSize::from_length(size.length().unwrap()), Some(size));
        }
        assert_eq!(BlockSize::from_length(65), None);
    }

    #[test]
    fn test_smallest_for() {
        assert_eq!(BlockSize::smallest_for(1), Some(BlockSize::Micro));
        assert_eq!(BlockSize::smallest_for(64), Some(BlockSize::Micro));
        assert_eq!(BlockSize::smallest_for(65), Some(BlockSize::Message));
        assert_eq!(BlockSize::smallest_for(1 << 22), Some(BlockSize::Large));
        assert_eq!(BlockSize::smallest_for((1 << 22) + 1), None);
    }

    #[test]
    fn test_try_from_discriminant() {
        assert_eq!(BlockSize::try_from(4).unwrap(), BlockSize::Small);
        assert!(BlockSize::try_from(0).is_err());
        assert!(BlockSize::try_from(7).is_err());
    }

    #[test]
    fn test_max_storage_length() {
        // Micro: 2 hashes per block, 2 * 2 * 64 = 256 bytes.
        assert_eq!(max_storage_length(BlockSize::Micro), Some(256));
        assert_eq!(max_storage_length(BlockSize::Unknown), None);
    }
}
