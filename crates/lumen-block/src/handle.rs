//! Bright handles: shareable references to brightened content.
//!
//! A handle stands in for a brightened constituent block list without
//! re-exposing any raw bytes: just hashes and enough metadata to fetch
//! and reverse the transform. Created once the owning list has been
//! brightened; immutable thereafter.

use serde::{Deserialize, Serialize};

use crate::block::BlockType;
use crate::hash::{BlockHash, DataHash};
use crate::BlockSize;

/// Compact, storage-independent reference to brightened content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrightHandle {
    /// Block size of the referenced blocks.
    pub block_size: BlockSize,
    /// Ordered hashes of the stripe members needed to reverse the XOR.
    pub block_hashes: Vec<BlockHash>,
    /// What kind of block the brightened content originally was.
    pub original_type: BlockType,
    /// Id of the brightened list block itself.
    pub brightened_cbl_hash: BlockHash,
    /// DataHash of the source the list describes.
    pub source_id: DataHash,
}

impl BrightHandle {
    pub fn new(
        block_size: BlockSize,
        block_hashes: Vec<BlockHash>,
        original_type: BlockType,
        brightened_cbl_hash: BlockHash,
        source_id: DataHash,
    ) -> Self {
        Self {
            block_size,
            block_hashes,
            original_type,
            brightened_cbl_hash,
            source_id,
        }
    }
}
