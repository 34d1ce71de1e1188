//! Constituent block lists: the manifest blocks of a chain.
//!
//! A constituent block list (CBL) records everything needed to rebuild
//! one segment of a file: the whole-file id, the segment digest, the
//! ordered constituent hashes (tuple-major, brightened hash followed by
//! its randomizer hashes), and links to its neighbors in the chain.
//!
//! A CBL's block identity covers its payload, which serializes every
//! header field except the forward link. Chains are append-only: when
//! the next list is flushed, the previous list's `next` is patched in
//! metadata without disturbing its id.

use serde::{Deserialize, Serialize};

use crate::block::{random_bytes, Block, BlockKind, StorageContract};
use crate::hash::{BlockHash, DataHash, SegmentHash};
use crate::stripe::TUPLE_COUNT;
use crate::{BlockError, BlockSize};

/// Header fields of a constituent block list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CblHeader {
    /// DataHash of the whole source file.
    pub source_id: DataHash,
    /// Digest of this list's byte range of the source.
    pub segment_id: SegmentHash,
    /// Total length of the whole source file in bytes.
    pub total_length: u64,
    /// Ordered constituent hashes. For a plain list these are tuple-major
    /// (brightened hash, then its randomizer hashes); for a super list
    /// they are the ids of the member lists.
    pub constituents: Vec<BlockHash>,
    /// Back link to the previous list in the chain.
    pub previous: Option<BlockHash>,
    /// Forward link, patched after the next list is flushed. Not part of
    /// the hashed payload.
    pub next: Option<BlockHash>,
}

/// The hashed portion of a header: everything except `next`.
#[derive(Serialize, Deserialize)]
struct CblPayload {
    source_id: DataHash,
    segment_id: SegmentHash,
    total_length: u64,
    constituents: Vec<BlockHash>,
    previous: Option<BlockHash>,
}

impl CblHeader {
    pub fn new(
        source_id: DataHash,
        segment_id: SegmentHash,
        total_length: u64,
        constituents: Vec<BlockHash>,
        previous: Option<BlockHash>,
    ) -> Self {
        Self {
            source_id,
            segment_id,
            total_length,
            constituents,
            previous,
            next: None,
        }
    }

    /// How many tuple references one list of data blocks of `size` may
    /// hold: one reference per hash slot of the payload.
    pub fn capacity_tuples(size: BlockSize) -> Option<u64> {
        size.hashes_per_block()
    }

    /// Constituents grouped back into stripes of `TUPLE_COUNT` hashes.
    pub fn tuples(&self) -> impl Iterator<Item = &[BlockHash]> {
        self.constituents.chunks(TUPLE_COUNT)
    }

    /// Serialize the hashed portion and pad it with random filler up to
    /// the smallest block size that fits.
    pub fn to_payload(&self) -> Result<(BlockSize, Vec<u8>), BlockError> {
        let payload = CblPayload {
            source_id: self.source_id,
            segment_id: self.segment_id,
            total_length: self.total_length,
            constituents: self.constituents.clone(),
            previous: self.previous,
        };
        let mut bytes = bincode::serialize(&payload)?;
        let size = BlockSize::smallest_for(bytes.len()).ok_or(BlockError::ExceedsCapacity {
            needed: bytes.len() as u64,
            limit: BlockSize::Large.length().unwrap_or(0) as u64,
        })?;
        let full = size.length_or_err()?;
        bytes.extend(random_bytes(full - bytes.len()));
        Ok((size, bytes))
    }

    /// Recover the hashed portion from a padded payload. The forward
    /// link is not part of the payload and comes back `None`; the cache
    /// metadata carries the patched value.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, BlockError> {
        let mut reader = bytes;
        let payload: CblPayload = bincode::deserialize_from(&mut reader)?;
        Ok(Self {
            source_id: payload.source_id,
            segment_id: payload.segment_id,
            total_length: payload.total_length,
            constituents: payload.constituents,
            previous: payload.previous,
            next: None,
        })
    }
}

/// Materialize a constituent block list as a block.
pub fn build_cbl_block(header: CblHeader, contract: StorageContract) -> Result<Block, BlockError> {
    let (size, payload) = header.to_payload()?;
    Block::new(
        BlockKind::ConstituentBlockList(header),
        size,
        payload,
        contract,
    )
}

/// Materialize a super list, whose constituents are list ids.
pub fn build_super_cbl_block(
    header: CblHeader,
    contract: StorageContract,
) -> Result<Block, BlockError> {
    let (size, payload) = header.to_payload()?;
    Block::new(
        BlockKind::SuperConstituentBlockList(header),
        size,
        payload,
        contract,
    )
}
