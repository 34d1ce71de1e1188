//! # lumen-block
//!
//! Block data model for the Lumen owner-free block store.
//!
//! User data is split into fixed-size blocks, each de-identified by XOR
//! with random blocks, and recoverable only via a manifest of which
//! blocks to recombine. This crate holds the pieces everything else is
//! built on:
//!
//! - [`BlockSize`] and the capacity arithmetic derived from it
//! - the SHA-256 digest types [`BlockHash`], [`DataHash`], [`SegmentHash`]
//! - the [`Block`] struct with its closed [`BlockKind`] role enum
//! - [`TupleStripe`], the unit of the XOR transform
//! - [`CblHeader`], the manifest listing a segment's constituents
//! - [`BrightHandle`], a shareable reference without raw bytes

pub mod block;
pub mod cbl;
pub mod handle;
pub mod hash;
pub mod size;
pub mod stripe;

pub use block::{
    random_bytes, Block, BlockKind, BlockMetadata, BlockType, StorageContract,
    DEFAULT_RETENTION_DAYS,
};
pub use cbl::{build_cbl_block, build_super_cbl_block, CblHeader};
pub use handle::BrightHandle;
pub use hash::{BlockHash, DataHash, DataHasher, HashProvenance, SegmentHash, SegmentHasher};
pub use size::{max_storage_length, BlockSize, DIGEST_LEN};
pub use stripe::{xor_into, TupleStripe, TUPLE_COUNT};

use thiserror::Error;

/// One structural violation found by [`Block::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("payload is {actual} bytes, block size requires {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("declared id {declared} does not match recomputed digest {computed}")]
    IdMismatch {
        declared: BlockHash,
        computed: BlockHash,
    },

    #[error("storage contract keep_until precedes requested_at")]
    ContractTimeOrder,

    #[error("block size is unknown")]
    UnknownSize,

    #[error("brightened block records {actual} randomizers, expected {expected}")]
    WrongRandomizerCount { expected: usize, actual: usize },

    #[error("constituent list of {count} hashes is not a whole number of tuples")]
    RaggedConstituents { count: usize },
}

/// Errors from the block data model.
#[derive(Error, Debug)]
pub enum BlockError {
    /// Aggregate of every structural violation, not just the first.
    #[error("block failed validation with {} violation(s)", .0.len())]
    Validation(Vec<ValidationFailure>),

    #[error("unknown block size has no byte length")]
    UnknownSize,

    #[error("{needed} bytes exceeds the {limit}-byte ceiling")]
    ExceedsCapacity { needed: u64, limit: u64 },

    #[error("stripe has {actual} blocks, tuples are exactly {expected}")]
    WrongStripeCount { expected: usize, actual: usize },

    #[error("stripe members have mixed block sizes")]
    MixedStripeSizes,

    #[error("cannot patch chain link on a {0:?} block")]
    NotAManifest(BlockType),

    #[error("serialization error: {0}")]
    Serialize(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, BlockError>;
