//! # lumen-chain
//!
//! Chain assembly: the pipeline from a file to a brightened block chain
//! and back.
//!
//! Ingestion: file bytes are chunked into fixed-size source blocks, each
//! brightened against four randomizers and persisted as it is produced,
//! while constituent hashes accumulate into constituent block lists
//! (CBLs); chains spanning more than one list are promoted to a super
//! list. Restoration reverses the pipeline with a hash check at every
//! stage.
//!
//! Both directions are forward-only lazy iterators: each `next()` does
//! one unit of I/O and one unit of cryptographic transform, and
//! ingestion persists a block before yielding it.

pub mod ingest;
pub mod ops;
pub mod restore;

pub use ingest::{hash_file, BrightenedChunk, BrightenedStream, ChainAssembler};
pub use ops::OwnershipToken;
pub use restore::{RestoredStream, SourceFileInfo};

use std::io;

use thiserror::Error;

use lumen_block::{Block, BlockError, BlockHash, BlockSize, BrightHandle, DataHash, StorageContract};
use lumen_brighten::BrightenError;
use lumen_cache::CacheError;

/// Parameters for one ingestion: the data block size and the storage
/// contract every produced block is stored under.
#[derive(Debug, Clone)]
pub struct BlockParams {
    pub block_size: BlockSize,
    pub contract: StorageContract,
}

impl BlockParams {
    pub fn new(block_size: BlockSize) -> Self {
        Self {
            block_size,
            contract: StorageContract::default(),
        }
    }
}

/// The product of one ingestion: the linked list chain, the optional
/// super list, and the shareable handle to the brightened top manifest.
pub struct Chain {
    /// Whole-file id the chain restores to.
    pub source_id: DataHash,
    /// Constituent block lists in chain order, links patched.
    pub cbls: Vec<Block>,
    /// Present when the chain spans more than one list.
    pub super_cbl: Option<Block>,
    /// Reference to the brightened top manifest.
    pub handle: BrightHandle,
}

impl Chain {
    /// The manifest restoration starts from: the super list when there
    /// is one, otherwise the single list.
    pub fn top(&self) -> &Block {
        self.super_cbl.as_ref().unwrap_or(&self.cbls[0])
    }
}

/// Errors from chain assembly and restoration.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Rejected before any mutation.
    #[error("source of {length} bytes exceeds the {limit}-byte ceiling for {size:?} blocks")]
    ExceedsCapacity {
        length: u64,
        limit: u64,
        size: BlockSize,
    },

    #[error("short read: got {got} of {wanted} bytes before end of file")]
    UnexpectedEof { wanted: usize, got: usize },

    /// The source file changed size mid-read.
    #[error("consumed {consumed} brightened blocks, expected {expected}")]
    BlockCountMismatch { expected: u64, consumed: u64 },

    /// Recomputed digest disagrees with the recorded source id. Always
    /// fatal, never retried: it signals corruption or a logic defect.
    #[error("restored digest {actual} does not match recorded source id {expected}")]
    SourceDigestMismatch { expected: String, actual: String },

    #[error("restoration produced no bytes")]
    EmptyRestore,

    #[error("block {0} is not a constituent block list")]
    NotAManifest(BlockHash),

    /// Deliberate stub, distinct from "tried and failed".
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("ownership token does not permit dropping {0}")]
    PermissionDenied(BlockHash),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Brighten(#[from] BrightenError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;
