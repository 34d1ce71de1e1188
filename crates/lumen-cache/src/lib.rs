//! # lumen-cache
//!
//! Block cache managers: the storage and retrieval substrate under the
//! chain assembly pipeline.
//!
//! One trait, three backends:
//! - [`MemoryBlockStore`]: concurrent map, no persistence; randomizer
//!   pools and tests.
//! - [`DiskBlockStore`]: one file per block under a hash-sharded
//!   directory tree, `metadata || 0x00 || payload` framing.
//! - [`KvBlockStore`]: LMDB-backed, plus a bright-handle index keyed by
//!   source id.
//!
//! All backends share the insert-only contract: blocks are
//! content-addressed, so a duplicate `set` is either a caller bug or a
//! hash collision, and both are rejected rather than silently ignored.

pub mod disk;
pub mod events;
pub mod kv;
pub mod memory;
pub mod transactable;

pub use disk::DiskBlockStore;
pub use events::{CacheEvent, EventBus};
pub use kv::KvBlockStore;
pub use memory::MemoryBlockStore;
pub use transactable::TransactableBlock;

use std::fmt;
use std::io;

use crossbeam_channel::Receiver;
use thiserror::Error;
use uuid::Uuid;

use lumen_block::{Block, BlockError, BlockHash, BlockSize};

/// Errors from cache manager operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("block not found: {0}")]
    NotFound(BlockHash),

    /// Insert-only violation: the key is already present. Identical hash
    /// implies identical bytes, so this is either a duplicate insert the
    /// caller should have avoided or a hash collision.
    #[error("block already exists: {0}")]
    AlreadyExists(BlockHash),

    /// A previously validated stored block no longer passes validation.
    #[error("stored block is corrupt: {0}")]
    CorruptStore(BlockHash),

    /// Stored payload no longer hashes to its key.
    #[error("integrity failure: payload for {hash} hashes to {actual}")]
    Integrity { hash: BlockHash, actual: BlockHash },

    #[error("block {0} was already committed")]
    AlreadyCommitted(BlockHash),

    #[error("block {0} does not permit commit")]
    CommitNotAllowed(BlockHash),

    #[error("no bright handle indexed for source {0}")]
    HandleNotFound(String),

    #[error("disk entry for {0} has no metadata terminator")]
    MissingTerminator(BlockHash),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("LMDB error: {0}")]
    Lmdb(#[from] heed::Error),

    #[error("metadata framing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Identity of a peer node on the trust list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The pluggable block storage substrate.
///
/// Implementations must be safe for concurrent `get`/`set`/`drop_block`
/// from independent chains. A race on `set` of the same hash resolves to
/// one success and `AlreadyExists` for the rest; stored content is never
/// corrupted by the race.
pub trait BlockCacheManager: Send + Sync {
    /// Whether a block with this id is present.
    fn contains(&self, hash: &BlockHash) -> bool;

    /// Fetch an owned copy of a block. A miss is `NotFound`, never
    /// synthesized empty data; implementations publish `CacheMiss`.
    fn get(&self, hash: &BlockHash) -> Result<Block>;

    /// Insert-only store. Overwriting an existing key is a fatal
    /// `AlreadyExists`.
    fn set(&self, block: Block) -> Result<()>;

    /// Remove a block, returning whether anything was removed.
    /// `skip_contains_check` skips the existence probe when the caller
    /// already knows the block is present.
    fn drop_block(&self, hash: &BlockHash, skip_contains_check: bool) -> Result<bool>;

    /// Subscribe to this manager's key lifecycle events.
    fn subscribe(&self) -> Receiver<CacheEvent>;

    /// Allow-list a peer whose submitted blocks bypass validation.
    /// Extension point only; nothing enforces it yet.
    fn trust(&self, node: NodeId);

    /// Current trust list.
    fn trusted(&self) -> Vec<NodeId>;

    /// This store instance's GUID.
    fn instance_id(&self) -> Uuid;

    /// Ceiling on representable source length for one super list of
    /// lists at the given block size.
    fn max_storage_length(size: BlockSize) -> Option<u64>
    where
        Self: Sized,
    {
        lumen_block::max_storage_length(size)
    }
}
