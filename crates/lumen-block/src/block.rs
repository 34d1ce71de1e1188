//! The block: a fixed-size, content-addressed unit of storage.
//!
//! Blocks are tagged by role with a closed enum rather than a class
//! hierarchy, so the brightening and consolidation algorithms can match
//! exhaustively. Shared fields (size, payload, storage contract) live on
//! the `Block` struct; role-specific data rides in the `BlockKind`
//! variant payload.
//!
//! Invariant: the payload is always exactly `BlockSize::length()` bytes.
//! Blocks are never partially filled; short final chunks of a file are
//! padded with random filler so trailing zero runs cannot leak the real
//! data length.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cbl::CblHeader;
use crate::hash::BlockHash;
use crate::stripe::TUPLE_COUNT;
use crate::{BlockError, BlockSize, ValidationFailure};

/// Default retention for new storage contracts.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Cryptographically random bytes, used for randomizer payloads and for
/// padding the final chunk of a file.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Retention and redundancy terms a block was stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageContract {
    /// When storage was requested.
    pub requested_at: DateTime<Utc>,
    /// Minimum retention time; the store must keep the block at least
    /// this long.
    pub keep_until: DateTime<Utc>,
    /// Requested replica count.
    pub redundancy: u8,
    /// The payload is user data encrypted under a private key. Never set
    /// on randomizer blocks.
    pub private_encrypted: bool,
}

impl StorageContract {
    pub fn new(retain_for: Duration) -> Self {
        let now = Utc::now();
        Self {
            requested_at: now,
            keep_until: now + retain_for,
            redundancy: 1,
            private_encrypted: false,
        }
    }

    /// Contract for a randomizer minted alongside this block: same
    /// retention and redundancy, but randomizers never inherit the
    /// privacy tag.
    pub fn for_randomizer(&self) -> Self {
        Self {
            private_encrypted: false,
            ..*self
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.keep_until
    }
}

impl Default for StorageContract {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_RETENTION_DAYS))
    }
}

/// Role tag without variant payload, for metadata and handles that need
/// to round-trip what kind of block a hash referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    Source,
    Randomizer,
    Brightened,
    ConstituentBlockList,
    SuperConstituentBlockList,
    Root,
}

/// Block role, with the role-specific fields each variant needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Raw user bytes before brightening. Transient: consumed exactly
    /// once by the brightening transform, never persisted itself.
    Source,
    /// Cryptographically random filler, persisted and reusable.
    Randomizer,
    /// XOR of one source block with its randomizers. `constituents`
    /// records the randomizer hashes only; the brightened block's own
    /// hash must be retained separately to reverse the transform.
    Brightened { constituents: Vec<BlockHash> },
    /// Manifest block listing the hashes for one segment of a file.
    ConstituentBlockList(CblHeader),
    /// Manifest of manifests: constituents are list identities rather
    /// than data-block identities.
    SuperConstituentBlockList(CblHeader),
    /// Per-store identity block carrying the instance GUID.
    Root { instance_id: Uuid },
}

impl BlockKind {
    pub fn block_type(&self) -> BlockType {
        match self {
            BlockKind::Source => BlockType::Source,
            BlockKind::Randomizer => BlockType::Randomizer,
            BlockKind::Brightened { .. } => BlockType::Brightened,
            BlockKind::ConstituentBlockList(_) => BlockType::ConstituentBlockList,
            BlockKind::SuperConstituentBlockList(_) => BlockType::SuperConstituentBlockList,
            BlockKind::Root { .. } => BlockType::Root,
        }
    }
}

/// Everything about a block except its payload: the half of the persisted
/// framing that travels before the zero-byte sentinel on disk, and the
/// structured value beside the payload in the KV backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub kind: BlockKind,
    pub block_size: BlockSize,
    pub contract: StorageContract,
}

/// A fixed-size, content-addressed block.
///
/// The id is the SHA-256 digest of the payload bytes, computed lazily and
/// cached. The payload buffer is owned by the block; cache managers hand
/// out clones, never aliases into their own storage.
#[derive(Debug, Clone)]
pub struct Block {
    kind: BlockKind,
    block_size: BlockSize,
    bytes: Vec<u8>,
    contract: StorageContract,
    id: OnceCell<BlockHash>,
}

impl Block {
    /// Construct a block, enforcing the exact-length invariant.
    pub fn new(
        kind: BlockKind,
        block_size: BlockSize,
        bytes: Vec<u8>,
        contract: StorageContract,
    ) -> Result<Self, BlockError> {
        let expected = block_size.length_or_err()?;
        if bytes.len() != expected {
            return Err(BlockError::Validation(vec![
                ValidationFailure::LengthMismatch {
                    expected,
                    actual: bytes.len(),
                },
            ]));
        }
        Ok(Self {
            kind,
            block_size,
            bytes,
            contract,
            id: OnceCell::new(),
        })
    }

    /// A source block over raw user bytes. The caller pads short chunks
    /// before constructing; `bytes` must already be full length.
    pub fn source(
        block_size: BlockSize,
        bytes: Vec<u8>,
        contract: StorageContract,
    ) -> Result<Self, BlockError> {
        Self::new(BlockKind::Source, block_size, bytes, contract)
    }

    /// Mint a fresh randomizer block with a random payload.
    pub fn randomizer(block_size: BlockSize, contract: StorageContract) -> Result<Self, BlockError> {
        let len = block_size.length_or_err()?;
        Self::new(
            BlockKind::Randomizer,
            block_size,
            random_bytes(len),
            contract.for_randomizer(),
        )
    }

    /// The per-store identity block: instance GUID followed by random
    /// filler up to block size.
    pub fn root(block_size: BlockSize, instance_id: Uuid) -> Result<Self, BlockError> {
        let len = block_size.length_or_err()?;
        let mut bytes = instance_id.as_bytes().to_vec();
        bytes.extend(random_bytes(len - bytes.len()));
        Self::new(
            BlockKind::Root { instance_id },
            block_size,
            bytes,
            StorageContract::default(),
        )
    }

    /// Reassemble a block from its persisted halves.
    pub fn from_parts(meta: BlockMetadata, payload: Vec<u8>) -> Result<Self, BlockError> {
        Self::new(meta.kind, meta.block_size, payload, meta.contract)
    }

    /// Content id: SHA-256 of the payload, computed once on demand.
    pub fn id(&self) -> BlockHash {
        *self.id.get_or_init(|| BlockHash::compute(&self.bytes))
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn block_type(&self) -> BlockType {
        self.kind.block_type()
    }

    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn contract(&self) -> &StorageContract {
        &self.contract
    }

    pub fn metadata(&self) -> BlockMetadata {
        BlockMetadata {
            kind: self.kind.clone(),
            block_size: self.block_size,
            contract: self.contract,
        }
    }

    /// Constituent list header, for the two manifest roles.
    pub fn cbl_header(&self) -> Option<&CblHeader> {
        match &self.kind {
            BlockKind::ConstituentBlockList(h) | BlockKind::SuperConstituentBlockList(h) => Some(h),
            _ => None,
        }
    }

    /// Patch the forward chain link of a constituent block list.
    ///
    /// The forward link lives outside the hashed payload, so this does
    /// not change the block's id. Errors on any other block role.
    pub fn patch_next(&mut self, next: BlockHash) -> Result<(), BlockError> {
        match &mut self.kind {
            BlockKind::ConstituentBlockList(h) | BlockKind::SuperConstituentBlockList(h) => {
                h.next = Some(next);
                Ok(())
            }
            other => Err(BlockError::NotAManifest(other.block_type())),
        }
    }

    /// Structural self-validation, collecting every violation rather than
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), BlockError> {
        let mut failures = Vec::new();

        match self.block_size.length() {
            None => failures.push(ValidationFailure::UnknownSize),
            Some(expected) if expected != self.bytes.len() => {
                failures.push(ValidationFailure::LengthMismatch {
                    expected,
                    actual: self.bytes.len(),
                });
            }
            Some(_) => {}
        }

        if self.contract.keep_until < self.contract.requested_at {
            failures.push(ValidationFailure::ContractTimeOrder);
        }

        match &self.kind {
            BlockKind::Brightened { constituents } => {
                if constituents.len() != TUPLE_COUNT - 1 {
                    failures.push(ValidationFailure::WrongRandomizerCount {
                        expected: TUPLE_COUNT - 1,
                        actual: constituents.len(),
                    });
                }
            }
            BlockKind::ConstituentBlockList(header) => {
                if header.constituents.len() % TUPLE_COUNT != 0 {
                    failures.push(ValidationFailure::RaggedConstituents {
                        count: header.constituents.len(),
                    });
                }
            }
            _ => {}
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BlockError::Validation(failures))
        }
    }

    /// Verify that a declared id matches the recomputed payload digest.
    pub fn verify_id(&self, declared: &BlockHash) -> Result<(), BlockError> {
        let computed = self.id();
        if computed == *declared {
            Ok(())
        } else {
            Err(BlockError::Validation(vec![ValidationFailure::IdMismatch {
                declared: *declared,
                computed,
            }]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> StorageContract {
        StorageContract::default()
    }

    #[test]
    fn test_exact_length_enforced() {
        let err = Block::source(BlockSize::Micro, vec![0u8; 63], contract());
        assert!(matches!(err, Err(BlockError::Validation(_))));

        let ok = Block::source(BlockSize::Micro, vec![0u8; 64], contract());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_id_is_payload_digest() {
        let block = Block::source(BlockSize::Micro, vec![7u8; 64], contract()).unwrap();
        assert_eq!(block.id(), BlockHash::compute(&vec![7u8; 64]));
        // Cached on second call.
        assert_eq!(block.id(), block.id());
    }

    #[test]
    fn test_randomizer_never_privacy_tagged() {
        let mut c = contract();
        c.private_encrypted = true;
        let r = Block::randomizer(BlockSize::Micro, c).unwrap();
        assert!(!r.contract().private_encrypted);
        assert_eq!(r.block_type(), BlockType::Randomizer);
    }

    #[test]
    fn test_randomizers_differ() {
        let a = Block::randomizer(BlockSize::Micro, contract()).unwrap();
        let b = Block::randomizer(BlockSize::Micro, contract()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_root_block_carries_instance_id() {
        let id = Uuid::new_v4();
        let root = Block::root(BlockSize::Micro, id).unwrap();
        assert_eq!(&root.bytes()[..16], id.as_bytes());
        assert!(matches!(root.kind(), BlockKind::Root { instance_id } if *instance_id == id));
    }

    #[test]
    fn test_validate_collects_all_failures() {
        let mut c = contract();
        c.keep_until = c.requested_at - Duration::seconds(1);
        let block = Block::new(
            BlockKind::Brightened {
                constituents: vec![BlockHash::compute(b"only one")],
            },
            BlockSize::Micro,
            vec![0u8; 64],
            c,
        )
        .unwrap();

        match block.validate() {
            Err(BlockError::Validation(failures)) => {
                assert_eq!(failures.len(), 2);
                assert!(failures.contains(&ValidationFailure::ContractTimeOrder));
            }
            other => panic!("expected aggregate validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_id_flags_wrong_declared_hash() {
        let block = Block::source(BlockSize::Micro, vec![7u8; 64], contract()).unwrap();
        assert!(block.verify_id(&block.id()).is_ok());

        let wrong = BlockHash::compute(b"something else");
        match block.verify_id(&wrong) {
            Err(BlockError::Validation(failures)) => {
                assert!(matches!(failures[0], ValidationFailure::IdMismatch { .. }));
            }
            other => panic!("expected id mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let block = Block::source(BlockSize::Micro, random_bytes(64), contract()).unwrap();
        let rebuilt = Block::from_parts(block.metadata(), block.bytes().to_vec()).unwrap();
        assert_eq!(rebuilt.id(), block.id());
        assert_eq!(rebuilt.kind(), block.kind());
    }

    #[test]
    fn test_patch_next_rejects_non_manifest() {
        let mut block = Block::source(BlockSize::Micro, vec![0u8; 64], contract()).unwrap();
        let err = block.patch_next(BlockHash::compute(b"x"));
        assert!(matches!(err, Err(BlockError::NotAManifest(_))));
    }
}
