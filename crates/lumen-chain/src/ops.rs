//! Single-block and batch store operations with an ownership gate on
//! drops.
//!
//! Storing validates the block structurally before touching the cache
//! and reports every violation at once. Dropping is gated: the store
//! has no block owners by construction, so the only parties allowed to
//! remove a block are the store instance itself (an admin holding its
//! GUID) and anyone at all once the block's retention contract has
//! lapsed.

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use lumen_block::{Block, BlockHash};

use crate::ingest::ChainAssembler;
use crate::{ChainError, Result};

/// Bearer credential for drop requests. Carries the GUID of whoever is
/// asking; matching the store's instance GUID grants admin rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipToken(pub Uuid);

impl OwnershipToken {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl ChainAssembler {
    /// Validate and persist one block.
    ///
    /// Structural validation runs first and aggregates every violation,
    /// so a caller fixing a bad block sees the full list rather than one
    /// failure per attempt. Nothing is written unless validation passes.
    #[instrument(skip(self, block), level = "debug")]
    pub fn store_block(&self, block: Block) -> Result<BlockHash> {
        block.validate()?;
        let hash = block.id();
        self.cache.set(block)?;
        Ok(hash)
    }

    /// Fetch a block by id. The cache layer has already verified the
    /// payload digest against the key by the time this returns.
    pub fn find_block_by_id(&self, hash: &BlockHash) -> Result<Block> {
        Ok(self.cache.get(hash)?)
    }

    /// Drop a block, gated on ownership.
    ///
    /// Permitted when the token matches the store's instance GUID, or
    /// unconditionally once the block's retention contract has expired.
    /// Returns whether anything was removed.
    #[instrument(skip(self), level = "debug")]
    pub fn drop_block_by_id(&self, hash: &BlockHash, token: &OwnershipToken) -> Result<bool> {
        let is_admin = token.0 == self.cache.instance_id();
        if !is_admin {
            // Non-admins may only reap expired blocks, and must prove
            // expiry against the stored contract.
            let block = self.cache.get(hash)?;
            if !block.contract().is_expired(Utc::now()) {
                return Err(ChainError::PermissionDenied(*hash));
            }
        }
        Ok(self.cache.drop_block(hash, false)?)
    }

    /// Store a batch, yielding a per-block outcome in input order. One
    /// bad block never aborts the rest.
    pub fn store_blocks(&self, blocks: Vec<Block>) -> Vec<(BlockHash, Result<()>)> {
        let results: Vec<(BlockHash, Result<()>)> = blocks
            .into_iter()
            .map(|b| {
                let hash = b.id();
                (hash, self.store_block(b).map(|_| ()))
            })
            .collect();
        let stored = results.iter().filter(|(_, r)| r.is_ok()).count();
        debug!(total = results.len(), stored, "batch store complete");
        results
    }

    /// Drop a batch under one token, yielding a per-hash outcome in
    /// input order.
    pub fn drop_blocks_by_id(
        &self,
        hashes: &[BlockHash],
        token: &OwnershipToken,
    ) -> Vec<(BlockHash, Result<bool>)> {
        hashes
            .iter()
            .map(|h| (*h, self.drop_block_by_id(h, token)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lumen_block::{random_bytes, BlockKind, BlockSize, StorageContract};
    use lumen_cache::{BlockCacheManager, CacheError, MemoryBlockStore};
    use std::sync::Arc;

    fn assembler() -> (ChainAssembler, Arc<MemoryBlockStore>) {
        let cache = Arc::new(MemoryBlockStore::new());
        (ChainAssembler::new(cache.clone()), cache)
    }

    fn admin(cache: &MemoryBlockStore) -> OwnershipToken {
        OwnershipToken(cache.instance_id())
    }

    fn block() -> Block {
        Block::source(BlockSize::Micro, random_bytes(64), StorageContract::default()).unwrap()
    }

    fn expired_block() -> Block {
        let mut contract = StorageContract::default();
        contract.requested_at = Utc::now() - Duration::days(3);
        contract.keep_until = Utc::now() - Duration::days(1);
        Block::source(BlockSize::Micro, random_bytes(64), contract).unwrap()
    }

    #[test]
    fn test_store_then_find_roundtrip() {
        let (asm, _cache) = assembler();
        let b = block();
        let bytes = b.bytes().to_vec();

        let hash = asm.store_block(b).unwrap();
        let found = asm.find_block_by_id(&hash).unwrap();
        assert_eq!(found.bytes(), &bytes[..]);
    }

    #[test]
    fn test_store_rejects_invalid_without_writing() {
        let (asm, cache) = assembler();
        // Brightened block claiming a single randomizer: structurally
        // invalid, and the contract ordering is broken too.
        let mut contract = StorageContract::default();
        contract.keep_until = contract.requested_at - Duration::seconds(1);
        let bad = Block::new(
            BlockKind::Brightened {
                constituents: vec![BlockHash::compute(b"one")],
            },
            BlockSize::Micro,
            random_bytes(64),
            contract,
        )
        .unwrap();

        match asm.store_block(bad) {
            Err(ChainError::Block(lumen_block::BlockError::Validation(failures))) => {
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected aggregate validation failure, got {:?}", other),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_admin_token_may_drop_unexpired() {
        let (asm, cache) = assembler();
        let hash = asm.store_block(block()).unwrap();

        assert!(asm.drop_block_by_id(&hash, &admin(&cache)).unwrap());
        assert!(!cache.contains(&hash));
    }

    #[test]
    fn test_foreign_token_denied_on_unexpired() {
        let (asm, cache) = assembler();
        let hash = asm.store_block(block()).unwrap();

        let err = asm.drop_block_by_id(&hash, &OwnershipToken::random());
        assert!(matches!(err, Err(ChainError::PermissionDenied(_))));
        assert!(cache.contains(&hash));
    }

    #[test]
    fn test_anyone_may_reap_expired() {
        let (asm, cache) = assembler();
        let hash = asm.store_block(expired_block()).unwrap();

        assert!(asm
            .drop_block_by_id(&hash, &OwnershipToken::random())
            .unwrap());
        assert!(!cache.contains(&hash));
    }

    #[test]
    fn test_drop_missing_block_is_not_found_for_non_admin() {
        let (asm, _cache) = assembler();
        let missing = BlockHash::compute(b"never stored");
        // A non-admin must prove expiry, which requires the block.
        let err = asm.drop_block_by_id(&missing, &OwnershipToken::random());
        assert!(matches!(
            err,
            Err(ChainError::Cache(CacheError::NotFound(_)))
        ));
    }

    #[test]
    fn test_batch_store_continues_past_duplicates() {
        let (asm, _cache) = assembler();
        let a = block();
        let b = block();
        let dup = a.clone();

        let results = asm.store_blocks(vec![a, dup, b]);
        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(matches!(
            results[1].1,
            Err(ChainError::Cache(CacheError::AlreadyExists(_)))
        ));
        assert!(results[2].1.is_ok());
    }

    #[test]
    fn test_batch_drop_reports_per_hash() {
        let (asm, cache) = assembler();
        let stored = asm.store_block(block()).unwrap();
        let missing = BlockHash::compute(b"absent");

        let results = asm.drop_blocks_by_id(&[stored, missing], &admin(&cache));
        assert_eq!(results[0].0, stored);
        assert!(matches!(results[0].1, Ok(true)));
        // Admin path skips the expiry probe; a miss is a clean false.
        assert!(matches!(results[1].1, Ok(false)));
    }
}
