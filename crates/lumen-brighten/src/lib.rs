//! # lumen-brighten
//!
//! The brightening transform: XOR a source block with `TUPLE_COUNT - 1`
//! randomizer blocks so the stored bytes are statistically uncorrelated
//! with the original content, and the inverse (consolidation) that XORs
//! a full stripe back to the original.
//!
//! Randomizer policy: always generate. Every brighten call mints fresh
//! cryptographically random blocks and persists them to the randomizer
//! cache before the brightened block is returned. Reuse from a
//! pregenerated pool is a policy the cache abstraction permits but this
//! service does not implement.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use lumen_block::{
    xor_into, Block, BlockError, BlockKind, TupleStripe, ValidationFailure, TUPLE_COUNT,
};
use lumen_cache::{BlockCacheManager, CacheError};

/// Errors from the brightening transform.
#[derive(Error, Debug)]
pub enum BrightenError {
    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, BrightenError>;

/// Everything a brighten call produces: the brightened block, the
/// randomizers it consumed, and the stripe that reverses the transform.
pub struct BrightenOutcome {
    pub brightened: Block,
    pub randomizers: Vec<Block>,
    pub stripe: TupleStripe,
}

/// The XOR transform service, bound to the cache its randomizers
/// persist into.
pub struct BrighteningService {
    randomizer_cache: Arc<dyn BlockCacheManager>,
}

impl BrighteningService {
    pub fn new(randomizer_cache: Arc<dyn BlockCacheManager>) -> Self {
        Self { randomizer_cache }
    }

    /// Brighten one identifiable block.
    ///
    /// Mints `TUPLE_COUNT - 1` randomizers of the source's size, persists
    /// each to the randomizer cache, and XORs everything position-wise
    /// into one output buffer. The brightened block's constituents record
    /// the randomizer hashes only; the caller must retain the brightened
    /// block's own hash to reconstruct.
    ///
    /// The source keeps its storage contract terms on the brightened
    /// block; randomizers never inherit the privacy tag.
    #[instrument(skip(self, source), level = "debug")]
    pub fn brighten(&self, source: &Block) -> Result<BrightenOutcome> {
        let size = source.block_size();
        let expected = size.length_or_err()?;
        if source.bytes().len() != expected {
            // Block construction enforces this; reaching here is a logic
            // defect, surfaced as a fatal validation error.
            return Err(BlockError::Validation(vec![ValidationFailure::LengthMismatch {
                expected,
                actual: source.bytes().len(),
            }])
            .into());
        }

        let mut randomizers = Vec::with_capacity(TUPLE_COUNT - 1);
        let mut acc = source.bytes().to_vec();
        for _ in 0..TUPLE_COUNT - 1 {
            let r = Block::randomizer(size, source.contract().for_randomizer())?;
            xor_into(&mut acc, r.bytes());
            self.randomizer_cache.set(r.clone())?;
            randomizers.push(r);
        }

        let constituents = randomizers.iter().map(|r| r.id()).collect();
        let brightened = Block::new(
            BlockKind::Brightened { constituents },
            size,
            acc,
            *source.contract(),
        )?;

        let stripe = TupleStripe::from_parts(brightened.clone(), randomizers.clone())?;
        Ok(BrightenOutcome {
            brightened,
            randomizers,
            stripe,
        })
    }

    /// Reverse the transform: XOR every stripe member back to the
    /// original bytes and wrap them as a source block.
    ///
    /// A missing stripe member is a fetch failure the cache layer
    /// surfaces before this is called; consolidation itself has no
    /// partial-recovery mode.
    pub fn consolidate(stripe: &TupleStripe) -> Result<Block> {
        let bytes = stripe.consolidate();
        let primary = &stripe.blocks()[0];
        Ok(Block::source(
            stripe.block_size(),
            bytes,
            *primary.contract(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_block::{random_bytes, BlockSize, StorageContract};
    use lumen_cache::MemoryBlockStore;

    fn service() -> (BrighteningService, Arc<MemoryBlockStore>) {
        let cache = Arc::new(MemoryBlockStore::new());
        (BrighteningService::new(cache.clone()), cache)
    }

    fn source(bytes: Vec<u8>) -> Block {
        Block::source(BlockSize::Micro, bytes, StorageContract::default()).unwrap()
    }

    #[test]
    fn test_brighten_consolidate_is_identity() {
        let (svc, _cache) = service();
        let original = random_bytes(64);
        let outcome = svc.brighten(&source(original.clone())).unwrap();

        let restored = BrighteningService::consolidate(&outcome.stripe).unwrap();
        assert_eq!(restored.bytes(), &original[..]);
    }

    #[test]
    fn test_brightened_bytes_differ_from_source() {
        let (svc, _cache) = service();
        let original = random_bytes(64);
        let outcome = svc.brighten(&source(original.clone())).unwrap();
        // With four random XOR layers, a collision with the original
        // would mean all randomizers cancelled out.
        assert_ne!(outcome.brightened.bytes(), &original[..]);
    }

    #[test]
    fn test_randomizers_persisted_before_return() {
        let (svc, cache) = service();
        let outcome = svc.brighten(&source(random_bytes(64))).unwrap();

        assert_eq!(outcome.randomizers.len(), TUPLE_COUNT - 1);
        for r in &outcome.randomizers {
            assert!(cache.contains(&r.id()));
        }
        // The brightened block itself is the chain layer's to persist.
        assert!(!cache.contains(&outcome.brightened.id()));
    }

    #[test]
    fn test_constituents_record_randomizer_hashes_only() {
        let (svc, _cache) = service();
        let outcome = svc.brighten(&source(random_bytes(64))).unwrap();

        let BlockKind::Brightened { constituents } = outcome.brightened.kind() else {
            panic!("expected a brightened block");
        };
        let randomizer_ids: Vec<_> = outcome.randomizers.iter().map(|r| r.id()).collect();
        assert_eq!(constituents, &randomizer_ids);
        assert!(!constituents.contains(&outcome.brightened.id()));
    }

    #[test]
    fn test_privacy_tag_not_inherited_by_randomizers() {
        let (svc, _cache) = service();
        let mut contract = StorageContract::default();
        contract.private_encrypted = true;
        let src = Block::source(BlockSize::Micro, random_bytes(64), contract).unwrap();

        let outcome = svc.brighten(&src).unwrap();
        assert!(outcome.brightened.contract().private_encrypted);
        assert!(outcome.randomizers.iter().all(|r| !r.contract().private_encrypted));
    }
}
