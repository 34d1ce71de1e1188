//! Transactable blocks: commit-once wrappers over a cache manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lumen_block::Block;

use crate::{BlockCacheManager, CacheError, Result};

/// A block bound to the cache manager that will persist it.
///
/// `commit` persists through the owning manager exactly once; a second
/// commit is an error, as is committing when `allow_commit` was false.
pub struct TransactableBlock {
    block: Block,
    cache: Arc<dyn BlockCacheManager>,
    allow_commit: bool,
    committed: AtomicBool,
}

impl TransactableBlock {
    pub fn new(block: Block, cache: Arc<dyn BlockCacheManager>, allow_commit: bool) -> Self {
        Self {
            block,
            cache,
            allow_commit,
            committed: AtomicBool::new(false),
        }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    /// Persist the block through the owning cache manager.
    pub fn commit(&self) -> Result<()> {
        if !self.allow_commit {
            return Err(CacheError::CommitNotAllowed(self.block.id()));
        }
        if self.committed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::AlreadyCommitted(self.block.id()));
        }
        match self.cache.set(self.block.clone()) {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed set never happened; allow a retry.
                self.committed.store(false, Ordering::Release);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBlockStore;
    use lumen_block::{random_bytes, BlockSize, StorageContract};

    fn block() -> Block {
        Block::source(BlockSize::Micro, random_bytes(64), StorageContract::default()).unwrap()
    }

    #[test]
    fn test_commit_persists_once() {
        let cache = Arc::new(MemoryBlockStore::new());
        let b = block();
        let id = b.id();

        let tx = TransactableBlock::new(b, cache.clone(), true);
        tx.commit().unwrap();
        assert!(cache.contains(&id));

        assert!(matches!(
            tx.commit(),
            Err(CacheError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn test_commit_denied_without_permission() {
        let cache = Arc::new(MemoryBlockStore::new());
        let tx = TransactableBlock::new(block(), cache, false);
        assert!(matches!(tx.commit(), Err(CacheError::CommitNotAllowed(_))));
    }
}
