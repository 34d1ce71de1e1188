//! In-memory map-backed cache manager.
//!
//! The simplest backend: a concurrent hash→block map with no persistence
//! across restarts. Used for randomizer pools and tests. The strictest
//! variant on reads: every `get` revalidates the stored block and raises
//! `CorruptStore` if it no longer passes.
//!
//! Expired blocks are grouped into hourly buckets by their contract's
//! `keep_until`, so a sweep touches only the buckets that have come due.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use lumen_block::{Block, BlockHash};

use crate::events::{CacheEvent, EventBus};
use crate::{BlockCacheManager, CacheError, NodeId, Result};

/// Seconds per expiry bucket.
const BUCKET_SECS: i64 = 3600;

/// Map-backed block store.
pub struct MemoryBlockStore {
    blocks: DashMap<BlockHash, Block>,
    /// keep_until bucket → hashes due in that bucket.
    expiry: Mutex<BTreeMap<i64, Vec<BlockHash>>>,
    events: EventBus,
    trusted: Mutex<Vec<NodeId>>,
    instance_id: Uuid,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self {
            blocks: DashMap::new(),
            expiry: Mutex::new(BTreeMap::new()),
            events: EventBus::new(),
            trusted: Mutex::new(Vec::new()),
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Evict every block whose retention ran out before `now`, emitting
    /// `KeyExpired` per eviction. Returns the number evicted.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let due_bucket = now.timestamp() / BUCKET_SECS;
        let due: Vec<BlockHash> = {
            let mut buckets = self.expiry.lock().unwrap();
            let later = buckets.split_off(&(due_bucket + 1));
            let due = buckets.values().flatten().copied().collect();
            *buckets = later;
            due
        };

        let mut evicted = 0;
        for hash in due {
            // Bucket granularity is coarse; recheck the actual contract.
            let expired = self
                .blocks
                .get(&hash)
                .is_some_and(|b| b.contract().is_expired(now));
            if expired {
                if self.blocks.remove(&hash).is_some() {
                    self.events.publish(CacheEvent::KeyExpired(hash));
                    evicted += 1;
                }
            } else if self.blocks.contains_key(&hash) {
                // Not yet due; put it back in its bucket.
                if let Some(b) = self.blocks.get(&hash) {
                    let bucket = b.contract().keep_until.timestamp() / BUCKET_SECS;
                    self.expiry.lock().unwrap().entry(bucket).or_default().push(hash);
                }
            }
        }
        debug!(evicted, "expiry sweep complete");
        evicted
    }
}

impl Default for MemoryBlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCacheManager for MemoryBlockStore {
    fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    fn get(&self, hash: &BlockHash) -> Result<Block> {
        let Some(entry) = self.blocks.get(hash) else {
            self.events.publish(CacheEvent::CacheMiss(*hash));
            return Err(CacheError::NotFound(*hash));
        };
        let block = entry.clone();
        drop(entry);

        // Strict variant: revalidate on every read.
        if block.verify_id(hash).is_err() || block.validate().is_err() {
            return Err(CacheError::CorruptStore(*hash));
        }
        Ok(block)
    }

    fn set(&self, block: Block) -> Result<()> {
        let hash = block.id();
        let bucket = block.contract().keep_until.timestamp() / BUCKET_SECS;
        match self.blocks.entry(hash) {
            Entry::Occupied(_) => return Err(CacheError::AlreadyExists(hash)),
            Entry::Vacant(slot) => {
                slot.insert(block);
            }
        }
        self.expiry.lock().unwrap().entry(bucket).or_default().push(hash);
        self.events.publish(CacheEvent::KeyAdded(hash));
        Ok(())
    }

    fn drop_block(&self, hash: &BlockHash, skip_contains_check: bool) -> Result<bool> {
        if !skip_contains_check && !self.contains(hash) {
            return Ok(false);
        }
        let removed = self.blocks.remove(hash).is_some();
        if removed {
            self.events.publish(CacheEvent::KeyRemoved(*hash));
        }
        Ok(removed)
    }

    fn subscribe(&self) -> Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn trust(&self, node: NodeId) {
        self.trusted.lock().unwrap().push(node);
    }

    fn trusted(&self) -> Vec<NodeId> {
        self.trusted.lock().unwrap().clone()
    }

    fn instance_id(&self) -> Uuid {
        self.instance_id
    }
}
