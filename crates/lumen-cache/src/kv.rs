//! LMDB-backed cache manager.
//!
//! Same external contract as the other backends, on a memory-mapped KV
//! store. Three databases:
//! - `blocks`: block hash → metadata + payload
//! - `handles`: source id → bright handle (the `set_cbl`/`get_cbl` index)
//! - `meta`: store identity (instance GUID, root block hash)
//!
//! The root block carries the store's GUID and is created on first open.

use std::path::Path;
use std::sync::Mutex;

use crossbeam_channel::Receiver;
use heed::types::{Bytes, SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use lumen_block::{Block, BlockHash, BlockMetadata, BlockSize, BrightHandle, DataHash};

use crate::events::{CacheEvent, EventBus};
use crate::{BlockCacheManager, CacheError, NodeId, Result};

/// LMDB map size: 1 GiB, expandable by reopening.
const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;
const MAX_READERS: u32 = 128;

const META_INSTANCE_ID: &str = "instance_id";
const META_ROOT_HASH: &str = "root_hash";

/// A block as stored in LMDB: both framing halves together.
#[derive(Serialize, Deserialize)]
struct StoredBlock {
    meta: BlockMetadata,
    payload: Vec<u8>,
}

/// LMDB-backed block store with a bright-handle index.
pub struct KvBlockStore {
    env: Env,
    blocks_db: Database<Bytes, SerdeBincode<StoredBlock>>,
    handles_db: Database<Bytes, SerdeBincode<BrightHandle>>,
    root: Block,
    instance_id: Uuid,
    events: EventBus,
    trusted: Mutex<Vec<NodeId>>,
}

impl KvBlockStore {
    /// Open or create a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(DEFAULT_MAP_SIZE)
                .max_readers(MAX_READERS)
                .max_dbs(3)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks_db = env.create_database(&mut wtxn, Some("blocks"))?;
        let handles_db = env.create_database(&mut wtxn, Some("handles"))?;
        let meta_db: Database<Str, Bytes> = env.create_database(&mut wtxn, Some("meta"))?;

        // Identity bootstrap: mint the GUID and root block on first open,
        // recover them afterwards.
        let (instance_id, root) = match meta_db.get(&wtxn, META_INSTANCE_ID)? {
            Some(id_bytes) => {
                let instance_id = Uuid::from_slice(id_bytes).map_err(|e| {
                    CacheError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
                })?;
                let root_hash = meta_db
                    .get(&wtxn, META_ROOT_HASH)?
                    .and_then(|b| b.try_into().ok().map(BlockHash::from_digest))
                    .ok_or_else(|| {
                        CacheError::Io(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "missing root block hash",
                        ))
                    })?;
                let stored: StoredBlock = blocks_db
                    .get(&wtxn, root_hash.as_bytes().as_slice())?
                    .ok_or(CacheError::NotFound(root_hash))?;
                (instance_id, Block::from_parts(stored.meta, stored.payload)?)
            }
            None => {
                let instance_id = Uuid::new_v4();
                let root = Block::root(BlockSize::Message, instance_id)?;
                blocks_db.put(
                    &mut wtxn,
                    root.id().as_bytes().as_slice(),
                    &StoredBlock {
                        meta: root.metadata(),
                        payload: root.bytes().to_vec(),
                    },
                )?;
                meta_db.put(&mut wtxn, META_INSTANCE_ID, instance_id.as_bytes().as_slice())?;
                meta_db.put(&mut wtxn, META_ROOT_HASH, root.id().as_bytes().as_slice())?;
                debug!(%instance_id, "created new store identity");
                (instance_id, root)
            }
        };
        wtxn.commit()?;

        Ok(Self {
            env,
            blocks_db,
            handles_db,
            root,
            instance_id,
            events: EventBus::new(),
            trusted: Mutex::new(Vec::new()),
        })
    }

    /// The per-store identity block.
    pub fn root_block(&self) -> &Block {
        &self.root
    }

    /// Index a bright handle under its source id. Re-ingesting the same
    /// source replaces the previous handle; the index is not
    /// content-addressed.
    pub fn set_cbl(&self, handle: &BrightHandle) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.handles_db
            .put(&mut wtxn, handle.source_id.index_key().as_slice(), handle)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Look up the bright handle for a source id.
    pub fn get_cbl(&self, source_id: &DataHash) -> Result<BrightHandle> {
        let rtxn = self.env.read_txn()?;
        self.handles_db
            .get(&rtxn, source_id.index_key().as_slice())?
            .ok_or_else(|| CacheError::HandleNotFound(source_id.to_hex()))
    }

    /// Flush the environment to disk.
    pub fn sync(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}

impl BlockCacheManager for KvBlockStore {
    fn contains(&self, hash: &BlockHash) -> bool {
        let Ok(rtxn) = self.env.read_txn() else {
            return false;
        };
        matches!(self.blocks_db.get(&rtxn, hash.as_bytes().as_slice()), Ok(Some(_)))
    }

    fn get(&self, hash: &BlockHash) -> Result<Block> {
        let rtxn = self.env.read_txn()?;
        let Some(stored) = self.blocks_db.get(&rtxn, hash.as_bytes().as_slice())? else {
            drop(rtxn);
            self.events.publish(CacheEvent::CacheMiss(*hash));
            return Err(CacheError::NotFound(*hash));
        };

        let actual = BlockHash::compute(&stored.payload);
        if actual != *hash {
            return Err(CacheError::Integrity {
                hash: *hash,
                actual,
            });
        }
        Ok(Block::from_parts(stored.meta, stored.payload)?)
    }

    fn set(&self, block: Block) -> Result<()> {
        let hash = block.id();
        let mut wtxn = self.env.write_txn()?;
        if self.blocks_db.get(&wtxn, hash.as_bytes().as_slice())?.is_some() {
            return Err(CacheError::AlreadyExists(hash));
        }
        self.blocks_db.put(
            &mut wtxn,
            hash.as_bytes().as_slice(),
            &StoredBlock {
                meta: block.metadata(),
                payload: block.bytes().to_vec(),
            },
        )?;
        wtxn.commit()?;
        self.events.publish(CacheEvent::KeyAdded(hash));
        Ok(())
    }

    fn drop_block(&self, hash: &BlockHash, skip_contains_check: bool) -> Result<bool> {
        if !skip_contains_check && !self.contains(hash) {
            return Ok(false);
        }
        let mut wtxn = self.env.write_txn()?;
        let removed = self.blocks_db.delete(&mut wtxn, hash.as_bytes().as_slice())?;
        wtxn.commit()?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_block::{random_bytes, BlockType, StorageContract};
    use tempfile::TempDir;

    fn block() -> Block {
        Block::source(BlockSize::Micro, random_bytes(64), StorageContract::default()).unwrap()
    }

    #[test]
    fn test_store_and_retrieve() {
        let temp = TempDir::new().unwrap();
        let store = KvBlockStore::open(temp.path().join("kv")).unwrap();

        let b = block();
        let id = b.id();
        let bytes = b.bytes().to_vec();
        store.set(b).unwrap();

        let got = store.get(&id).unwrap();
        assert_eq!(got.bytes(), &bytes[..]);
    }

    #[test]
    fn test_insert_once() {
        let temp = TempDir::new().unwrap();
        let store = KvBlockStore::open(temp.path().join("kv")).unwrap();

        let b = block();
        store.set(b.clone()).unwrap();
        assert!(matches!(store.set(b), Err(CacheError::AlreadyExists(_))));
    }

    #[test]
    fn test_root_block_and_identity_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kv");

        let first = KvBlockStore::open(&path).unwrap();
        let id = first.instance_id();
        let root_hash = first.root_block().id();
        drop(first);

        let second = KvBlockStore::open(&path).unwrap();
        assert_eq!(second.instance_id(), id);
        assert_eq!(second.root_block().id(), root_hash);
        assert_eq!(second.root_block().block_type(), BlockType::Root);
    }

    #[test]
    fn test_handle_index_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = KvBlockStore::open(temp.path().join("kv")).unwrap();

        let source_id = DataHash::compute(b"the source file");
        let handle = BrightHandle::new(
            BlockSize::Micro,
            vec![BlockHash::compute(b"a")],
            BlockType::ConstituentBlockList,
            BlockHash::compute(b"cbl"),
            source_id,
        );

        store.set_cbl(&handle).unwrap();
        assert_eq!(store.get_cbl(&source_id).unwrap(), handle);

        let other = DataHash::compute(b"another file");
        assert!(matches!(
            store.get_cbl(&other),
            Err(CacheError::HandleNotFound(_))
        ));
    }

    #[test]
    fn test_miss_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = KvBlockStore::open(temp.path().join("kv")).unwrap();
        let missing = BlockHash::compute(b"nope");
        assert!(matches!(store.get(&missing), Err(CacheError::NotFound(_))));
    }
}
