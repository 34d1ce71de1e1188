//! Disk-backed cache manager.
//!
//! One file per block at a path derived from the hash:
//!
//! ```text
//! {base}/{hash[0:2]}/{hash[2:4]}/{database}/{full-hash}
//! ```
//!
//! The two leading directory shards bound fan-out per directory. Each
//! file is framed as `metadata-json || 0x00 || payload`: variable-length
//! JSON metadata, one zero-byte sentinel, then the fixed-length payload.
//! JSON never contains a NUL byte, so the first zero splits the halves.
//! This framing is a persisted-format contract shared with existing
//! stores and must not change.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crossbeam_channel::Receiver;
use tracing::instrument;
use uuid::Uuid;

use lumen_block::{Block, BlockHash, BlockMetadata};

use crate::events::{CacheEvent, EventBus};
use crate::{BlockCacheManager, CacheError, NodeId, Result};

/// Sentinel splitting metadata from payload.
const METADATA_TERMINATOR: u8 = 0x00;

/// Filesystem-backed block store.
pub struct DiskBlockStore {
    base: PathBuf,
    database: String,
    instance_id: Uuid,
    events: EventBus,
    trusted: Mutex<Vec<NodeId>>,
}

impl DiskBlockStore {
    /// Open or create a store rooted at `base` for the named database.
    ///
    /// The instance GUID is persisted beside the shards so the store
    /// keeps its identity across restarts.
    pub fn open<P: AsRef<Path>>(base: P, database: &str) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;

        let id_path = base.join(format!("{database}.instance"));
        let instance_id = if id_path.exists() {
            let text = fs::read_to_string(&id_path)?;
            Uuid::parse_str(text.trim()).map_err(|e| {
                CacheError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?
        } else {
            let id = Uuid::new_v4();
            fs::write(&id_path, id.to_string())?;
            id
        };

        Ok(Self {
            base,
            database: database.to_string(),
            instance_id,
            events: EventBus::new(),
            trusted: Mutex::new(Vec::new()),
        })
    }

    fn block_path(&self, hash: &BlockHash) -> PathBuf {
        let hex = hash.to_hex();
        self.base
            .join(&hex[..2])
            .join(&hex[2..4])
            .join(&self.database)
            .join(&hex)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl BlockCacheManager for DiskBlockStore {
    fn contains(&self, hash: &BlockHash) -> bool {
        self.block_path(hash).exists()
    }

    #[instrument(skip(self), level = "debug")]
    fn get(&self, hash: &BlockHash) -> Result<Block> {
        let path = self.block_path(hash);
        if !path.exists() {
            self.events.publish(CacheEvent::CacheMiss(*hash));
            return Err(CacheError::NotFound(*hash));
        }

        let data = fs::read(&path)?;
        let split = data
            .iter()
            .position(|&b| b == METADATA_TERMINATOR)
            .ok_or(CacheError::MissingTerminator(*hash))?;
        let meta: BlockMetadata = serde_json::from_slice(&data[..split])?;
        let payload = data[split + 1..].to_vec();

        let actual = BlockHash::compute(&payload);
        if actual != *hash {
            return Err(CacheError::Integrity {
                hash: *hash,
                actual,
            });
        }

        Ok(Block::from_parts(meta, payload)?)
    }

    #[instrument(skip(self, block), level = "debug")]
    fn set(&self, block: Block) -> Result<()> {
        let hash = block.id();
        let path = self.block_path(&hash);
        if path.exists() {
            return Err(CacheError::AlreadyExists(hash));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Unique temp name so concurrent writers of different blocks in
        // one shard never collide.
        let temp_name = format!(
            "{}.{}.{:?}.tmp",
            hash.to_hex(),
            std::process::id(),
            std::thread::current().id()
        );
        let temp_path = path.with_file_name(&temp_name);
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&serde_json::to_vec(&block.metadata())?)?;
            file.write_all(&[METADATA_TERMINATOR])?;
            file.write_all(block.bytes())?;
            file.sync_all()?;
        }

        // hard_link fails if the target exists, so a race on the same
        // hash resolves to one insert and AlreadyExists for the rest.
        let linked = fs::hard_link(&temp_path, &path);
        let _ = fs::remove_file(&temp_path);
        match linked {
            Ok(()) => {
                self.events.publish(CacheEvent::KeyAdded(hash));
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(CacheError::AlreadyExists(hash))
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    fn drop_block(&self, hash: &BlockHash, skip_contains_check: bool) -> Result<bool> {
        let path = self.block_path(hash);
        if !skip_contains_check && !path.exists() {
            return Ok(false);
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                self.events.publish(CacheEvent::KeyRemoved(*hash));
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        }
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
