//! Restoration: CBL chain → consolidated stripes → original bytes.
//!
//! The inverse of ingestion, with a hash check at every stage: each
//! fetched block is verified by the cache on `get`, the reassembled
//! stream is digested and compared against the recorded source id, and
//! `restore_file` hashes the written file a second time from disk before
//! handing the path back.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, instrument};

use lumen_block::{max_storage_length, Block, BlockHash, BlockKind, DataHash, DataHasher, TupleStripe};
use lumen_cache::BlockCacheManager;

use crate::ingest::{hash_file, ChainAssembler};
use crate::{ChainError, Result};

/// A restored file on disk, with the digest that was verified against
/// the written bytes.
#[derive(Debug)]
pub struct SourceFileInfo {
    pub path: PathBuf,
    pub verified_hash: DataHash,
}

impl ChainAssembler {
    /// Open a constituent block list chain as a lazy byte stream.
    ///
    /// Walks the chain from `cbl` via forward links, fetching and
    /// consolidating one stripe per `next()`. The final chunk is clipped
    /// to the recorded total length so padding never leaks out. After
    /// the last chunk the stream verifies the running digest against the
    /// recorded source id and yields an error if they disagree.
    ///
    /// Super lists are rejected with `NotImplemented`: restoring through
    /// one requires fetching and consolidating the member lists first,
    /// which the caller drives.
    pub fn restore_stream(&self, cbl: &Block) -> Result<RestoredStream> {
        match cbl.kind() {
            BlockKind::SuperConstituentBlockList(_) => {
                return Err(ChainError::NotImplemented(
                    "restoring directly from a super list",
                ));
            }
            BlockKind::ConstituentBlockList(_) => {}
            _ => return Err(ChainError::NotAManifest(cbl.id())),
        }

        // Collect tuple hash groups across the whole chain up front;
        // block payloads are only fetched lazily.
        let mut tuples: Vec<Vec<BlockHash>> = Vec::new();
        let mut current = cbl.clone();
        let header = match current.cbl_header() {
            Some(h) => h.clone(),
            None => return Err(ChainError::NotAManifest(current.id())),
        };
        let source_id = header.source_id;
        let total_length = header.total_length;
        loop {
            let next = {
                let Some(h) = current.cbl_header() else {
                    return Err(ChainError::NotAManifest(current.id()));
                };
                tuples.extend(h.tuples().map(|t| t.to_vec()));
                h.next
            };
            match next {
                Some(n) => current = self.cache.get(&n)?,
                None => break,
            }
        }

        debug!(tuples = tuples.len(), total_length, "restore stream opened");
        Ok(RestoredStream {
            cache: self.cache.clone(),
            tuples,
            index: 0,
            remaining: total_length,
            source_id,
            hasher: Some(DataHasher::new()),
            failed: false,
        })
    }

    /// Restore a chain to a file on disk, verified twice: once over the
    /// bytes as they stream out, and once more by rehashing the written
    /// file independently.
    #[instrument(skip(self, cbl), level = "debug")]
    pub fn restore_file(&self, cbl: &Block) -> Result<SourceFileInfo> {
        let stream = self.restore_stream(cbl)?;
        let source_id = stream.source_id;

        let mut tmp = tempfile::NamedTempFile::new()?;
        for chunk in stream {
            tmp.write_all(&chunk?)?;
        }
        tmp.flush()?;

        // Second, independent verification from the bytes on disk.
        let written = hash_file(tmp.path())?;
        if written != source_id {
            return Err(ChainError::SourceDigestMismatch {
                expected: source_id.to_hex(),
                actual: written.to_hex(),
            });
        }

        let (_, path) = tmp.keep().map_err(|e| ChainError::Io(e.error))?;
        Ok(SourceFileInfo {
            path,
            verified_hash: written,
        })
    }
}

/// Lazy, forward-only restored byte sequence over a chain.
///
/// Each `next()` fetches one stripe's blocks, consolidates them, and
/// yields the clipped original bytes. Once all stripes are consumed one
/// final integrity check runs; a digest disagreement or an empty
/// restoration surfaces as a trailing error item.
pub struct RestoredStream {
    cache: Arc<dyn BlockCacheManager>,
    tuples: Vec<Vec<BlockHash>>,
    index: usize,
    remaining: u64,
    source_id: DataHash,
    hasher: Option<DataHasher>,
    failed: bool,
}

impl RestoredStream {
    /// The recorded whole-file id this stream verifies against.
    pub fn source_id(&self) -> DataHash {
        self.source_id
    }

    fn next_chunk(&mut self) -> Result<Vec<u8>> {
        let hashes = &self.tuples[self.index];
        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            blocks.push(self.cache.get(hash)?);
        }
        let stripe = TupleStripe::new(blocks)?;

        if self.index == 0 {
            // Data block size is only known once the first stripe is in
            // hand; a recorded length beyond one super list's reach means
            // the chain needs nesting this store does not do.
            let limit = max_storage_length(stripe.block_size())
                .ok_or(lumen_block::BlockError::UnknownSize)?;
            if self.remaining > limit {
                return Err(ChainError::NotImplemented(
                    "sources beyond a single super list level",
                ));
            }
        }

        let mut bytes = stripe.consolidate();
        let take = std::cmp::min(bytes.len() as u64, self.remaining) as usize;
        bytes.truncate(take);

        if let Some(h) = self.hasher.as_mut() {
            h.update(&bytes);
        }
        self.remaining -= take as u64;
        self.index += 1;
        Ok(bytes)
    }

    fn finish(&mut self) -> Option<Result<Vec<u8>>> {
        let hasher = self.hasher.take()?;
        if hasher.length() == 0 {
            return Some(Err(ChainError::EmptyRestore));
        }
        let actual = hasher.finalize();
        if actual != self.source_id {
            return Some(Err(ChainError::SourceDigestMismatch {
                expected: self.source_id.to_hex(),
                actual: actual.to_hex(),
            }));
        }
        None
    }
}

impl Iterator for RestoredStream {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.index >= self.tuples.len() {
            self.failed = true;
            return self.finish();
        }
        match self.next_chunk() {
            Ok(bytes) => Some(Ok(bytes)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
