//! Ingestion: file → brightened block stream → CBL chain.

use std::cmp::min;
use std::fs::File;
use std::io::{BufReader, Read};
use std::mem;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use lumen_block::{
    build_super_cbl_block, max_storage_length, random_bytes, Block, BlockHash, BrightHandle,
    CblHeader, DataHash, DataHasher, SegmentHash, SegmentHasher,
};
use lumen_brighten::BrighteningService;
use lumen_cache::BlockCacheManager;

use crate::{BlockParams, Chain, ChainError, Result};

/// Compute the whole-file `DataHash` by streaming, without loading the
/// file into memory.
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<DataHash> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = DataHasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// One element of the brightened stream: the persisted brightened block,
/// its tuple-major constituent hashes (brightened id first, then its
/// randomizers), and the unpadded original chunk bytes for segment
/// hashing.
pub struct BrightenedChunk {
    pub brightened: Block,
    pub constituents: Vec<BlockHash>,
    pub plain: Vec<u8>,
}

/// Orchestrates ingestion and restoration over one cache manager.
pub struct ChainAssembler {
    pub(crate) cache: Arc<dyn BlockCacheManager>,
    pub(crate) brightener: BrighteningService,
}

impl ChainAssembler {
    /// Assembler persisting blocks and randomizers into one cache.
    pub fn new(cache: Arc<dyn BlockCacheManager>) -> Self {
        let brightener = BrighteningService::new(cache.clone());
        Self { cache, brightener }
    }

    /// Assembler with a separate randomizer pool.
    pub fn with_randomizer_cache(
        cache: Arc<dyn BlockCacheManager>,
        randomizer_cache: Arc<dyn BlockCacheManager>,
    ) -> Self {
        Self {
            cache,
            brightener: BrighteningService::new(randomizer_cache),
        }
    }

    pub fn cache(&self) -> &Arc<dyn BlockCacheManager> {
        &self.cache
    }

    /// Open a file as a lazy sequence of brightened blocks.
    ///
    /// Forward-only and non-restartable: each `next()` reads one chunk,
    /// brightens it, and persists the brightened block before yielding.
    /// Consuming the stream partially still leaves the already-produced
    /// blocks in the cache.
    ///
    /// Fails with `ExceedsCapacity` before any byte is read if the file
    /// cannot fit one super list at this block size.
    pub fn stream_brightened<'a>(
        &'a self,
        path: &Path,
        params: &BlockParams,
    ) -> Result<BrightenedStream<'a>> {
        let block_len = params.block_size.length_or_err()?;
        let limit = max_storage_length(params.block_size).ok_or(lumen_block::BlockError::UnknownSize)?;
        let length = std::fs::metadata(path)?.len();
        if length > limit {
            return Err(ChainError::ExceedsCapacity {
                length,
                limit,
                size: params.block_size,
            });
        }

        Ok(BrightenedStream {
            assembler: self,
            params: params.clone(),
            reader: BufReader::new(File::open(path)?),
            block_len,
            remaining: length,
            expected: length.div_ceil(block_len as u64),
            produced: 0,
            hasher: DataHasher::new(),
            failed: false,
        })
    }

    /// Consume a file into an ordered, doubly linked chain of
    /// constituent block lists. The lists are returned with their links
    /// patched but are not yet persisted; `make_cbl_or_super_cbl_from_file`
    /// persists them only once the whole chain assembled cleanly.
    #[instrument(skip(self, params), level = "debug")]
    pub fn assemble_cbl_chain(&self, path: &Path, params: &BlockParams) -> Result<(Vec<Block>, DataHash)> {
        // First pass: the whole-file id every list in the chain records.
        let source_id = hash_file(path)?;

        let mut stream = self.stream_brightened(path, params)?;
        let expected = stream.expected;
        let capacity = CblHeader::capacity_tuples(params.block_size)
            .ok_or(lumen_block::BlockError::UnknownSize)?;

        let mut cbls: Vec<Block> = Vec::new();
        let mut constituents: Vec<BlockHash> = Vec::new();
        let mut segment = SegmentHasher::new();
        let mut tuples: u64 = 0;

        for chunk in &mut stream {
            let chunk = chunk?;
            segment.update(&chunk.plain);
            constituents.extend(chunk.constituents);
            tuples += 1;

            if tuples == capacity {
                self.flush_cbl(
                    &mut cbls,
                    source_id,
                    mem::take(&mut segment),
                    mem::take(&mut constituents),
                    params,
                )?;
                tuples = 0;
            }
        }

        let (streamed, produced) = stream.finalize();
        if produced != expected {
            return Err(ChainError::BlockCountMismatch {
                expected,
                consumed: produced,
            });
        }
        // The file was hashed twice; a disagreement means it changed
        // between the passes.
        if streamed != source_id {
            return Err(ChainError::SourceDigestMismatch {
                expected: source_id.to_hex(),
                actual: streamed.to_hex(),
            });
        }

        // Final flush: remaining tuples, or a single empty list for an
        // empty source.
        if tuples > 0 || cbls.is_empty() {
            self.flush_cbl(&mut cbls, source_id, segment, constituents, params)?;
        }

        debug!(lists = cbls.len(), blocks = produced, "chain assembled");
        Ok((cbls, source_id))
    }

    fn flush_cbl(
        &self,
        cbls: &mut Vec<Block>,
        source_id: DataHash,
        segment: SegmentHasher,
        constituents: Vec<BlockHash>,
        params: &BlockParams,
    ) -> Result<()> {
        let previous = cbls.last().map(|c| c.id());
        let header = CblHeader::new(
            source_id,
            segment.finalize(),
            source_id.length(),
            constituents,
            previous,
        );
        let block = lumen_block::build_cbl_block(header, params.contract)?;

        // Patch the forward pointer only after the new list exists.
        if let Some(prev) = cbls.last_mut() {
            prev.patch_next(block.id())?;
        }
        cbls.push(block);
        Ok(())
    }

    /// Wrap a chain of more than one list in a super list whose
    /// constituents are the list ids. One level only; deeper nesting
    /// fails loudly rather than truncating.
    pub fn promote_to_super_cbl(
        &self,
        cbls: &[Block],
        source_id: DataHash,
        params: &BlockParams,
    ) -> Result<Block> {
        let capacity = CblHeader::capacity_tuples(params.block_size)
            .ok_or(lumen_block::BlockError::UnknownSize)?;
        if cbls.len() as u64 > capacity {
            return Err(ChainError::NotImplemented(
                "chains needing more than one super list level",
            ));
        }

        let mut concatenated = Vec::with_capacity(cbls.len() * 32);
        for cbl in cbls {
            concatenated.extend_from_slice(cbl.id().as_bytes());
        }
        let header = CblHeader::new(
            source_id,
            SegmentHash::compute(&concatenated),
            source_id.length(),
            cbls.iter().map(|c| c.id()).collect(),
            None,
        );
        Ok(build_super_cbl_block(header, params.contract)?)
    }

    /// Single entry point for "ingest a file": assemble the chain,
    /// persist every list, promote to a super list when needed, brighten
    /// the top manifest, and hand back a shareable handle.
    #[instrument(skip(self, params), level = "debug")]
    pub fn make_cbl_or_super_cbl_from_file(
        &self,
        path: &Path,
        params: &BlockParams,
    ) -> Result<Chain> {
        let (cbls, source_id) = self.assemble_cbl_chain(path, params)?;
        for cbl in &cbls {
            self.cache.set(cbl.clone())?;
        }

        let super_cbl = if cbls.len() > 1 {
            let block = self.promote_to_super_cbl(&cbls, source_id, params)?;
            self.cache.set(block.clone())?;
            Some(block)
        } else {
            None
        };

        // Brighten the top manifest so the chain can be shared without
        // exposing its bytes.
        let top = super_cbl.as_ref().unwrap_or(&cbls[0]);
        let outcome = self.brightener.brighten(top)?;
        self.cache.set(outcome.brightened.clone())?;

        let mut stripe_hashes = vec![outcome.brightened.id()];
        stripe_hashes.extend(outcome.randomizers.iter().map(|r| r.id()));
        let handle = BrightHandle::new(
            top.block_size(),
            stripe_hashes,
            top.block_type(),
            outcome.brightened.id(),
            source_id,
        );

        Ok(Chain {
            source_id,
            cbls,
            super_cbl,
            handle,
        })
    }
}

/// Lazy, forward-only brightened block sequence over one file.
pub struct BrightenedStream<'a> {
    assembler: &'a ChainAssembler,
    params: BlockParams,
    reader: BufReader<File>,
    block_len: usize,
    remaining: u64,
    expected: u64,
    produced: u64,
    hasher: DataHasher,
    failed: bool,
}

impl BrightenedStream<'_> {
    /// Blocks this stream will produce if the file does not change.
    pub fn expected_blocks(&self) -> u64 {
        self.expected
    }

    /// Finish the stream, yielding the running whole-file hash and the
    /// number of blocks produced.
    pub fn finalize(self) -> (DataHash, u64) {
        (self.hasher.finalize(), self.produced)
    }

    fn read_chunk(&mut self) -> Result<BrightenedChunk> {
        let want = min(self.block_len as u64, self.remaining) as usize;
        let mut plain = vec![0u8; want];
        let mut got = 0;
        while got < want {
            let n = self.reader.read(&mut plain[got..])?;
            if n == 0 {
                // The file shrank under us; never truncate silently.
                return Err(ChainError::UnexpectedEof { wanted: want, got });
            }
            got += n;
        }
        self.hasher.update(&plain);

        let mut padded = plain.clone();
        if want < self.block_len {
            padded.extend(random_bytes(self.block_len - want));
        }
        let source = Block::source(self.params.block_size, padded, self.params.contract)?;
        let outcome = self.assembler.brightener.brighten(&source)?;

        // Persist before yield.
        self.assembler.cache.set(outcome.brightened.clone())?;

        let mut constituents = vec![outcome.brightened.id()];
        constituents.extend(outcome.randomizers.iter().map(|r| r.id()));

        self.remaining -= want as u64;
        self.produced += 1;
        Ok(BrightenedChunk {
            brightened: outcome.brightened,
            constituents,
            plain,
        })
    }
}

impl Iterator for BrightenedStream<'_> {
    type Item = Result<BrightenedChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }
        match self.read_chunk() {
            Ok(chunk) => Some(Ok(chunk)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_block::{BlockKind, BlockSize, TUPLE_COUNT};
    use lumen_cache::MemoryBlockStore;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    fn assembler() -> (ChainAssembler, Arc<MemoryBlockStore>) {
        let cache = Arc::new(MemoryBlockStore::new());
        (ChainAssembler::new(cache.clone()), cache)
    }

    fn params() -> BlockParams {
        BlockParams::new(BlockSize::Micro)
    }

    #[test]
    fn test_hundred_byte_file_makes_one_list() {
        // 100 bytes at 64-byte blocks: one full chunk, one padded chunk.
        let content: Vec<u8> = (0..100u8).collect();
        let file = write_temp(&content);
        let (asm, _cache) = assembler();

        let chain = asm
            .make_cbl_or_super_cbl_from_file(file.path(), &params())
            .unwrap();

        assert_eq!(chain.cbls.len(), 1);
        assert!(chain.super_cbl.is_none());
        assert_eq!(chain.top().id(), chain.cbls[0].id());
        assert_eq!(chain.source_id, DataHash::compute(&content));
        assert_eq!(chain.source_id.length(), 100);

        let header = chain.cbls[0].cbl_header().unwrap();
        // Two tuples of five hashes each, brightened id first.
        assert_eq!(header.constituents.len(), 2 * TUPLE_COUNT);
        assert_eq!(header.total_length, 100);
        assert!(header.previous.is_none());
        assert!(header.next.is_none());
    }

    #[test]
    fn test_brightened_stream_persists_before_yield() {
        let file = write_temp(&[0xAB; 70]);
        let (asm, cache) = assembler();
        let p = params();

        let mut stream = asm.stream_brightened(file.path(), &p).unwrap();
        assert_eq!(stream.expected_blocks(), 2);

        let first = stream.next().unwrap().unwrap();
        assert!(cache.contains(&first.brightened.id()));
        let BlockKind::Brightened { constituents } = first.brightened.kind() else {
            panic!("expected brightened block");
        };
        for r in constituents {
            assert!(cache.contains(r));
        }

        // Abandon the stream mid-way: the produced block stays put.
        drop(stream);
        assert!(cache.contains(&first.brightened.id()));
    }

    #[test]
    fn test_shrinking_file_fails_instead_of_truncating() {
        // Two chunks expected; the file loses its second one before the
        // stream reaches it.
        let file = write_temp(&[0x11; 128]);
        let (asm, _cache) = assembler();
        let mut stream = asm.stream_brightened(file.path(), &params()).unwrap();
        assert_eq!(stream.expected_blocks(), 2);

        file.as_file().set_len(64).unwrap();

        assert!(stream.next().unwrap().is_ok());
        let err = stream.next().unwrap();
        assert!(matches!(
            err,
            Err(ChainError::UnexpectedEof { wanted: 64, got: 0 })
        ));
        // The stream is dead after a failure, never resumed.
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_chain_linkage_across_lists() {
        // 200 bytes at 64-byte blocks: 4 tuples, capacity 2 per list,
        // so 2 lists plus a super list.
        let content: Vec<u8> = (0..200).map(|i| (i % 251) as u8).collect();
        let file = write_temp(&content);
        let (asm, _cache) = assembler();

        let chain = asm
            .make_cbl_or_super_cbl_from_file(file.path(), &params())
            .unwrap();

        assert_eq!(chain.cbls.len(), 2);
        let first = chain.cbls[0].cbl_header().unwrap();
        let second = chain.cbls[1].cbl_header().unwrap();

        assert!(first.previous.is_none());
        assert_eq!(first.next, Some(chain.cbls[1].id()));
        assert_eq!(second.previous, Some(chain.cbls[0].id()));
        assert!(second.next.is_none());

        let sup = chain.super_cbl.as_ref().unwrap();
        assert_eq!(chain.top().id(), sup.id());
        let sup_header = sup.cbl_header().unwrap();
        assert_eq!(
            sup_header.constituents,
            vec![chain.cbls[0].id(), chain.cbls[1].id()]
        );
    }

    #[test]
    fn test_capacity_rejected_before_any_block_is_persisted() {
        // Micro ceiling is 256 bytes; one byte over must fail with an
        // untouched cache.
        let content = vec![0u8; 257];
        let file = write_temp(&content);
        let (asm, cache) = assembler();

        let err = asm.make_cbl_or_super_cbl_from_file(file.path(), &params());
        assert!(matches!(err, Err(ChainError::ExceedsCapacity { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_exact_multiple_needs_no_padding() {
        let content = vec![0x5Au8; 128];
        let file = write_temp(&content);
        let (asm, _cache) = assembler();

        let chain = asm
            .make_cbl_or_super_cbl_from_file(file.path(), &params())
            .unwrap();
        assert_eq!(chain.cbls.len(), 1);
        assert_eq!(
            chain.cbls[0].cbl_header().unwrap().constituents.len(),
            2 * TUPLE_COUNT
        );
    }

    #[test]
    fn test_super_promotion_depth_limit() {
        // 5 lists cannot be indexed by one Micro-capacity super list.
        let content: Vec<u8> = (0..100u8).collect();
        let file = write_temp(&content);
        let (asm, _cache) = assembler();
        let (cbls, source_id) = asm.assemble_cbl_chain(file.path(), &params()).unwrap();

        let many: Vec<Block> = (0..5).flat_map(|_| cbls.clone()).collect();
        let err = asm.promote_to_super_cbl(&many, source_id, &params());
        assert!(matches!(err, Err(ChainError::NotImplemented(_))));
    }

    #[test]
    fn test_handle_references_brightened_top() {
        let content: Vec<u8> = (0..100u8).collect();
        let file = write_temp(&content);
        let (asm, cache) = assembler();

        let chain = asm
            .make_cbl_or_super_cbl_from_file(file.path(), &params())
            .unwrap();

        assert_eq!(chain.handle.source_id, chain.source_id);
        assert_eq!(chain.handle.block_hashes.len(), TUPLE_COUNT);
        assert_eq!(chain.handle.block_hashes[0], chain.handle.brightened_cbl_hash);
        assert!(cache.contains(&chain.handle.brightened_cbl_hash));
    }
}
