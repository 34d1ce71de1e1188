//! Tuple stripes: the unit of the XOR transform.
//!
//! A stripe is exactly `TUPLE_COUNT` blocks of one size, one payload
//! block plus `TUPLE_COUNT - 1` randomizers, that XOR back to the
//! original content. Stripes are constructed transiently during
//! brightening and consolidation and are never persisted themselves.

use crate::block::Block;
use crate::BlockError;

/// Blocks per tuple: one brightened or original block plus four
/// randomizers. Module-wide constant.
pub const TUPLE_COUNT: usize = 5;

/// XOR `src` into `acc` position-wise. Lengths must already match.
pub fn xor_into(acc: &mut [u8], src: &[u8]) {
    debug_assert_eq!(acc.len(), src.len());
    for (a, s) in acc.iter_mut().zip(src) {
        *a ^= s;
    }
}

/// Exactly `TUPLE_COUNT` same-size blocks that XOR to original content.
#[derive(Debug, Clone)]
pub struct TupleStripe {
    blocks: Vec<Block>,
}

impl TupleStripe {
    pub fn new(blocks: Vec<Block>) -> Result<Self, BlockError> {
        if blocks.len() != TUPLE_COUNT {
            return Err(BlockError::WrongStripeCount {
                expected: TUPLE_COUNT,
                actual: blocks.len(),
            });
        }
        let size = blocks[0].block_size();
        if blocks.iter().any(|b| b.block_size() != size) {
            return Err(BlockError::MixedStripeSizes);
        }
        Ok(Self { blocks })
    }

    /// Build from the primary block and its randomizers.
    pub fn from_parts(primary: Block, randomizers: Vec<Block>) -> Result<Self, BlockError> {
        let mut blocks = Vec::with_capacity(TUPLE_COUNT);
        blocks.push(primary);
        blocks.extend(randomizers);
        Self::new(blocks)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block_size(&self) -> crate::BlockSize {
        self.blocks[0].block_size()
    }

    /// XOR every member together, reproducing the original bytes exactly.
    pub fn consolidate(&self) -> Vec<u8> {
        let mut acc = self.blocks[0].bytes().to_vec();
        for block in &self.blocks[1..] {
            xor_into(&mut acc, block.bytes());
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{random_bytes, StorageContract};
    use crate::{BlockKind, BlockSize};

    fn block(bytes: Vec<u8>) -> Block {
        Block::new(
            BlockKind::Randomizer,
            BlockSize::Micro,
            bytes,
            StorageContract::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_stripe_requires_tuple_count() {
        let blocks: Vec<Block> = (0..3).map(|_| block(random_bytes(64))).collect();
        assert!(matches!(
            TupleStripe::new(blocks),
            Err(BlockError::WrongStripeCount { .. })
        ));
    }

    #[test]
    fn test_consolidate_is_xor_inverse() {
        let original = random_bytes(64);
        let randomizers: Vec<Block> =
            (0..TUPLE_COUNT - 1).map(|_| block(random_bytes(64))).collect();

        let mut brightened = original.clone();
        for r in &randomizers {
            xor_into(&mut brightened, r.bytes());
        }

        let stripe = TupleStripe::from_parts(block(brightened), randomizers).unwrap();
        assert_eq!(stripe.consolidate(), original);
    }

    #[test]
    fn test_mixed_sizes_rejected() {
        let mut blocks: Vec<Block> = (0..TUPLE_COUNT - 1).map(|_| block(random_bytes(64))).collect();
        blocks.push(
            Block::new(
                BlockKind::Randomizer,
                BlockSize::Message,
                random_bytes(512),
                StorageContract::default(),
            )
            .unwrap(),
        );
        assert!(matches!(
            TupleStripe::new(blocks),
            Err(BlockError::MixedStripeSizes)
        ));
    }
}
