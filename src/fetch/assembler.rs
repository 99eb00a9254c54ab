use std::convert::TryFrom;

use bytes::{BufMut, Bytes, BytesMut};

use crate::content::ShareMeta;
use crate::error::FetchError;

/// Upper bound for the buffer reserved up front, metadata is peer supplied.
const MAX_PREALLOC: usize = 1 << 22;

/// Concatenates the blocks of one variant in offset order.
#[derive(Debug)]
pub struct BlockAssembler {
    block_size: u32,
    /// length the finished buffer must have
    byte_length: u64,
    /// amount of blocks in the variant
    total_blocks: u32,
    /// offset of the next expected block
    next_offset: u32,
    buffer: BytesMut,
}

impl BlockAssembler {
    pub fn new(meta: &ShareMeta, block_size: u32) -> Result<Self, FetchError> {
        let total_blocks = meta.block_count(block_size).ok_or(FetchError::Oversized {
            byte_length: meta.byte_length,
            block_size,
        })?;
        let capacity = usize::try_from(meta.byte_length)
            .unwrap_or(usize::MAX)
            .min(MAX_PREALLOC);
        Ok(Self {
            block_size,
            byte_length: meta.byte_length,
            total_blocks,
            next_offset: 0,
            buffer: BytesMut::with_capacity(capacity),
        })
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Offset of the next block to request, `None` once all are in.
    pub fn next_offset(&self) -> Option<u32> {
        if self.next_offset < self.total_blocks {
            Some(self.next_offset)
        } else {
            None
        }
    }

    /// The exact length block `offset` must have.
    ///
    /// Every block is `block_size` long except the last one which carries the
    /// remainder.
    pub fn expected_len(&self, offset: u32) -> usize {
        let start = u64::from(offset) * u64::from(self.block_size);
        let remaining = self.byte_length.saturating_sub(start);
        remaining.min(u64::from(self.block_size)) as usize
    }

    /// Appends the block for the next offset, returns the blocks received so
    /// far.
    pub fn push(&mut self, offset: u32, block: Bytes) -> Result<u32, FetchError> {
        assert_eq!(
            Some(offset),
            self.next_offset(),
            "blocks must be assembled in offset order"
        );
        let expected = self.expected_len(offset);
        if block.len() != expected {
            return Err(FetchError::BlockLength {
                offset,
                expected,
                got: block.len(),
            });
        }
        self.buffer.put_slice(&block);
        self.next_offset += 1;
        Ok(self.next_offset)
    }

    pub fn is_complete(&self) -> bool {
        self.next_offset == self.total_blocks
    }

    /// The assembled content.
    pub fn finish(self) -> Result<Bytes, FetchError> {
        let got = self.buffer.len() as u64;
        if !self.is_complete() || got != self.byte_length {
            return Err(FetchError::TotalLength {
                expected: self.byte_length,
                got,
            });
        }
        Ok(self.buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_in_offset_order() {
        let meta = ShareMeta::with_length(10);
        let mut assembler = BlockAssembler::new(&meta, 4).unwrap();
        assert_eq!(assembler.total_blocks(), 3);
        assert_eq!(assembler.expected_len(0), 4);
        assert_eq!(assembler.expected_len(2), 2);

        assert_eq!(assembler.push(0, Bytes::from_static(b"abcd")).unwrap(), 1);
        assert_eq!(assembler.push(1, Bytes::from_static(b"efgh")).unwrap(), 2);
        assert!(!assembler.is_complete());
        assert_eq!(assembler.push(2, Bytes::from_static(b"ij")).unwrap(), 3);
        assert_eq!(assembler.next_offset(), None);

        assert_eq!(assembler.finish().unwrap(), Bytes::from_static(b"abcdefghij"));
    }

    #[test]
    fn rejects_short_blocks() {
        let meta = ShareMeta::with_length(10);
        let mut assembler = BlockAssembler::new(&meta, 4).unwrap();
        match assembler.push(0, Bytes::from_static(b"abc")) {
            Err(FetchError::BlockLength {
                offset: 0,
                expected: 4,
                got: 3,
            }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn incomplete_buffer_is_not_finished() {
        let meta = ShareMeta::with_length(8);
        let mut assembler = BlockAssembler::new(&meta, 4).unwrap();
        assembler.push(0, Bytes::from_static(b"abcd")).unwrap();
        assert!(assembler.finish().is_err());
    }

    #[test]
    #[should_panic]
    fn out_of_order_block_panics() {
        let meta = ShareMeta::with_length(8);
        let mut assembler = BlockAssembler::new(&meta, 4).unwrap();
        let _ = assembler.push(1, Bytes::from_static(b"efgh"));
    }

    #[test]
    fn zero_block_size_is_oversized() {
        assert!(BlockAssembler::new(&ShareMeta::with_length(8), 0).is_err());
    }
}
