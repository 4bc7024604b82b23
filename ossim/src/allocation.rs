//! Allocation descriptors and the first-fit free list shared by user space
//! and the string arena.

use serde::Serialize;
use std::ops::Range;

/// A contiguous byte range and how much of it holds live data.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryAllocation {
    pub start: usize,
    pub size: usize,
    pub used: usize,
}

impl MemoryAllocation {
    pub fn new(start: usize, size: usize) -> Self {
        Self {
            start,
            size,
            used: 0,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end()
    }

    pub fn remaining(&self) -> usize {
        self.size - self.used
    }
}

/// A process stack block: fixed number of 4-byte slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackAllocation {
    pub start: usize,
    pub size: usize,
    pub entries: usize,
}

impl StackAllocation {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }

    pub fn slot_address(&self, index: usize) -> usize {
        self.start + index * crate::common::STACK_ENTRY_SIZE
    }
}

/// An interned string inside the string arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StringAllocation {
    pub start: usize,
    pub size: usize,
    pub len: usize,
}

impl StringAllocation {
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }
}

/// Ordered list of free, non-overlapping byte ranges.
///
/// Blocks stay sorted by start address and adjacent blocks are merged on
/// every release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    blocks: Vec<MemoryAllocation>,
}

impl FreeList {
    pub fn new(region: Range<usize>) -> Self {
        let mut blocks = Vec::new();
        if !region.is_empty() {
            blocks.push(MemoryAllocation::new(region.start, region.len()));
        }

        Self { blocks }
    }

    /// First-fit: carve `size` bytes off the front of the first block large
    /// enough. Returns the start address.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }

        let index = self.blocks.iter().position(|b| b.size >= size)?;
        let block = &mut self.blocks[index];
        let start = block.start;

        if block.size == size {
            self.blocks.remove(index);
        } else {
            block.start += size;
            block.size -= size;
        }

        Some(start)
    }

    /// Return a range to the list and coalesce with its neighbours.
    pub fn release(&mut self, start: usize, size: usize) {
        if size == 0 {
            return;
        }

        let index = self.blocks.partition_point(|b| b.start < start);
        self.blocks.insert(index, MemoryAllocation::new(start, size));
        self.coalesce();
    }

    fn coalesce(&mut self) {
        let mut merged: Vec<MemoryAllocation> = Vec::with_capacity(self.blocks.len());

        for block in self.blocks.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == block.start => last.size += block.size,
                _ => merged.push(block),
            }
        }

        self.blocks = merged;
    }

    pub fn blocks(&self) -> &[MemoryAllocation] {
        &self.blocks
    }

    pub fn free_bytes(&self) -> usize {
        self.blocks.iter().map(|b| b.size).sum()
    }

    pub fn largest_block(&self) -> usize {
        self.blocks.iter().map(|b| b.size).max().unwrap_or(0)
    }
}
