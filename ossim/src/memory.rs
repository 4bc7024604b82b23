use std::ops::{Deref, Range};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Memory access out of bounds")]
pub struct MemoryOutOfBoundsError;

type MemoryResult<T> = Result<T, MemoryOutOfBoundsError>;

/// A flat, zero-initialized byte array.
pub struct Memory {
    data: Vec<u8>,
}

impl Deref for Memory {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn check(&self, range: &Range<usize>) -> MemoryResult<()> {
        if range.start > range.end || range.end > self.data.len() {
            return Err(MemoryOutOfBoundsError);
        }

        Ok(())
    }

    pub fn read_slice(&self, range: Range<usize>) -> MemoryResult<&[u8]> {
        self.check(&range)?;
        Ok(&self.data[range])
    }

    pub fn write_slice(&mut self, address: usize, bytes: &[u8]) -> MemoryResult<()> {
        let range = address..address + bytes.len();
        self.check(&range)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Zero-fill the given range
    pub fn clear(&mut self, range: Range<usize>) -> MemoryResult<()> {
        self.check(&range)?;
        self.data[range].fill(0);
        Ok(())
    }

    /// Find the first run of `len` zero bytes inside `region`, skipping
    /// every byte that belongs to one of the `occupied` ranges.
    pub fn find_zero_run(
        &self,
        region: Range<usize>,
        len: usize,
        occupied: &[Range<usize>],
    ) -> Option<usize> {
        if len == 0 || region.end > self.data.len() {
            return None;
        }

        let mut run_start = region.start;
        let mut run_len = 0;

        for address in region {
            let taken = self.data[address] != 0 || occupied.iter().any(|r| r.contains(&address));

            if taken {
                run_len = 0;
                run_start = address + 1;
                continue;
            }

            run_len += 1;
            if run_len == len {
                return Some(run_start);
            }
        }

        None
    }
}
