//! Read-only structural snapshot of the simulated storage.

use crate::allocation::{MemoryAllocation, StackAllocation};
use crate::common::ProcessId;
use crate::config::MemoryLayout;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessRegion {
    pub owner: ProcessId,
    pub allocation: MemoryAllocation,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackRegion {
    pub owner: ProcessId,
    pub allocation: StackAllocation,
    pub values: Vec<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BcpRegion {
    pub owner: ProcessId,
    pub start: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StringRegion {
    pub address: usize,
    pub size: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRegion {
    pub name: String,
    pub start: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryMap {
    pub layout: MemoryLayout,
    pub processes: Vec<ProcessRegion>,
    pub stacks: Vec<StackRegion>,
    pub bcps: Vec<BcpRegion>,
    pub strings: Vec<StringRegion>,
    pub files: Vec<FileRegion>,
    pub free_blocks: Vec<MemoryAllocation>,
}

/// Byte accounting across every storage domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub user_space: usize,
    pub user_free: usize,
    pub user_allocated: usize,
    pub largest_free_block: usize,
    pub string_arena_free: usize,
    pub bcp_bytes: usize,
    pub secondary_used: usize,
    pub secondary_size: usize,
}
