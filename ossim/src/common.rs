//! Common types and constants used in the library.

pub const KB: usize = 1 << 10;

/// Size in bytes of the interned string arena at the top of main memory.
pub const STRING_ARENA_SIZE: usize = KB;

/// Number of slots in a process stack.
pub const STACK_ENTRIES: usize = 5;
/// Width in bytes of one stack slot.
pub const STACK_ENTRY_SIZE: usize = 4;
pub const STACK_SIZE: usize = STACK_ENTRIES * STACK_ENTRY_SIZE;

/// Number of cores a default machine is built with.
pub const DEFAULT_CORES: usize = 2;

pub type ProcessId = u32;

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
