use super::instruction::DecodeError;
use crate::common::STACK_ENTRIES;
use crate::memory_manager::MemoryError;
use crate::process::ProcessError;
use thiserror::Error;

/// Anything that aborts the current instruction. Faults are fatal to the
/// owning process only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Fault {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Stack overflow (depth {})", STACK_ENTRIES)]
    StackOverflow,

    #[error("Stack underflow")]
    StackUnderflow,

    #[error("Jump target {target} outside 0..{count}")]
    JumpOutOfBounds { target: i64, count: usize },

    #[error("No string at address {0}")]
    InvalidAddress(i32),

    #[error("Unknown file operation {0}")]
    InvalidFileOperation(i32),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}
