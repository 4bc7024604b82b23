use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Memory error: {0}")]
    Memory(#[from] crate::memory_manager::MemoryError),

    #[error("Process error: {0}")]
    Process(#[from] crate::process::ProcessError),

    #[error("Input error: {0}")]
    Input(#[from] crate::input::InputError),

    #[error("Invalid core: {0}")]
    InvalidCore(usize),

    #[error("Unknown process: {0}")]
    UnknownProcess(crate::common::ProcessId),

    #[error("Empty program")]
    EmptyProgram,
}
