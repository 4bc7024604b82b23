/**
 * @file lib.rs
 * @date 18/10/2026
 * @brief Multi-core teaching computer simulator library
 */
pub mod allocation;
pub mod common;
pub mod config;
pub mod error;
pub mod input;
pub mod inspector;
pub mod interrupts;
pub mod machine;
pub mod memory;
pub mod memory_manager;
pub mod process;
pub mod processor;
pub mod scheduler;

pub use common::ProcessId;
pub use config::{ConfigError, MemoryConfig, MemoryLayout};
pub use error::Error as SimulatorError;
pub use input::{InputCompletion, InputKind, UserInputHandler};
pub use inspector::{InspectionEvent, Inspector, InspectorRef};
pub use interrupts::{InterruptCode, InterruptMessage, InterruptQueue};
pub use machine::Machine;
pub use memory_manager::{MemoryError, MemoryManager};
pub use process::{Pcb, Process, ProcessRef, ProcessState};
pub use processor::{Cpu, Fault, Flags, Register, Registers, StepOutcome};
pub use scheduler::Scheduler;
pub type Result<T> = core::result::Result<T, SimulatorError>;
