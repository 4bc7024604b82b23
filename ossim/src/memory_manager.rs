/**
 * @file memory_manager.rs
 * @date 18/10/2026
 * @brief Owner of every simulated byte and of all allocation bookkeeping
 *
 * Main memory is split into kernel, OS, user space and the string arena.
 * User space and the string arena use a first-fit free list, the OS region
 * (serialized PCBs) and secondary storage (files) use a byte-scanning
 * allocator that treats runs of zero bytes as free.
 */
mod map;
pub mod stack;

use crate::allocation::{FreeList, MemoryAllocation, StackAllocation, StringAllocation};
use crate::common::{ProcessId, STACK_ENTRIES, STACK_ENTRY_SIZE, STACK_SIZE};
use crate::config::{ConfigError, MemoryConfig, MemoryLayout};
use crate::memory::{Memory, MemoryOutOfBoundsError};
use crate::process::Pcb;
pub use map::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("Out of memory in {region}: {requested} bytes requested")]
    OutOfMemory {
        region: &'static str,
        requested: usize,
    },

    #[error("Allocation size must be greater than zero")]
    ZeroSize,

    #[error("Process {0} has no {1} allocation")]
    NotAllocated(ProcessId, &'static str),

    #[error("Process {0} already has a {1} allocation")]
    AlreadyAllocated(ProcessId, &'static str),

    #[error("Process {owner}: instruction needs {needed} bytes, {remaining} left")]
    InstructionOverflow {
        owner: ProcessId,
        needed: usize,
        remaining: usize,
    },

    #[error("Stack index {0} out of bounds")]
    StackIndexOutOfBounds(usize),

    #[error("No string at address {0:#X}")]
    UnknownString(usize),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("Corrupted process control block: {0}")]
    Bcp(String),

    #[error(transparent)]
    OutOfBounds(#[from] MemoryOutOfBoundsError),
}

type MemoryResult<T> = Result<T, MemoryError>;

struct ProcessImage {
    allocation: MemoryAllocation,
    instructions: Vec<Range<usize>>,
}

struct MemoryState {
    layout: MemoryLayout,
    main: Memory,
    secondary: Memory,
    user_free: FreeList,
    string_free: FreeList,
    processes: BTreeMap<ProcessId, ProcessImage>,
    stacks: BTreeMap<ProcessId, StackAllocation>,
    bcps: BTreeMap<ProcessId, MemoryAllocation>,
    strings: BTreeMap<usize, StringAllocation>,
    files: BTreeMap<String, MemoryAllocation>,
}

impl MemoryState {
    fn new(layout: MemoryLayout) -> Self {
        Self {
            main: Memory::new(layout.main_memory_size),
            secondary: Memory::new(layout.secondary_storage_size),
            user_free: FreeList::new(layout.user.clone()),
            string_free: FreeList::new(layout.strings.clone()),
            processes: BTreeMap::new(),
            stacks: BTreeMap::new(),
            bcps: BTreeMap::new(),
            strings: BTreeMap::new(),
            files: BTreeMap::new(),
            layout,
        }
    }

    fn stack(&self, owner: ProcessId, index: usize) -> MemoryResult<StackAllocation> {
        if index >= STACK_ENTRIES {
            return Err(MemoryError::StackIndexOutOfBounds(index));
        }

        self.stacks
            .get(&owner)
            .copied()
            .ok_or(MemoryError::NotAllocated(owner, "stack"))
    }

    fn read_slot(&self, stack: &StackAllocation, index: usize) -> MemoryResult<i32> {
        let address = stack.slot_address(index);
        let bytes = self.main.read_slice(address..address + STACK_ENTRY_SIZE)?;

        let mut slot = stack::Slot::default();
        slot.copy_from_slice(bytes);
        Ok(stack::decode(&slot))
    }

    fn store_bcp_bytes(&mut self, owner: ProcessId, bytes: &[u8]) -> MemoryResult<usize> {
        let occupied: Vec<Range<usize>> = self.bcps.values().map(|a| a.range()).collect();

        let Some(start) = self
            .main
            .find_zero_run(self.layout.os.clone(), bytes.len(), &occupied)
        else {
            log::warn!("No room for a {} byte BCP in OS space", bytes.len());
            return Err(MemoryError::OutOfMemory {
                region: "OS space",
                requested: bytes.len(),
            });
        };

        self.main.write_slice(start, bytes)?;
        self.bcps.insert(
            owner,
            MemoryAllocation {
                start,
                size: bytes.len(),
                used: bytes.len(),
            },
        );

        Ok(start)
    }

    fn store_file_bytes(&mut self, name: &str, bytes: &[u8]) -> MemoryResult<()> {
        if bytes.is_empty() {
            self.files.insert(name.to_string(), MemoryAllocation::default());
            return Ok(());
        }

        let occupied: Vec<Range<usize>> = self.files.values().map(|a| a.range()).collect();
        let region = 0..self.secondary.size();

        let Some(start) = self.secondary.find_zero_run(region, bytes.len(), &occupied) else {
            log::warn!("No room for file {name} ({} bytes)", bytes.len());
            return Err(MemoryError::OutOfMemory {
                region: "secondary storage",
                requested: bytes.len(),
            });
        };

        self.secondary.write_slice(start, bytes)?;
        self.files.insert(
            name.to_string(),
            MemoryAllocation {
                start,
                size: bytes.len(),
                used: bytes.len(),
            },
        );

        Ok(())
    }

    fn read_string(&self, allocation: &StringAllocation) -> Option<String> {
        let bytes = self
            .main
            .read_slice(allocation.start..allocation.start + allocation.len)
            .ok()?;

        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_file(&self, allocation: &MemoryAllocation) -> Option<String> {
        let bytes = self
            .secondary
            .read_slice(allocation.start..allocation.start + allocation.used)
            .ok()?;

        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    fn instructions(&self, image: &ProcessImage) -> Vec<String> {
        image
            .instructions
            .iter()
            .filter_map(|range| self.main.read_slice(range.clone()).ok())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }
}

/// Thread-safe front of the simulated storage.
///
/// Every operation takes the single state lock, so cores on different
/// threads and the console collaborator may call in concurrently.
pub struct MemoryManager {
    state: Mutex<MemoryState>,
}

impl MemoryManager {
    pub fn new(config: &MemoryConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_layout(config.layout()?))
    }

    pub fn with_layout(layout: MemoryLayout) -> Self {
        log::debug!("Memory layout: {:?}", layout);
        Self {
            state: Mutex::new(MemoryState::new(layout)),
        }
    }

    /// Replace the whole memory with a fresh one sized by `config`.
    /// An invalid config leaves the current state untouched.
    pub fn reinitialize(&self, config: &MemoryConfig) -> Result<(), ConfigError> {
        let layout = config.layout()?;
        log::info!("Reinitializing memory with {:?}", config);
        *self.state.lock() = MemoryState::new(layout);
        Ok(())
    }

    pub fn layout(&self) -> MemoryLayout {
        self.state.lock().layout.clone()
    }

    // ---------------------------------------------------------------------
    // Process code
    // ---------------------------------------------------------------------

    /// First-fit allocation of `size` bytes of user space for `owner`.
    pub fn allocate_memory(&self, owner: ProcessId, size: usize) -> MemoryResult<usize> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }

        let mut state = self.state.lock();
        if state.processes.contains_key(&owner) {
            return Err(MemoryError::AlreadyAllocated(owner, "memory"));
        }

        let Some(start) = state.user_free.allocate(size) else {
            log::warn!("Process {owner}: cannot allocate {size} bytes of user space");
            return Err(MemoryError::OutOfMemory {
                region: "user space",
                requested: size,
            });
        };

        log::debug!("Process {owner}: allocated {size} bytes at {start:#X}");
        state.processes.insert(
            owner,
            ProcessImage {
                allocation: MemoryAllocation::new(start, size),
                instructions: Vec::new(),
            },
        );

        Ok(start)
    }

    pub fn deallocate_memory(&self, owner: ProcessId) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let Some(image) = state.processes.remove(&owner) else {
            return Err(MemoryError::NotAllocated(owner, "memory"));
        };

        let allocation = image.allocation;
        state.main.clear(allocation.range())?;
        state.user_free.release(allocation.start, allocation.size);
        log::debug!("Process {owner}: released {} bytes", allocation.size);

        Ok(())
    }

    pub fn allocation(&self, owner: ProcessId) -> Option<MemoryAllocation> {
        self.state.lock().processes.get(&owner).map(|p| p.allocation)
    }

    /// Append an instruction right after the owner's previous ones.
    pub fn store_instruction(&self, owner: ProcessId, text: &str) -> MemoryResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(image) = state.processes.get_mut(&owner) else {
            return Err(MemoryError::NotAllocated(owner, "memory"));
        };

        let bytes = text.as_bytes();
        if bytes.len() > image.allocation.remaining() {
            return Err(MemoryError::InstructionOverflow {
                owner,
                needed: bytes.len(),
                remaining: image.allocation.remaining(),
            });
        }

        let address = image.allocation.start + image.allocation.used;
        state.main.write_slice(address, bytes)?;
        image.allocation.used += bytes.len();
        image.instructions.push(address..address + bytes.len());

        Ok(())
    }

    pub fn get_instruction(&self, owner: ProcessId, index: usize) -> Option<String> {
        let state = self.state.lock();
        let range = state.processes.get(&owner)?.instructions.get(index)?.clone();
        let bytes = state.main.read_slice(range).ok()?;

        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn instruction_count(&self, owner: ProcessId) -> usize {
        self.state
            .lock()
            .processes
            .get(&owner)
            .map_or(0, |p| p.instructions.len())
    }

    pub fn instructions(&self, owner: ProcessId) -> Vec<String> {
        let state = self.state.lock();
        state
            .processes
            .get(&owner)
            .map(|image| state.instructions(image))
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Stacks
    // ---------------------------------------------------------------------

    pub fn allocate_stack(&self, owner: ProcessId) -> MemoryResult<StackAllocation> {
        let mut state = self.state.lock();
        if state.stacks.contains_key(&owner) {
            return Err(MemoryError::AlreadyAllocated(owner, "stack"));
        }

        let Some(start) = state.user_free.allocate(STACK_SIZE) else {
            log::warn!("Process {owner}: cannot allocate a stack");
            return Err(MemoryError::OutOfMemory {
                region: "user space",
                requested: STACK_SIZE,
            });
        };

        let stack = StackAllocation {
            start,
            size: STACK_SIZE,
            entries: STACK_ENTRIES,
        };

        state.stacks.insert(owner, stack);
        Ok(stack)
    }

    pub fn deallocate_stack(&self, owner: ProcessId) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let Some(stack) = state.stacks.remove(&owner) else {
            return Err(MemoryError::NotAllocated(owner, "stack"));
        };

        state.main.clear(stack.range())?;
        state.user_free.release(stack.start, stack.size);
        Ok(())
    }

    pub fn stack_allocation(&self, owner: ProcessId) -> Option<StackAllocation> {
        self.state.lock().stacks.get(&owner).copied()
    }

    pub fn write_to_stack(&self, owner: ProcessId, index: usize, value: i32) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let stack = state.stack(owner, index)?;
        state
            .main
            .write_slice(stack.slot_address(index), &stack::encode(value))?;
        Ok(())
    }

    pub fn read_from_stack(&self, owner: ProcessId, index: usize) -> MemoryResult<i32> {
        let state = self.state.lock();
        let stack = state.stack(owner, index)?;
        state.read_slot(&stack, index)
    }

    /// Read the slot then zero it.
    pub fn pop_from_stack(&self, owner: ProcessId, index: usize) -> MemoryResult<i32> {
        let mut state = self.state.lock();
        let stack = state.stack(owner, index)?;
        let value = state.read_slot(&stack, index)?;
        state
            .main
            .write_slice(stack.slot_address(index), &stack::encode(0))?;
        Ok(value)
    }

    // ---------------------------------------------------------------------
    // Process control blocks (OS space)
    // ---------------------------------------------------------------------

    pub fn store_bcp(&self, owner: ProcessId, pcb: &Pcb) -> MemoryResult<usize> {
        let bytes = pcb.to_bytes().map_err(|e| MemoryError::Bcp(e.to_string()))?;

        let mut state = self.state.lock();
        if state.bcps.contains_key(&owner) {
            return Err(MemoryError::AlreadyAllocated(owner, "BCP"));
        }

        state.store_bcp_bytes(owner, &bytes)
    }

    pub fn get_bcp(&self, owner: ProcessId) -> Option<Pcb> {
        let state = self.state.lock();
        let allocation = state.bcps.get(&owner)?;
        let bytes = state
            .main
            .read_slice(allocation.start..allocation.start + allocation.used)
            .ok()?;

        match Pcb::from_bytes(bytes) {
            Ok(pcb) => Some(pcb),
            Err(why) => {
                log::error!("Process {owner}: unreadable BCP: {why}");
                None
            }
        }
    }

    /// Rewrite the BCP in place when it fits, relocate it otherwise.
    /// Returns the (possibly new) start address.
    pub fn update_bcp(&self, owner: ProcessId, pcb: &Pcb) -> MemoryResult<usize> {
        let bytes = pcb.to_bytes().map_err(|e| MemoryError::Bcp(e.to_string()))?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(allocation) = state.bcps.get_mut(&owner) else {
            return Err(MemoryError::NotAllocated(owner, "BCP"));
        };

        if bytes.len() <= allocation.size {
            state.main.clear(allocation.range())?;
            state.main.write_slice(allocation.start, &bytes)?;
            allocation.used = bytes.len();
            return Ok(allocation.start);
        }

        let old = *allocation;
        let old_bytes = state
            .main
            .read_slice(old.start..old.start + old.used)?
            .to_vec();

        state.bcps.remove(&owner);
        state.main.clear(old.range())?;

        match state.store_bcp_bytes(owner, &bytes) {
            Ok(start) => {
                log::debug!("Process {owner}: BCP moved {:#X} -> {start:#X}", old.start);
                Ok(start)
            }
            Err(why) => {
                state.main.write_slice(old.start, &old_bytes)?;
                state.bcps.insert(owner, old);
                Err(why)
            }
        }
    }

    pub fn delete_bcp(&self, owner: ProcessId) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let Some(allocation) = state.bcps.remove(&owner) else {
            return Err(MemoryError::NotAllocated(owner, "BCP"));
        };

        state.main.clear(allocation.range())?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Interned strings
    // ---------------------------------------------------------------------

    /// Returns the absolute main-memory address of the string.
    pub fn store_string(&self, text: &str) -> MemoryResult<usize> {
        let bytes = text.as_bytes();
        let size = bytes.len().max(1);

        let mut state = self.state.lock();
        let Some(start) = state.string_free.allocate(size) else {
            log::warn!("String arena exhausted ({size} bytes requested)");
            return Err(MemoryError::OutOfMemory {
                region: "string arena",
                requested: size,
            });
        };

        state.main.write_slice(start, bytes)?;
        state.strings.insert(
            start,
            StringAllocation {
                start,
                size,
                len: bytes.len(),
            },
        );

        Ok(start)
    }

    pub fn get_string(&self, address: usize) -> Option<String> {
        let state = self.state.lock();
        let allocation = state.strings.get(&address)?;
        state.read_string(allocation)
    }

    pub fn free_string(&self, address: usize) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let Some(allocation) = state.strings.remove(&address) else {
            return Err(MemoryError::UnknownString(address));
        };

        state.main.clear(allocation.range())?;
        state.string_free.release(allocation.start, allocation.size);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Files (secondary storage)
    // ---------------------------------------------------------------------

    pub fn store_file(&self, name: &str, content: &str) -> MemoryResult<()> {
        let mut state = self.state.lock();
        if state.files.contains_key(name) {
            return Err(MemoryError::FileExists(name.to_string()));
        }

        state.store_file_bytes(name, content.as_bytes())
    }

    /// Replace the content of an existing file.
    pub fn write_file(&self, name: &str, content: &str) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let Some(old) = state.files.remove(name) else {
            return Err(MemoryError::FileNotFound(name.to_string()));
        };

        let old_bytes = state
            .secondary
            .read_slice(old.start..old.start + old.used)?
            .to_vec();
        state.secondary.clear(old.range())?;

        if let Err(why) = state.store_file_bytes(name, content.as_bytes()) {
            state.secondary.write_slice(old.start, &old_bytes)?;
            state.files.insert(name.to_string(), old);
            return Err(why);
        }

        Ok(())
    }

    pub fn get_file(&self, name: &str) -> Option<String> {
        let state = self.state.lock();
        let allocation = state.files.get(name)?;
        state.read_file(allocation)
    }

    pub fn free_file(&self, name: &str) -> MemoryResult<()> {
        let mut state = self.state.lock();
        let Some(allocation) = state.files.remove(name) else {
            return Err(MemoryError::FileNotFound(name.to_string()));
        };

        state.secondary.clear(allocation.range())?;
        Ok(())
    }

    /// Name and size of every file, never the content.
    pub fn get_file_list(&self) -> Vec<(String, usize)> {
        self.state
            .lock()
            .files
            .iter()
            .map(|(name, allocation)| (name.clone(), allocation.used))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn get_main_memory_map(&self) -> MemoryMap {
        let state = self.state.lock();

        let processes = state
            .processes
            .iter()
            .map(|(&owner, image)| ProcessRegion {
                owner,
                allocation: image.allocation,
                instructions: state.instructions(image),
            })
            .collect();

        let stacks = state
            .stacks
            .iter()
            .map(|(&owner, stack)| StackRegion {
                owner,
                allocation: *stack,
                values: (0..stack.entries)
                    .filter_map(|i| state.read_slot(stack, i).ok())
                    .collect(),
            })
            .collect();

        let bcps = state
            .bcps
            .iter()
            .map(|(&owner, allocation)| BcpRegion {
                owner,
                start: allocation.start,
                size: allocation.size,
            })
            .collect();

        let strings = state
            .strings
            .values()
            .map(|allocation| StringRegion {
                address: allocation.start,
                size: allocation.size,
                content: state.read_string(allocation).unwrap_or_default(),
            })
            .collect();

        let files = state
            .files
            .iter()
            .map(|(name, allocation)| FileRegion {
                name: name.clone(),
                start: allocation.start,
                size: allocation.used,
            })
            .collect();

        MemoryMap {
            layout: state.layout.clone(),
            processes,
            stacks,
            bcps,
            strings,
            files,
            free_blocks: state.user_free.blocks().to_vec(),
        }
    }

    pub fn usage(&self) -> MemoryUsage {
        let state = self.state.lock();

        let user_allocated = state
            .processes
            .values()
            .map(|p| p.allocation.size)
            .chain(state.stacks.values().map(|s| s.size))
            .sum();

        MemoryUsage {
            user_space: state.layout.user_space_size(),
            user_free: state.user_free.free_bytes(),
            user_allocated,
            largest_free_block: state.user_free.largest_block(),
            string_arena_free: state.string_free.free_bytes(),
            bcp_bytes: state.bcps.values().map(|a| a.size).sum(),
            secondary_used: state.files.values().map(|a| a.used).sum(),
            secondary_size: state.secondary.size(),
        }
    }

    pub fn free_blocks(&self) -> Vec<MemoryAllocation> {
        self.state.lock().user_free.blocks().to_vec()
    }

    pub fn string_free_blocks(&self) -> Vec<MemoryAllocation> {
        self.state.lock().string_free.blocks().to_vec()
    }
}
