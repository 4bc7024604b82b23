/**
 * @file process.rs
 * @date 18/10/2026
 * @brief Processes, process control blocks and the open-file registry
 */
use crate::common::{ProcessId, now_millis};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use thiserror::Error;

pub type ProcessRef = Arc<Mutex<Process>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("Process {pid}: illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        pid: ProcessId,
        from: ProcessState,
        to: ProcessState,
    },

    #[error("Process {pid} is already bound to core {core}")]
    AlreadyBound { pid: ProcessId, core: usize },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    #[default]
    New,
    Ready,
    Running,
    Waiting,
    Terminated,
}

impl ProcessState {
    pub fn can_transition_to(self, to: ProcessState) -> bool {
        use ProcessState::*;

        matches!(
            (self, to),
            (New, Ready)
                | (New, Terminated)
                | (Ready, Running)
                | (Running, Ready)
                | (Running, Waiting)
                | (Running, Terminated)
                | (Waiting, Ready)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pcb {
    pub process_id: ProcessId,
    pub state: ProcessState,
    pub program_counter: u32,
    /// AC, AX, BX, CX, DX
    pub registers: [i32; 5],
    pub stack_pointer: usize,
    pub open_files: BTreeSet<String>,
    /// String arena addresses owned by the process, freed on teardown
    pub interned_strings: BTreeSet<usize>,
    pub cpu_time_used: u64,
    pub start_time: u64,
    pub base_address: usize,
    pub process_size: usize,
    pub priority: u8,
}

impl Pcb {
    pub fn new(process_id: ProcessId, base_address: usize, process_size: usize, priority: u8) -> Self {
        Self {
            process_id,
            state: ProcessState::New,
            program_counter: 0,
            registers: [0; 5],
            stack_pointer: 0,
            open_files: BTreeSet::new(),
            interned_strings: BTreeSet::new(),
            cpu_time_used: 0,
            start_time: now_millis(),
            base_address,
            process_size,
            priority,
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

pub struct Process {
    pub pcb: Pcb,
    /// Index of the next instruction to fetch
    pub cursor: usize,
    pub bound_core: Option<usize>,
    parent: Option<Weak<Mutex<Process>>>,
    children: Vec<ProcessRef>,
}

impl Process {
    pub fn new(process_id: ProcessId, base_address: usize, process_size: usize, priority: u8) -> Self {
        Self {
            pcb: Pcb::new(process_id, base_address, process_size, priority),
            cursor: 0,
            bound_core: None,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn into_ref(self) -> ProcessRef {
        Arc::new(Mutex::new(self))
    }

    pub fn id(&self) -> ProcessId {
        self.pcb.process_id
    }

    pub fn state(&self) -> ProcessState {
        self.pcb.state
    }

    pub fn is_terminated(&self) -> bool {
        self.pcb.state == ProcessState::Terminated
    }

    pub fn set_state(&mut self, to: ProcessState) -> Result<(), ProcessError> {
        let from = self.pcb.state;
        if from == to {
            return Ok(());
        }

        if !from.can_transition_to(to) {
            return Err(ProcessError::IllegalTransition {
                pid: self.id(),
                from,
                to,
            });
        }

        log::debug!("Process {}: {:?} -> {:?}", self.id(), from, to);
        self.pcb.state = to;
        Ok(())
    }

    pub fn parent(&self) -> Option<ProcessRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn children(&self) -> &[ProcessRef] {
        &self.children
    }

    /// Link `child` under `parent`. The parent owns the child; the child only
    /// keeps a weak back-reference.
    pub fn adopt(parent: &ProcessRef, child: ProcessRef) {
        child.lock().parent = Some(Arc::downgrade(parent));
        parent.lock().children.push(child);
    }
}

/// Shared registry of which process holds which file open.
///
/// Mirrors every PCB open-file set so ownership can be checked without
/// locking another process.
#[derive(Default)]
pub struct OpenFileTable {
    owners: Mutex<HashMap<String, ProcessId>>,
}

impl OpenFileTable {
    /// Owner of `name` if it is not `pid`
    pub fn held_by_other(&self, name: &str, pid: ProcessId) -> Option<ProcessId> {
        self.owners.lock().get(name).copied().filter(|&owner| owner != pid)
    }

    /// Claim `name` for `pid`. Returns false if another process holds it.
    pub fn open(&self, name: &str, pid: ProcessId) -> bool {
        let mut owners = self.owners.lock();
        match owners.get(name) {
            Some(&owner) if owner != pid => false,
            _ => {
                owners.insert(name.to_string(), pid);
                true
            }
        }
    }

    pub fn close(&self, name: &str, pid: ProcessId) {
        let mut owners = self.owners.lock();
        if owners.get(name) == Some(&pid) {
            owners.remove(name);
        }
    }

    pub fn release_all(&self, pid: ProcessId) {
        self.owners.lock().retain(|_, owner| *owner != pid);
    }

    pub fn clear(&self) {
        self.owners.lock().clear();
    }
}
