//! Pending console input requests.
//!
//! `_08H`/`_09H` register a request keyed by process id and return at once.
//! The console later calls [`UserInputHandler::provide_input`], which removes
//! the request and sends the completion down a channel that the machine
//! drains on its next tick to resume the waiting process.

use crate::common::ProcessId;
use crate::process::ProcessRef;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Process {0} is not waiting for input")]
    NoPendingRequest(ProcessId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Any text, interned and handed back through `BX`
    String,
    /// A number in 0..=255, handed back through `DX`
    Number,
}

pub struct InputRequest {
    pub kind: InputKind,
    pub core_id: usize,
    pub process: ProcessRef,
}

pub struct InputCompletion {
    pub request: InputRequest,
    pub text: String,
}

pub struct UserInputHandler {
    pending: Mutex<HashMap<ProcessId, InputRequest>>,
    sender: Sender<InputCompletion>,
    receiver: Receiver<InputCompletion>,
}

impl Default for UserInputHandler {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            pending: Mutex::default(),
            sender,
            receiver,
        }
    }
}

impl UserInputHandler {
    pub fn request_input(&self, pid: ProcessId, request: InputRequest) {
        let mut pending = self.pending.lock();
        if pending.insert(pid, request).is_some() {
            log::warn!("Process {pid}: replaced an outstanding input request");
        }
    }

    pub fn provide_input(&self, pid: ProcessId, text: &str) -> Result<(), InputError> {
        let request = self
            .pending
            .lock()
            .remove(&pid)
            .ok_or(InputError::NoPendingRequest(pid))?;

        log::debug!("Process {pid}: input provided ({:?})", request.kind);
        let _ = self.sender.send(InputCompletion {
            request,
            text: text.to_string(),
        });

        Ok(())
    }

    pub fn pending_kind(&self, pid: ProcessId) -> Option<InputKind> {
        self.pending.lock().get(&pid).map(|r| r.kind)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Completions delivered since the last call, in arrival order.
    pub fn take_completions(&self) -> Vec<InputCompletion> {
        self.receiver.try_iter().collect()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
        while self.receiver.try_recv().is_ok() {}
    }
}
