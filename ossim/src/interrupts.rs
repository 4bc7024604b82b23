//! Software interrupt codes and the console mailbox.
//!
//! Cores post [`InterruptMessage`]s, the console collaborator takes them in
//! FIFO order. Posting never blocks.

use crate::common::ProcessId;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, Serialize)]
pub enum InterruptCode {
    ReadString = 0x08,
    ReadNumber = 0x09,
    Print = 0x10,
    Terminate = 0x20,
    FileManagement = 0x21,
}

impl InterruptCode {
    pub fn is_input(&self) -> bool {
        matches!(self, Self::ReadString | Self::ReadNumber)
    }
}

impl fmt::Display for InterruptCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "_{:02X}H", *self as u8)
    }
}

/// Parses the assembler spelling `_21H`.
impl FromStr for InterruptCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix('_')
            .and_then(|s| s.strip_suffix('H').or_else(|| s.strip_suffix('h')))
            .ok_or(())?;

        let value = u8::from_str_radix(hex, 16).map_err(|_| ())?;
        Self::from_u8(value).ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterruptMessage {
    pub core_id: usize,
    pub code: InterruptCode,
    pub message: String,
    pub process_id: ProcessId,
}

impl fmt::Display for InterruptMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[core {} | pid {} | {}] {}",
            self.core_id, self.process_id, self.code, self.message
        )
    }
}

/// Unbounded multi-producer FIFO mailbox.
pub struct InterruptQueue {
    sender: Sender<InterruptMessage>,
    receiver: Receiver<InterruptMessage>,
}

impl Default for InterruptQueue {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }
}

impl InterruptQueue {
    pub fn post(&self, message: InterruptMessage) {
        log::debug!("Interrupt posted: {message}");
        // the queue owns a receiver, so the channel cannot be disconnected
        let _ = self.sender.send(message);
    }

    /// Block until a message is available.
    pub fn take_message(&self) -> Option<InterruptMessage> {
        self.receiver.recv().ok()
    }

    pub fn take_message_timeout(&self, timeout: Duration) -> Option<InterruptMessage> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_take_message(&self) -> Option<InterruptMessage> {
        self.receiver.try_recv().ok()
    }

    /// Take every queued message without blocking.
    pub fn drain(&self) -> Vec<InterruptMessage> {
        self.receiver.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}
