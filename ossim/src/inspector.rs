use crate::common::ProcessId;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectionEvent {
    ProcessAdmitted {
        pid: ProcessId,
        base_address: usize,
        size: usize,
    },
    ProcessBound {
        core: usize,
        pid: ProcessId,
    },
    ExecutedInstruction {
        core: usize,
        pid: ProcessId,
        index: usize,
        instruction: String,
    },
    Fault {
        core: usize,
        pid: ProcessId,
        reason: String,
    },
    ProcessBlocked {
        core: usize,
        pid: ProcessId,
    },
    InputCompleted(ProcessId),
    ProcessTerminated {
        core: usize,
        pid: ProcessId,
    },
}

pub trait Inspector: Send + Sync {
    fn handle_event(&self, event: InspectionEvent);
}

#[derive(Clone)]
pub struct InspectorRef {
    inspector: Arc<dyn Inspector>,
}

impl Default for InspectorRef {
    fn default() -> Self {
        Self {
            inspector: Arc::new(DummyInspector),
        }
    }
}

impl Inspector for InspectorRef {
    fn handle_event(&self, event: InspectionEvent) {
        self.inspector.handle_event(event);
    }
}

impl InspectorRef {
    pub fn set_inspector(&mut self, inspector: Arc<dyn Inspector>) {
        self.inspector = inspector;
    }

    pub fn raise(&self, event: InspectionEvent) {
        self.inspector.handle_event(event);
    }
}

pub struct DummyInspector;

impl Inspector for DummyInspector {
    fn handle_event(&self, event: InspectionEvent) {
        match event {
            InspectionEvent::ProcessAdmitted {
                pid,
                base_address,
                size,
            } => {
                log::info!("Process {pid}: admitted at {base_address:#06x} ({size} bytes)");
            }

            InspectionEvent::ProcessBound { core, pid } => {
                log::info!("Core {core}: bound process {pid}");
            }

            InspectionEvent::ExecutedInstruction {
                core,
                pid,
                index,
                instruction,
            } => {
                log::debug!("Core {core}: process {pid} executed #{index}: {instruction}");
            }

            InspectionEvent::Fault { core, pid, reason } => {
                log::warn!("Core {core}: process {pid} faulted: {reason}");
            }

            InspectionEvent::ProcessBlocked { core, pid } => {
                log::info!("Core {core}: process {pid} waiting for input");
            }

            InspectionEvent::InputCompleted(pid) => {
                log::info!("Process {pid}: input completed");
            }

            InspectionEvent::ProcessTerminated { core, pid } => {
                log::info!("Core {core}: process {pid} terminated");
            }
        }
    }
}
