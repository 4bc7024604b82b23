use super::exec::{exec_instruction, Effect, ExecContext};
use super::fault::Fault;
use super::instruction::Instruction;
use super::registers::{Flags, Registers};
use super::ProcessorContext;
use crate::inspector::InspectionEvent;
use crate::interrupts::{InterruptCode, InterruptMessage};
use crate::process::{ProcessError, ProcessRef, ProcessState};

/// Result of one `tick` of a core.
pub enum StepOutcome {
    /// No process bound
    Idle,
    Executed,
    /// The process is waiting on input and has been unbound.
    Blocked(ProcessRef),
    /// The process finished and its resources were released.
    Terminated(ProcessRef),
    /// The process was killed by a fault and its resources were released.
    Faulted { process: ProcessRef, fault: Fault },
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

#[derive(Default)]
pub struct Core {
    pub(super) id: usize,
    pub(super) registers: Registers,
    pub(super) flags: Flags,
    pub(super) process: Option<ProcessRef>,
    pub instructions_executed: u64,
}

impl Core {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    pub fn process(&self) -> Option<&ProcessRef> {
        self.process.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.process.is_none()
    }

    /// Context restore: the register bank is loaded from the PCB.
    pub(super) fn bind(&mut self, handle: ProcessRef) -> Result<(), ProcessError> {
        {
            let mut process = handle.lock();
            if let Some(core) = process.bound_core {
                return Err(ProcessError::AlreadyBound {
                    pid: process.id(),
                    core,
                });
            }

            process.set_state(ProcessState::Running)?;
            process.bound_core = Some(self.id);
            self.registers = Registers::from(process.pcb.registers);
        }

        self.flags = Flags::default();
        self.process = Some(handle);
        Ok(())
    }

    fn unbind(&mut self) -> Option<ProcessRef> {
        let handle = self.process.take()?;
        handle.lock().bound_core = None;
        self.registers = Registers::default();
        self.flags = Flags::default();
        Some(handle)
    }

    /// Release everything the process owns and clear the core.
    fn teardown(&mut self, ctx: &ProcessorContext) -> Option<ProcessRef> {
        let handle = self.unbind()?;
        let (pid, strings) = {
            let mut process = handle.lock();
            if let Err(why) = process.set_state(ProcessState::Terminated) {
                log::warn!("{why}");
            }
            process.pcb.open_files.clear();
            (process.id(), std::mem::take(&mut process.pcb.interned_strings))
        };

        if let Err(why) = ctx.memory.deallocate_memory(pid) {
            log::warn!("Process {pid}: {why}");
        }
        if let Err(why) = ctx.memory.deallocate_stack(pid) {
            log::warn!("Process {pid}: {why}");
        }
        if let Err(why) = ctx.memory.delete_bcp(pid) {
            log::warn!("Process {pid}: {why}");
        }
        for address in strings {
            if let Err(why) = ctx.memory.free_string(address) {
                log::warn!("Process {pid}: {why}");
            }
        }
        ctx.open_files.release_all(pid);

        ctx.inspector.raise(InspectionEvent::ProcessTerminated { core: self.id, pid });
        Some(handle)
    }

    /// Fetch, decode and execute one instruction of the bound process.
    pub fn tick(&mut self, ctx: &ProcessorContext) -> StepOutcome {
        let Some(handle) = self.process.clone() else {
            return StepOutcome::Idle;
        };

        let mut process = handle.lock();
        let pid = process.id();
        let index = process.cursor;

        let text = match ctx.memory.get_instruction(pid, index) {
            Some(text) if !process.is_terminated() => text,
            _ => {
                log::debug!("Core {}: process {pid} finished", self.id);
                drop(process);
                return match self.teardown(ctx) {
                    Some(handle) => StepOutcome::Terminated(handle),
                    None => StepOutcome::Idle,
                };
            }
        };

        process.cursor += 1;

        let result = Instruction::decode(&text)
            .map_err(Fault::from)
            .and_then(|instruction| {
                let mut exec_ctx = ExecContext {
                    core_id: self.id,
                    registers: &mut self.registers,
                    flags: &mut self.flags,
                    process: &mut *process,
                    handle: &handle,
                    ctx,
                };
                exec_instruction(&instruction, &mut exec_ctx)
            });

        let effect = match result {
            Ok(effect) => effect,
            Err(fault) => {
                log::warn!("Core {}: process {pid} faulted at {index}: {fault}", self.id);
                ctx.interrupts.post(InterruptMessage {
                    core_id: self.id,
                    code: InterruptCode::Print,
                    message: format!("Error: {fault} ({text})"),
                    process_id: pid,
                });
                ctx.inspector.raise(InspectionEvent::Fault {
                    core: self.id,
                    pid,
                    reason: fault.to_string(),
                });

                drop(process);
                self.teardown(ctx);
                return StepOutcome::Faulted {
                    process: handle,
                    fault,
                };
            }
        };

        self.instructions_executed += 1;
        process.pcb.program_counter += 1;
        process.pcb.cpu_time_used += 1;
        process.pcb.registers = self.registers.to_array();

        if let Err(why) = ctx.memory.update_bcp(pid, &process.pcb) {
            log::warn!("Process {pid}: context save failed: {why}");
        }

        ctx.inspector.raise(InspectionEvent::ExecutedInstruction {
            core: self.id,
            pid,
            index,
            instruction: text,
        });

        drop(process);
        match effect {
            Effect::Continue => StepOutcome::Executed,
            Effect::Block => {
                ctx.inspector.raise(InspectionEvent::ProcessBlocked { core: self.id, pid });
                self.unbind();
                StepOutcome::Blocked(handle)
            }
        }
    }

    pub(super) fn reset(&mut self) {
        if let Some(handle) = self.process.take() {
            handle.lock().bound_core = None;
        }
        self.registers = Registers::default();
        self.flags = Flags::default();
        self.instructions_executed = 0;
    }
}
