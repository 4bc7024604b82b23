/**
 * @file /processor/exec.rs
 * @date 18/10/2026
 * @brief Instruction execution unit
 */
use super::fault::Fault;
use super::instruction::{Instruction, Operand};
use super::registers::{Flags, Register, Registers};
use super::ProcessorContext;
use crate::common::{ProcessId, STACK_ENTRIES};
use crate::input::{InputKind, InputRequest};
use crate::interrupts::{InterruptCode, InterruptMessage};
use crate::process::{Process, ProcessRef, ProcessState};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Operation selected by `AX` for `INT _21H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub(super) enum FileOperation {
    Create = 0,
    Open = 1,
    Read = 2,
    Write = 3,
    Close = 4,
}

/// What the core should do with its process after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Effect {
    Continue,
    /// The process is waiting on console input and must leave the core.
    Block,
}

pub(super) struct ExecContext<'a, 'b> {
    pub core_id: usize,
    pub registers: &'a mut Registers,
    pub flags: &'a mut Flags,
    pub process: &'a mut Process,
    pub handle: &'a ProcessRef,
    pub ctx: &'a ProcessorContext<'b>,
}

impl ExecContext<'_, '_> {
    fn pid(&self) -> ProcessId {
        self.process.id()
    }

    fn post(&self, code: InterruptCode, message: String) {
        self.ctx.interrupts.post(InterruptMessage {
            core_id: self.core_id,
            code,
            message,
            process_id: self.pid(),
        });
    }

    fn accumulate(&mut self, value: i32) {
        let result = self.registers.read(Register::AC).wrapping_add(value);
        self.registers.write(Register::AC, result);
        self.flags.zero = result == 0;
    }

    /// Relative to the already advanced cursor.
    fn jump(&mut self, offset: i32) -> Result<(), Fault> {
        let count = self.ctx.memory.instruction_count(self.pid());
        let target = self.process.cursor as i64 + offset as i64;

        if target < 0 || target >= count as i64 {
            return Err(Fault::JumpOutOfBounds { target, count });
        }

        self.process.cursor = target as usize;
        Ok(())
    }

    fn push(&mut self, value: i32) -> Result<(), Fault> {
        let sp = self.process.pcb.stack_pointer;
        if sp >= STACK_ENTRIES {
            return Err(Fault::StackOverflow);
        }

        self.ctx.memory.write_to_stack(self.pid(), sp, value)?;
        self.process.pcb.stack_pointer = sp + 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<i32, Fault> {
        let Some(sp) = self.process.pcb.stack_pointer.checked_sub(1) else {
            return Err(Fault::StackUnderflow);
        };

        let value = self.ctx.memory.pop_from_stack(self.pid(), sp)?;
        self.process.pcb.stack_pointer = sp;
        Ok(value)
    }

    fn string_at(&self, reg: Register) -> Result<String, Fault> {
        let address = self.registers.read(reg);
        usize::try_from(address)
            .ok()
            .and_then(|address| self.ctx.memory.get_string(address))
            .ok_or(Fault::InvalidAddress(address))
    }

    fn interrupt(&mut self, code: InterruptCode) -> Result<Effect, Fault> {
        match code {
            InterruptCode::ReadString | InterruptCode::ReadNumber => {
                let (kind, prompt) = match code {
                    InterruptCode::ReadString => (InputKind::String, "Enter a string"),
                    _ => (InputKind::Number, "Enter a number (0-255)"),
                };

                self.process.set_state(ProcessState::Waiting)?;
                self.ctx.input.request_input(
                    self.pid(),
                    InputRequest {
                        kind,
                        core_id: self.core_id,
                        process: self.handle.clone(),
                    },
                );
                self.post(code, prompt.to_string());
                return Ok(Effect::Block);
            }

            InterruptCode::Print => {
                self.post(code, self.registers.read(Register::DX).to_string());
            }

            InterruptCode::Terminate => {
                self.process.set_state(ProcessState::Terminated)?;
                self.post(code, format!("Process {} terminated", self.pid()));
            }

            InterruptCode::FileManagement => self.file_management()?,
        }

        Ok(Effect::Continue)
    }

    fn file_management(&mut self) -> Result<(), Fault> {
        let code = InterruptCode::FileManagement;
        let selector = self.registers.read(Register::AX);
        let Some(operation) = FileOperation::from_i32(selector) else {
            return Err(Fault::InvalidFileOperation(selector));
        };

        let pid = self.pid();
        let name = self.string_at(Register::BX)?;

        if matches!(
            operation,
            FileOperation::Open | FileOperation::Read | FileOperation::Write
        ) {
            if let Some(owner) = self.ctx.open_files.held_by_other(&name, pid) {
                log::debug!("Process {pid}: {name} is held by process {owner}");
                self.post(
                    code,
                    format!("File {name} is already opened by process {owner}"),
                );
                return Ok(());
            }
        }

        let memory = self.ctx.memory;
        match operation {
            FileOperation::Create => match memory.store_file(&name, "") {
                Ok(()) => self.post(code, format!("File {name} created")),
                Err(why) => self.post(code, format!("Cannot create {name}: {why}")),
            },

            FileOperation::Open => {
                if memory.get_file(&name).is_none() {
                    self.post(code, format!("File {name} not found"));
                } else if self.ctx.open_files.open(&name, pid) {
                    self.process.pcb.open_files.insert(name.clone());
                    self.post(code, format!("File {name} opened"));
                } else {
                    self.post(code, format!("File {name} is already opened"));
                }
            }

            FileOperation::Read => match memory.get_file(&name) {
                Some(content) => {
                    let address = memory.store_string(&content)?;
                    self.process.pcb.interned_strings.insert(address);
                    self.registers.write(Register::DX, address as i32);
                    self.post(code, content);
                }
                None => self.post(code, format!("File {name} not found")),
            },

            FileOperation::Write => {
                let content = self.string_at(Register::CX)?;
                match memory.write_file(&name, &content) {
                    Ok(()) => self.post(code, format!("Wrote {} bytes to {name}", content.len())),
                    Err(why) => self.post(code, format!("Cannot write {name}: {why}")),
                }
            }

            FileOperation::Close => {
                self.ctx.open_files.close(&name, pid);
                self.process.pcb.open_files.remove(&name);
                self.post(code, format!("File {name} closed"));
            }
        }

        Ok(())
    }
}

pub(super) fn exec_instruction(
    instruction: &Instruction,
    ctx: &mut ExecContext,
) -> Result<Effect, Fault> {
    match instruction {
        Instruction::Mov(dst, src) => {
            let value = match *src {
                Operand::Register(reg) => ctx.registers.read(reg),
                Operand::Immediate(value) => value,
            };
            ctx.registers.write(*dst, value);
        }

        Instruction::Load(reg) => {
            let value = ctx.registers.read(*reg);
            ctx.registers.write(Register::AC, value);
        }

        Instruction::Store(reg) => {
            let value = ctx.registers.read(Register::AC);
            ctx.registers.write(*reg, value);
        }

        Instruction::Add(reg) => {
            let value = ctx.registers.read(*reg);
            ctx.accumulate(value);
        }

        Instruction::Sub(reg) => {
            let value = ctx.registers.read(*reg);
            ctx.accumulate(value.wrapping_neg());
        }

        Instruction::Inc(reg) => {
            let value = reg.map_or(1, |reg| ctx.registers.read(reg));
            ctx.accumulate(value);
        }

        Instruction::Dec(reg) => {
            let value = reg.map_or(1, |reg| ctx.registers.read(reg));
            ctx.accumulate(value.wrapping_neg());
        }

        Instruction::Swap(a, b) => {
            let (va, vb) = (ctx.registers.read(*a), ctx.registers.read(*b));
            ctx.registers.write(*a, vb);
            ctx.registers.write(*b, va);
        }

        Instruction::Cmp(a, b) => {
            ctx.flags.zero = ctx.registers.read(*a) == ctx.registers.read(*b);
        }

        Instruction::Je(offset) => {
            if ctx.flags.zero {
                ctx.jump(*offset)?;
            }
        }

        Instruction::Jne(offset) => {
            if !ctx.flags.zero {
                ctx.jump(*offset)?;
            }
        }

        Instruction::Jmp(offset) => ctx.jump(*offset)?,

        // the operand is checked at decode time, the pushed value is always AX
        Instruction::Push(_) => {
            let value = ctx.registers.read(Register::AX);
            ctx.push(value)?;
        }

        Instruction::Pop(reg) => {
            let value = ctx.pop()?;
            ctx.registers.write(*reg, value);
        }

        Instruction::Param(values) => {
            if ctx.process.pcb.stack_pointer + values.len() > STACK_ENTRIES {
                return Err(Fault::StackOverflow);
            }

            for &value in values {
                ctx.push(value)?;
            }
        }

        Instruction::Int(code) => return ctx.interrupt(*code),
    }

    Ok(Effect::Continue)
}
