mod core;
mod exec;
pub mod fault;
pub mod instruction;
pub mod registers;

use crate::error::Error;
use crate::input::{InputCompletion, InputKind, UserInputHandler};
use crate::inspector::{InspectionEvent, InspectorRef};
use crate::interrupts::{InterruptCode, InterruptMessage, InterruptQueue};
use crate::memory_manager::MemoryManager;
use crate::process::{OpenFileTable, ProcessRef, ProcessState};
pub use self::core::{Core, StepOutcome};
pub use fault::Fault;
pub use instruction::{DecodeError, Instruction, Operand};
pub use registers::{Flags, Register, Registers};
use std::sync::Arc;

/// Shared collaborators a core needs while executing.
pub struct ProcessorContext<'a> {
    pub memory: &'a MemoryManager,
    pub interrupts: &'a InterruptQueue,
    pub input: &'a UserInputHandler,
    pub open_files: &'a OpenFileTable,
    pub inspector: &'a InspectorRef,
}

macro_rules! context {
    ($cpu:expr) => {
        ProcessorContext {
            memory: &$cpu.memory,
            interrupts: &$cpu.interrupts,
            input: &$cpu.input,
            open_files: &$cpu.open_files,
            inspector: &$cpu.inspector,
        }
    };
}

pub struct Cpu {
    cores: Vec<Core>,
    memory: Arc<MemoryManager>,
    interrupts: Arc<InterruptQueue>,
    input: Arc<UserInputHandler>,
    open_files: Arc<OpenFileTable>,
    inspector: InspectorRef,
}

impl Cpu {
    pub fn new(
        core_count: usize,
        memory: Arc<MemoryManager>,
        interrupts: Arc<InterruptQueue>,
        input: Arc<UserInputHandler>,
        open_files: Arc<OpenFileTable>,
    ) -> Self {
        Self {
            cores: (0..core_count).map(Core::new).collect(),
            memory,
            interrupts,
            input,
            open_files,
            inspector: InspectorRef::default(),
        }
    }

    pub fn set_inspector(&mut self, inspector: InspectorRef) {
        self.inspector = inspector;
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn idle_cores(&self) -> impl Iterator<Item = usize> + '_ {
        self.cores.iter().filter(|c| c.is_idle()).map(Core::id)
    }

    fn core(&self, core: usize) -> Result<&Core, Error> {
        self.cores.get(core).ok_or(Error::InvalidCore(core))
    }

    pub fn bound_process(&self, core: usize) -> Option<ProcessRef> {
        self.cores.get(core)?.process().cloned()
    }

    pub fn get_registers(&self, core: usize) -> Result<Registers, Error> {
        self.core(core).map(|c| *c.registers())
    }

    pub fn flags(&self, core: usize) -> Result<Flags, Error> {
        self.core(core).map(|c| *c.flags())
    }

    /// Bind `process` to an idle core and mark it running.
    pub fn bind(&mut self, core: usize, process: ProcessRef) -> Result<(), Error> {
        let Some(target) = self.cores.get_mut(core) else {
            return Err(Error::InvalidCore(core));
        };

        let pid = process.lock().id();
        if let Some(current) = target.process() {
            return Err(crate::process::ProcessError::AlreadyBound {
                pid: current.lock().id(),
                core,
            }
            .into());
        }

        target.bind(process)?;
        self.inspector.raise(InspectionEvent::ProcessBound { core, pid });
        Ok(())
    }

    pub fn execute_instruction(&mut self, core: usize) -> Result<StepOutcome, Error> {
        let ctx = context!(self);
        let Some(target) = self.cores.get_mut(core) else {
            return Err(Error::InvalidCore(core));
        };

        Ok(target.tick(&ctx))
    }

    /// Step every core once, in core order.
    pub fn step_all(&mut self) -> Vec<StepOutcome> {
        let ctx = context!(self);
        self.cores.iter_mut().map(|core| core.tick(&ctx)).collect()
    }

    /// Step every bound core once, each on its own thread.
    pub fn step_all_parallel(&mut self) -> Vec<StepOutcome> {
        let ctx = context!(self);
        let ctx = &ctx;
        let cores = &mut self.cores;

        std::thread::scope(|scope| {
            let handles: Vec<_> = cores
                .iter_mut()
                .map(|core| scope.spawn(move || core.tick(ctx)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
                })
                .collect()
        })
    }

    /// Apply console input to a waiting process and make it ready again.
    pub fn complete_input(&self, completion: InputCompletion) -> ProcessRef {
        let InputCompletion { request, text } = completion;
        let mut process = request.process.lock();
        let pid = process.id();

        let error = match request.kind {
            InputKind::String => match self.memory.store_string(&text) {
                Ok(address) => {
                    process.pcb.registers[Register::BX.index()] = address as i32;
                    process.pcb.interned_strings.insert(address);
                    None
                }
                Err(why) => Some(format!("Error: cannot store input: {why}")),
            },
            InputKind::Number => match text.trim().parse::<u8>() {
                Ok(value) => {
                    process.pcb.registers[Register::DX.index()] = value as i32;
                    None
                }
                Err(_) => Some(format!("Error: {:?} is not a number in 0..=255", text.trim())),
            },
        };

        if let Some(message) = error {
            log::debug!("Process {pid}: {message}");
            self.interrupts.post(InterruptMessage {
                core_id: request.core_id,
                code: InterruptCode::Print,
                message,
                process_id: pid,
            });
        }

        if let Err(why) = process.set_state(ProcessState::Ready) {
            log::warn!("{why}");
        }
        if let Err(why) = self.memory.update_bcp(pid, &process.pcb) {
            log::warn!("Process {pid}: {why}");
        }

        drop(process);
        self.inspector.raise(InspectionEvent::InputCompleted(pid));
        request.process
    }

    /// Unbind every process and clear every register bank.
    pub fn reset(&mut self) {
        self.cores.iter_mut().for_each(Core::reset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ProcessId, STRING_ARENA_SIZE};
    use crate::config::MemoryConfig;
    use crate::input::InputRequest;
    use crate::process::Process;

    fn cpu(cores: usize) -> Cpu {
        let memory = MemoryManager::new(&MemoryConfig::default()).unwrap();
        Cpu::new(
            cores,
            Arc::new(memory),
            Arc::default(),
            Arc::default(),
            Arc::default(),
        )
    }

    fn admit(cpu: &Cpu, pid: ProcessId, program: &[&str]) -> ProcessRef {
        let size = program.iter().map(|text| text.len()).sum();
        let base = cpu.memory.allocate_memory(pid, size).unwrap();
        for text in program {
            cpu.memory.store_instruction(pid, text).unwrap();
        }
        cpu.memory.allocate_stack(pid).unwrap();

        let mut process = Process::new(pid, base, size, 1);
        process.set_state(ProcessState::Ready).unwrap();
        cpu.memory.store_bcp(pid, &process.pcb).unwrap();
        process.into_ref()
    }

    fn run(cpu: &mut Cpu, core: usize, steps: usize) {
        for _ in 0..steps {
            cpu.execute_instruction(core).unwrap();
        }
    }

    #[test]
    fn test_arithmetic() {
        let mut cpu = cpu(1);
        let process = admit(
            &cpu,
            1,
            &["MOV AX,5", "LOAD AX", "ADD AX", "SUB AX", "DEC", "INC BX", "SWAP AC,CX", "STORE DX"],
        );
        cpu.bind(0, process).unwrap();

        run(&mut cpu, 0, 3);
        assert_eq!(cpu.get_registers(0).unwrap().read(Register::AC), 10);

        run(&mut cpu, 0, 2);
        assert_eq!(cpu.get_registers(0).unwrap().read(Register::AC), 4);
        assert!(!cpu.flags(0).unwrap().zero);

        run(&mut cpu, 0, 3);
        let registers = cpu.get_registers(0).unwrap();
        assert_eq!(registers.read(Register::AC), 0);
        assert_eq!(registers.read(Register::CX), 4);
        assert_eq!(registers.read(Register::DX), 0);
    }

    #[test]
    fn test_zero_flag() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 1, &["MOV AX,1", "LOAD AX", "DEC", "CMP AX,BX"]);
        cpu.bind(0, process).unwrap();

        run(&mut cpu, 0, 3);
        assert!(cpu.flags(0).unwrap().zero);
        run(&mut cpu, 0, 1);
        assert!(!cpu.flags(0).unwrap().zero);
    }

    #[test]
    fn test_context_save() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 7, &["MOV CX,42", "INC"]);
        cpu.bind(0, process.clone()).unwrap();
        run(&mut cpu, 0, 2);

        let pcb = cpu.memory.get_bcp(7).unwrap();
        assert_eq!(pcb.program_counter, 2);
        assert_eq!(pcb.registers, [1, 0, 0, 42, 0]);
        assert_eq!(pcb.state, ProcessState::Running);
        assert_eq!(process.lock().cursor, 2);
    }

    #[test]
    fn test_exhaustion_tears_down() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 3, &["MOV AX,1"]);
        cpu.bind(0, process.clone()).unwrap();

        assert!(matches!(cpu.execute_instruction(0).unwrap(), StepOutcome::Executed));
        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Terminated(_)
        ));

        assert_eq!(process.lock().state(), ProcessState::Terminated);
        assert!(cpu.memory.allocation(3).is_none());
        assert!(cpu.memory.stack_allocation(3).is_none());
        assert!(cpu.memory.get_bcp(3).is_none());
        assert!(cpu.cores()[0].is_idle());
        assert!(cpu.execute_instruction(0).unwrap().is_idle());
    }

    #[test]
    fn test_jump_bounds() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 1, &["MOV AX,1", "JMP -2"]);
        cpu.bind(0, process.clone()).unwrap();
        run(&mut cpu, 0, 2);
        assert_eq!(process.lock().cursor, 0);

        let process = admit(&cpu, 2, &["JMP 0", "JMP -3"]);
        cpu.reset();
        cpu.bind(0, process.clone()).unwrap();
        run(&mut cpu, 0, 1);
        assert_eq!(process.lock().cursor, 1);

        let outcome = cpu.execute_instruction(0).unwrap();
        assert!(matches!(
            outcome,
            StepOutcome::Faulted {
                fault: Fault::JumpOutOfBounds { target: -1, count: 2 },
                ..
            }
        ));
        assert_eq!(process.lock().state(), ProcessState::Terminated);
        assert!(cpu.memory.allocation(2).is_none());

        let message = cpu.interrupts.try_take_message().unwrap();
        assert_eq!(message.code, InterruptCode::Print);
        assert_eq!(message.process_id, 2);
        assert!(message.message.starts_with("Error:"));
    }

    #[test]
    fn test_jump_past_end() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 1, &["JMP 1", "MOV AX,1"]);
        cpu.bind(0, process).unwrap();

        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Faulted {
                fault: Fault::JumpOutOfBounds { target: 2, count: 2 },
                ..
            }
        ));
    }

    #[test]
    fn test_stack() {
        let mut cpu = cpu(1);
        let process = admit(
            &cpu,
            1,
            &["PARAM 1,-2,3", "MOV AX,-7", "PUSH BX", "POP CX", "POP DX"],
        );
        cpu.bind(0, process.clone()).unwrap();

        run(&mut cpu, 0, 3);
        assert_eq!(process.lock().pcb.stack_pointer, 4);
        assert_eq!(cpu.memory.read_from_stack(1, 3).unwrap(), -7);

        run(&mut cpu, 0, 2);
        let registers = cpu.get_registers(0).unwrap();
        assert_eq!(registers.read(Register::CX), -7);
        assert_eq!(registers.read(Register::DX), 3);
        assert_eq!(process.lock().pcb.stack_pointer, 2);
        assert_eq!(cpu.memory.read_from_stack(1, 2).unwrap(), 0);
    }

    #[test]
    fn test_stack_overflow() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 1, &["PARAM 1,2,3", "PARAM 4,5,6"]);
        cpu.bind(0, process.clone()).unwrap();

        run(&mut cpu, 0, 1);
        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Faulted {
                fault: Fault::StackOverflow,
                ..
            }
        ));
        assert_eq!(process.lock().state(), ProcessState::Terminated);
    }

    #[test]
    fn test_stack_underflow() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 1, &["POP AX"]);
        cpu.bind(0, process).unwrap();

        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Faulted {
                fault: Fault::StackUnderflow,
                ..
            }
        ));
    }

    #[test]
    fn test_decode_fault() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 1, &["MOV EX,1"]);
        cpu.bind(0, process).unwrap();

        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Faulted {
                fault: Fault::Decode(DecodeError::UnknownRegister(_)),
                ..
            }
        ));
    }

    #[test]
    fn test_print_and_terminate() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 4, &["MOV DX,-12", "INT _10H", "INT _20H", "MOV AX,1"]);
        cpu.bind(0, process.clone()).unwrap();

        run(&mut cpu, 0, 3);
        assert_eq!(process.lock().state(), ProcessState::Terminated);

        let messages = cpu.interrupts.drain();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].code, InterruptCode::Print);
        assert_eq!(messages[0].message, "-12");
        assert_eq!(messages[1].code, InterruptCode::Terminate);

        // teardown happens on the following step
        assert!(cpu.memory.allocation(4).is_some());
        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Terminated(_)
        ));
        assert!(cpu.memory.allocation(4).is_none());
        assert_eq!(cpu.get_registers(0).unwrap(), Registers::default());
    }

    #[test]
    fn test_read_string() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 5, &["INT _08H", "MOV AX,BX"]);
        cpu.bind(0, process.clone()).unwrap();

        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Blocked(_)
        ));
        assert!(cpu.cores()[0].is_idle());
        assert_eq!(process.lock().state(), ProcessState::Waiting);
        assert_eq!(cpu.input.pending_kind(5), Some(InputKind::String));
        assert_eq!(
            cpu.interrupts.try_take_message().map(|m| m.code),
            Some(InterruptCode::ReadString)
        );

        cpu.input.provide_input(5, "hello").unwrap();
        for completion in cpu.input.take_completions() {
            cpu.complete_input(completion);
        }
        assert_eq!(process.lock().state(), ProcessState::Ready);

        cpu.bind(0, process.clone()).unwrap();
        run(&mut cpu, 0, 1);
        let address = cpu.get_registers(0).unwrap().read(Register::AX);
        assert_eq!(cpu.memory.get_string(address as usize).as_deref(), Some("hello"));

        // the input string belongs to the process
        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Terminated(_)
        ));
        assert_eq!(cpu.memory.get_string(address as usize), None);
        assert_eq!(cpu.memory.usage().string_arena_free, STRING_ARENA_SIZE);
    }

    #[test]
    fn test_read_number() {
        let cpu = cpu(1);
        let process = admit(&cpu, 6, &["INT _09H"]);
        process.lock().pcb.registers[Register::DX.index()] = 9;

        let request = |process: &ProcessRef| {
            process.lock().set_state(ProcessState::Running).unwrap();
            process.lock().set_state(ProcessState::Waiting).unwrap();
            InputCompletion {
                request: InputRequest {
                    kind: InputKind::Number,
                    core_id: 0,
                    process: process.clone(),
                },
                text: String::new(),
            }
        };

        let mut completion = request(&process);
        completion.text = "300".to_string();
        cpu.complete_input(completion);
        assert_eq!(process.lock().pcb.registers[Register::DX.index()], 9);
        assert_eq!(process.lock().state(), ProcessState::Ready);
        assert!(cpu.interrupts.try_take_message().unwrap().message.starts_with("Error:"));

        let mut completion = request(&process);
        completion.text = " 255\n".to_string();
        cpu.complete_input(completion);
        assert_eq!(process.lock().pcb.registers[Register::DX.index()], 255);
        assert!(cpu.interrupts.is_empty());
    }

    #[test]
    fn test_file_management() {
        let mut cpu = cpu(1);
        let name = cpu.memory.store_string("notes").unwrap() as i32;
        let content = cpu.memory.store_string("xd").unwrap() as i32;
        let arena_free = cpu.memory.usage().string_arena_free;

        let program = [
            format!("MOV BX,{name}"),
            format!("MOV CX,{content}"),
            "MOV AX,0".to_string(),
            "INT _21H".to_string(),
            "MOV AX,1".to_string(),
            "INT _21H".to_string(),
            "MOV AX,3".to_string(),
            "INT _21H".to_string(),
            "MOV AX,2".to_string(),
            "INT _21H".to_string(),
            "MOV AX,4".to_string(),
            "INT _21H".to_string(),
        ];
        let program: Vec<&str> = program.iter().map(String::as_str).collect();
        let process = admit(&cpu, 1, &program);
        cpu.bind(0, process.clone()).unwrap();

        run(&mut cpu, 0, 6);
        assert!(process.lock().pcb.open_files.contains("notes"));
        assert_eq!(cpu.open_files.held_by_other("notes", 2), Some(1));

        run(&mut cpu, 0, 4);
        assert_eq!(cpu.memory.get_file("notes").as_deref(), Some("xd"));
        let address = cpu.get_registers(0).unwrap().read(Register::DX);
        assert_eq!(cpu.memory.get_string(address as usize).as_deref(), Some("xd"));

        run(&mut cpu, 0, 2);
        assert!(process.lock().pcb.open_files.is_empty());
        assert_eq!(cpu.open_files.held_by_other("notes", 2), None);

        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Terminated(_)
        ));
        assert_eq!(cpu.memory.get_string(address as usize), None);
        assert_eq!(cpu.memory.usage().string_arena_free, arena_free);
        assert_eq!(cpu.memory.get_string(content as usize).as_deref(), Some("xd"));

        let messages: Vec<_> = cpu.interrupts.drain().into_iter().map(|m| m.message).collect();
        assert_eq!(
            messages,
            vec![
                "File notes created",
                "File notes opened",
                "Wrote 2 bytes to notes",
                "xd",
                "File notes closed"
            ]
        );
    }

    #[test]
    fn test_file_exclusion() {
        let mut cpu = cpu(2);
        cpu.memory.store_file("f", "data").unwrap();
        let name = cpu.memory.store_string("f").unwrap() as i32;
        let content = cpu.memory.store_string("other").unwrap() as i32;

        let holder = [format!("MOV BX,{name}"), "MOV AX,1".to_string(), "INT _21H".to_string()];
        let holder: Vec<&str> = holder.iter().map(String::as_str).collect();
        let intruder = [
            format!("MOV BX,{name}"),
            format!("MOV CX,{content}"),
            "MOV AX,3".to_string(),
            "INT _21H".to_string(),
            "MOV AX,1".to_string(),
            "INT _21H".to_string(),
            "MOV DX,5".to_string(),
            "MOV AX,2".to_string(),
            "INT _21H".to_string(),
        ];
        let intruder: Vec<&str> = intruder.iter().map(String::as_str).collect();

        let a = admit(&cpu, 1, &holder);
        let b = admit(&cpu, 2, &intruder);
        cpu.bind(0, a).unwrap();
        cpu.bind(1, b.clone()).unwrap();

        run(&mut cpu, 0, 3);
        cpu.interrupts.drain();
        let arena_free = cpu.memory.usage().string_arena_free;
        run(&mut cpu, 1, 9);

        assert_eq!(cpu.memory.get_file("f").as_deref(), Some("data"));
        assert_eq!(cpu.get_registers(1).unwrap().read(Register::DX), 5);
        assert_eq!(cpu.memory.usage().string_arena_free, arena_free);
        assert!(b.lock().pcb.interned_strings.is_empty());
        assert!(b.lock().pcb.open_files.is_empty());
        assert_eq!(b.lock().state(), ProcessState::Running);

        let messages = cpu.interrupts.drain();
        assert_eq!(messages.len(), 3);
        for message in messages {
            assert_eq!(message.process_id, 2);
            assert!(message.message.contains("already opened"));
        }
    }

    #[test]
    fn test_invalid_file_operation() {
        let mut cpu = cpu(1);
        let process = admit(&cpu, 1, &["MOV AX,9", "INT _21H"]);
        cpu.bind(0, process).unwrap();

        run(&mut cpu, 0, 1);
        assert!(matches!(
            cpu.execute_instruction(0).unwrap(),
            StepOutcome::Faulted {
                fault: Fault::InvalidFileOperation(9),
                ..
            }
        ));
    }

    #[test]
    fn test_bind_errors() {
        let mut cpu = cpu(1);
        let a = admit(&cpu, 1, &["INC"]);
        let b = admit(&cpu, 2, &["INC"]);

        assert!(matches!(cpu.bind(3, a.clone()), Err(Error::InvalidCore(3))));
        cpu.bind(0, a).unwrap();
        assert!(matches!(cpu.bind(0, b), Err(Error::Process(_))));
        assert!(matches!(cpu.execute_instruction(1), Err(Error::InvalidCore(1))));
        assert_eq!(cpu.idle_cores().count(), 0);
    }

    #[test]
    fn test_step_all_parallel() {
        let mut cpu = cpu(4);
        let processes: Vec<_> = (1..=4)
            .map(|pid| admit(&cpu, pid, &["MOV AX,3", "LOAD AX", "ADD AX", "PUSH AX"]))
            .collect();
        for (core, process) in processes.iter().enumerate() {
            cpu.bind(core, process.clone()).unwrap();
        }

        for _ in 0..4 {
            let outcomes = cpu.step_all_parallel();
            assert!(outcomes.iter().all(|o| matches!(o, StepOutcome::Executed)));
        }

        for core in 0..4 {
            assert_eq!(cpu.get_registers(core).unwrap().read(Register::AC), 6);
        }
        for pid in 1..=4 {
            assert_eq!(cpu.memory.read_from_stack(pid, 0).unwrap(), 3);
        }

        let outcomes = cpu.step_all_parallel();
        assert!(outcomes.iter().all(|o| matches!(o, StepOutcome::Terminated(_))));
        assert_eq!(cpu.idle_cores().count(), 4);
    }
}
