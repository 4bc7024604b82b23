use crate::common::{ProcessId, DEFAULT_CORES};
use crate::config::{ConfigError, MemoryConfig};
use crate::inspector::{InspectionEvent, Inspector, InspectorRef};
use crate::input::UserInputHandler;
use crate::interrupts::InterruptQueue;
use crate::memory_manager::{MemoryError, MemoryManager};
use crate::process::{OpenFileTable, Process, ProcessRef};
use crate::processor::{Cpu, Registers, StepOutcome};
use crate::scheduler::Scheduler;
use crate::{Result, SimulatorError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The whole simulated computer: shared memory, cores, queues and the
/// admission counter.
pub struct Machine {
    pub cpu: Cpu,
    pub scheduler: Scheduler,
    memory: Arc<MemoryManager>,
    interrupts: Arc<InterruptQueue>,
    input: Arc<UserInputHandler>,
    open_files: Arc<OpenFileTable>,
    processes: BTreeMap<ProcessId, ProcessRef>,
    config: MemoryConfig,
    next_pid: ProcessId,
    parallel: bool,
    inspector: InspectorRef,
}

impl Machine {
    pub fn new(config: &MemoryConfig, cores: usize) -> std::result::Result<Self, ConfigError> {
        let memory = Arc::new(MemoryManager::new(config)?);
        let interrupts = Arc::new(InterruptQueue::default());
        let input = Arc::new(UserInputHandler::default());
        let open_files = Arc::new(OpenFileTable::default());

        let cpu = Cpu::new(
            cores.max(1),
            Arc::clone(&memory),
            Arc::clone(&interrupts),
            Arc::clone(&input),
            Arc::clone(&open_files),
        );

        Ok(Self {
            cpu,
            scheduler: Scheduler::new(),
            memory,
            interrupts,
            input,
            open_files,
            processes: BTreeMap::new(),
            config: *config,
            next_pid: 1,
            parallel: false,
            inspector: InspectorRef::default(),
        })
    }

    pub fn with_defaults() -> std::result::Result<Self, ConfigError> {
        Self::new(&MemoryConfig::default(), DEFAULT_CORES)
    }

    pub fn set_inspector(&mut self, inspector: Arc<dyn Inspector>) {
        self.inspector.set_inspector(inspector);
        self.cpu.set_inspector(self.inspector.clone());
    }

    /// Step cores on their own threads instead of in core order.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn interrupt_queue(&self) -> &Arc<InterruptQueue> {
        &self.interrupts
    }

    pub fn input_handler(&self) -> &Arc<UserInputHandler> {
        &self.input
    }

    pub fn registers(&self, core: usize) -> Result<Registers> {
        self.cpu.get_registers(core)
    }

    pub fn process(&self, pid: ProcessId) -> Option<ProcessRef> {
        self.processes.get(&pid).cloned()
    }

    /// Live processes in admission order.
    pub fn processes(&self) -> impl Iterator<Item = &ProcessRef> {
        self.processes.values()
    }

    /// Admit a process sized to exactly fit its instructions.
    pub fn load_process(&mut self, instructions: &[&str], priority: u8) -> Result<ProcessId> {
        let size = instructions.iter().map(|text| text.len()).sum();
        self.load_process_with_size(instructions, size, priority)
    }

    /// Admit a process with an explicit code region size. A region smaller
    /// than the instructions is rejected when they are stored.
    pub fn load_process_with_size(
        &mut self,
        instructions: &[&str],
        size: usize,
        priority: u8,
    ) -> Result<ProcessId> {
        let handle = self.admit(instructions, size, priority)?;
        let pid = handle.lock().id();
        Ok(pid)
    }

    pub fn load_child_process(
        &mut self,
        parent: ProcessId,
        instructions: &[&str],
        priority: u8,
    ) -> Result<ProcessId> {
        let parent = self
            .process(parent)
            .ok_or(SimulatorError::UnknownProcess(parent))?;

        let size = instructions.iter().map(|text| text.len()).sum();
        let child = self.admit(instructions, size, priority)?;
        let pid = child.lock().id();
        Process::adopt(&parent, child);
        Ok(pid)
    }

    fn admit(&mut self, instructions: &[&str], size: usize, priority: u8) -> Result<ProcessRef> {
        if instructions.is_empty() {
            return Err(SimulatorError::EmptyProgram);
        }

        let pid = self.next_pid;
        self.next_pid += 1;

        let base = self.memory.allocate_memory(pid, size)?;
        let mut process = match self.install(pid, base, size, priority, instructions) {
            Ok(process) => process,
            Err(why) => {
                log::warn!("Process {pid}: admission failed: {why}");
                self.release(pid);
                return Err(why.into());
            }
        };

        self.inspector.raise(InspectionEvent::ProcessAdmitted {
            pid,
            base_address: base,
            size,
        });

        process.set_state(crate::process::ProcessState::Ready)?;
        if let Err(why) = self.memory.update_bcp(pid, &process.pcb) {
            log::warn!("Process {pid}: {why}");
        }

        let handle = process.into_ref();
        self.processes.insert(pid, Arc::clone(&handle));
        self.scheduler.add_process(Arc::clone(&handle))?;
        Ok(handle)
    }

    fn install(
        &self,
        pid: ProcessId,
        base: usize,
        size: usize,
        priority: u8,
        instructions: &[&str],
    ) -> std::result::Result<Process, MemoryError> {
        for text in instructions {
            self.memory.store_instruction(pid, text)?;
        }

        self.memory.allocate_stack(pid)?;
        let process = Process::new(pid, base, size, priority);
        self.memory.store_bcp(pid, &process.pcb)?;
        Ok(process)
    }

    fn release(&self, pid: ProcessId) {
        // any of these may legitimately be missing after a partial admission
        self.memory.deallocate_memory(pid).ok();
        self.memory.deallocate_stack(pid).ok();
        self.memory.delete_bcp(pid).ok();
    }

    /// Apply input completions, sweep the waiting queue and fill idle
    /// cores.
    pub fn schedule(&mut self) -> Vec<(usize, ProcessId)> {
        for completion in self.input.take_completions() {
            self.cpu.complete_input(completion);
        }

        self.scheduler.check_waiting_processes();
        self.scheduler.schedule_next_process(&mut self.cpu)
    }

    /// One machine cycle: schedule, then step every core once.
    pub fn tick(&mut self) -> Vec<StepOutcome> {
        self.schedule();

        let outcomes = if self.parallel {
            self.cpu.step_all_parallel()
        } else {
            self.cpu.step_all()
        };

        for outcome in &outcomes {
            match outcome {
                StepOutcome::Blocked(process) => {
                    if let Err(why) = self.scheduler.move_to_waiting(Arc::clone(process)) {
                        log::warn!("{why}");
                    }
                }
                StepOutcome::Terminated(process) | StepOutcome::Faulted { process, .. } => {
                    let pid = process.lock().id();
                    self.processes.remove(&pid);
                }
                StepOutcome::Idle | StepOutcome::Executed => {}
            }
        }

        outcomes
    }

    /// Nothing bound, nothing queued, nobody waiting for input.
    pub fn is_idle(&self) -> bool {
        self.cpu.idle_cores().count() == self.cpu.core_count()
            && self.scheduler.is_empty()
            && !self.input.has_pending()
    }

    /// Every remaining process is parked on an unanswered input request.
    pub fn awaiting_input(&self) -> bool {
        self.input.has_pending()
            && self.scheduler.ready_len() == 0
            && self.cpu.idle_cores().count() == self.cpu.core_count()
    }

    /// Tick until idle, blocked on input, or `max_ticks` elapsed. Returns
    /// the number of ticks run.
    pub fn run_until_idle(&mut self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && !self.is_idle() && !self.awaiting_input() {
            self.tick();
            ticks += 1;
        }

        ticks
    }

    pub fn provide_input(&self, pid: ProcessId, text: &str) -> Result<()> {
        self.input.provide_input(pid, text)?;
        Ok(())
    }

    /// Validate `config`, then drop every process and rebuild memory.
    /// An invalid config leaves the machine untouched.
    pub fn reconfigure(&mut self, config: &MemoryConfig) -> Result<()> {
        config.layout()?;

        self.cpu.reset();
        self.scheduler.clear();
        self.input.clear();
        self.open_files.clear();
        self.interrupts.drain();
        self.processes.clear();
        self.memory.reinitialize(config)?;
        self.config = *config;

        log::info!("Machine reconfigured: {config:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::STACK_SIZE;
    use crate::inspector::tests::RecordingInspector;
    use crate::interrupts::InterruptCode;
    use crate::process::ProcessState;
    use crate::processor::Register;

    const LOOPING: [&str; 9] = [
        "MOV AX,555",
        "MOV BX,999",
        "CMP BX,AX",
        "JNE 3",
        "MOV AX,0",
        "STORE BX",
        "INC",
        "INC",
        "JMP -1",
    ];

    const TERMINATING: [&str; 8] = [
        "MOV AX,10",
        "MOV BX,10",
        "CMP AX,BX",
        "JNE 3",
        "MOV CX,666",
        "MOV DX,666",
        "INC",
        "INT _20H",
    ];

    fn machine() -> Machine {
        Machine::with_defaults().unwrap()
    }

    #[test]
    fn test_two_process_scenario() {
        let mut machine = machine();
        let first = machine.load_process(&LOOPING, 1).unwrap();
        let second = machine.load_process(&TERMINATING, 1).unwrap();
        assert_eq!((first, second), (1, 2));

        assert_eq!(machine.schedule(), vec![(0, 1), (1, 2)]);
        let process = machine.process(2).unwrap();

        let mut steps = 0;
        loop {
            steps += 1;
            match machine.cpu.execute_instruction(1).unwrap() {
                StepOutcome::Executed => continue,
                StepOutcome::Terminated(_) => break,
                _ => panic!("unexpected outcome"),
            }
        }
        assert_eq!(steps, TERMINATING.len() + 1);

        let process = process.lock();
        assert_eq!(process.state(), ProcessState::Terminated);
        assert_eq!(process.pcb.registers[Register::CX.index()], 666);
        assert_eq!(process.pcb.registers[Register::DX.index()], 666);
        assert_eq!(process.pcb.program_counter, TERMINATING.len() as u32);

        let memory = machine.memory();
        assert!(memory.allocation(2).is_none());
        assert!(memory.stack_allocation(2).is_none());
        assert!(memory.get_bcp(2).is_none());

        let looping = memory.allocation(1).unwrap();
        assert_eq!(memory.usage().user_allocated, looping.size + STACK_SIZE);
        assert!(machine.cpu.cores()[1].is_idle());

        let messages = machine.interrupt_queue().drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].code, InterruptCode::Terminate);
    }

    #[test]
    fn test_looping_process_keeps_running() {
        let mut machine = machine();
        machine.load_process(&LOOPING, 1).unwrap();

        for _ in 0..20 {
            machine.tick();
        }

        let registers = machine.registers(0).unwrap();
        assert_eq!(registers.read(Register::AX), 555);
        assert_eq!(registers.read(Register::AC), 1);
        assert_eq!(machine.process(1).unwrap().lock().cursor, 8);
        assert!(!machine.is_idle());
    }

    #[test]
    fn test_run_until_idle() {
        let mut machine = machine();
        machine.load_process(&TERMINATING, 1).unwrap();
        machine.load_process(&["MOV DX,7", "INT _10H"], 2).unwrap();
        machine.load_process(&["INC"], 3).unwrap();

        let ticks = machine.run_until_idle(100);
        assert!(ticks < 100);
        assert!(machine.is_idle());
        assert_eq!(machine.processes().count(), 0);

        let usage = machine.memory().usage();
        assert_eq!(usage.user_allocated, 0);
        assert_eq!(usage.user_free, usage.user_space);
        assert_eq!(usage.bcp_bytes, 0);
        assert_eq!(machine.memory().free_blocks().len(), 1);

        let printed: Vec<_> = machine
            .interrupt_queue()
            .drain()
            .into_iter()
            .filter(|m| m.code == InterruptCode::Print)
            .map(|m| m.message)
            .collect();
        assert_eq!(printed, vec!["7"]);
    }

    #[test]
    fn test_input_round_trip() {
        let mut machine = machine();
        let pid = machine
            .load_process(&["INT _09H", "MOV AX,DX", "INT _10H"], 1)
            .unwrap();

        machine.run_until_idle(10);
        assert!(machine.awaiting_input());
        assert_eq!(machine.scheduler.waiting_processes(), vec![pid]);
        assert_eq!(
            machine.process(pid).unwrap().lock().state(),
            ProcessState::Waiting
        );

        let prompt = machine.interrupt_queue().try_take_message().unwrap();
        assert_eq!(prompt.code, InterruptCode::ReadNumber);
        assert!(machine.provide_input(pid + 1, "1").is_err());
        machine.provide_input(pid, "42").unwrap();

        machine.run_until_idle(10);
        assert!(machine.is_idle());
        let output = machine.interrupt_queue().try_take_message().unwrap();
        assert_eq!(output.message, "42");
    }

    #[test]
    fn test_undersized_process_rejected() {
        let mut machine = machine();
        let before = machine.memory().usage();

        let result = machine.load_process_with_size(&["MOV AX,1", "MOV BX,2"], 10, 1);
        assert!(matches!(
            result,
            Err(SimulatorError::Memory(MemoryError::InstructionOverflow { .. }))
        ));

        assert_eq!(machine.memory().usage(), before);
        assert!(machine.scheduler.is_empty());
        assert!(matches!(
            machine.load_process(&[], 1),
            Err(SimulatorError::EmptyProgram)
        ));
    }

    #[test]
    fn test_child_process() {
        let mut machine = machine();
        let parent = machine.load_process(&LOOPING, 1).unwrap();
        let child = machine.load_child_process(parent, &["INC"], 1).unwrap();

        let handle = machine.process(parent).unwrap();
        assert_eq!(handle.lock().children().len(), 1);
        let kid = machine.process(child).unwrap();
        assert_eq!(kid.lock().parent().map(|p| p.lock().id()), Some(parent));

        assert!(matches!(
            machine.load_child_process(99, &["INC"], 1),
            Err(SimulatorError::UnknownProcess(99))
        ));
    }

    #[test]
    fn test_reconfigure() {
        let mut machine = machine();
        machine.load_process(&LOOPING, 1).unwrap();
        machine.tick();

        let broken = MemoryConfig {
            kernel_kb: 0,
            ..MemoryConfig::default()
        };
        assert!(machine.reconfigure(&broken).is_err());
        assert!(machine.memory().allocation(1).is_some());
        assert!(!machine.cpu.cores()[0].is_idle());

        let bigger = MemoryConfig {
            main_memory_kb: 32,
            ..MemoryConfig::default()
        };
        machine.reconfigure(&bigger).unwrap();
        assert!(machine.is_idle());
        assert!(machine.memory().allocation(1).is_none());
        assert_eq!(machine.memory().layout().main_memory_size, 32 * 1024);
        assert_eq!(machine.config(), &bigger);
        assert_eq!(machine.load_process(&["INC"], 1).unwrap(), 2);
    }

    #[test]
    fn test_parallel_ticks() {
        let mut machine = Machine::new(&MemoryConfig::default(), 4).unwrap();
        machine.set_parallel(true);
        for _ in 0..6 {
            machine.load_process(&TERMINATING, 1).unwrap();
        }

        machine.run_until_idle(100);
        assert!(machine.is_idle());

        let terminated = machine
            .interrupt_queue()
            .drain()
            .into_iter()
            .filter(|m| m.code == InterruptCode::Terminate)
            .count();
        assert_eq!(terminated, 6);
        assert_eq!(machine.memory().usage().user_allocated, 0);
    }

    #[test]
    fn test_inspector_events() {
        let recorder = Arc::new(RecordingInspector::default());
        let mut machine = machine();
        machine.set_inspector(recorder.clone());

        machine.load_process(&["INC"], 1).unwrap();
        machine.run_until_idle(10);

        let events = recorder.events.lock();
        assert_eq!(
            *events,
            vec![
                InspectionEvent::ProcessAdmitted {
                    pid: 1,
                    base_address: machine.memory().layout().user.start,
                    size: 3,
                },
                InspectionEvent::ProcessBound { core: 0, pid: 1 },
                InspectionEvent::ExecutedInstruction {
                    core: 0,
                    pid: 1,
                    index: 0,
                    instruction: "INC".to_string(),
                },
                InspectionEvent::ProcessTerminated { core: 0, pid: 1 },
            ]
        );
    }
}
