//! FIFO ready/waiting queues and core assignment.

use crate::common::ProcessId;
use crate::process::{Process, ProcessError, ProcessRef, ProcessState};
use crate::processor::Cpu;
use std::collections::VecDeque;
use std::sync::Arc;

/// Decides whether a process in the waiting queue may go back to ready.
pub type ResumePredicate = Box<dyn Fn(&Process) -> bool + Send + Sync>;

pub struct Scheduler {
    ready: VecDeque<ProcessRef>,
    waiting: VecDeque<ProcessRef>,
    resume: ResumePredicate,
    context_switches: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            ready: VecDeque::new(),
            waiting: VecDeque::new(),
            // input completion already moved the process to READY
            resume: Box::new(|process| process.state() == ProcessState::Ready),
            context_switches: 0,
        }
    }
}

fn ids(queue: &VecDeque<ProcessRef>) -> Vec<ProcessId> {
    queue.iter().map(|p| p.lock().id()).collect()
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_resume_predicate<F>(&mut self, predicate: F)
    where
        F: Fn(&Process) -> bool + Send + Sync + 'static,
    {
        self.resume = Box::new(predicate);
    }

    pub fn add_process(&mut self, process: ProcessRef) -> Result<(), ProcessError> {
        process.lock().set_state(ProcessState::Ready)?;
        self.ready.push_back(process);
        Ok(())
    }

    /// Bind the head of the ready queue to every idle core. Returns the
    /// `(core, pid)` pairs that were bound. A process the core refuses is
    /// parked in the waiting queue until the resume predicate accepts it.
    pub fn schedule_next_process(&mut self, cpu: &mut Cpu) -> Vec<(usize, ProcessId)> {
        let idle: Vec<usize> = cpu.idle_cores().collect();
        let mut bound = Vec::new();

        for core in idle {
            while let Some(process) = self.ready.pop_front() {
                let pid = {
                    let process = process.lock();
                    if process.is_terminated() {
                        log::debug!("Dropping terminated process {} from ready queue", process.id());
                        continue;
                    }
                    process.id()
                };

                match cpu.bind(core, Arc::clone(&process)) {
                    Ok(()) => {
                        log::debug!("Scheduled process {pid} on core {core}");
                        self.context_switches += 1;
                        bound.push((core, pid));
                        break;
                    }
                    Err(why) => {
                        log::warn!("Cannot schedule process {pid} on core {core}: {why}");
                        self.waiting.push_back(process);
                    }
                }
            }
        }

        bound
    }

    pub fn move_to_waiting(&mut self, process: ProcessRef) -> Result<(), ProcessError> {
        process.lock().set_state(ProcessState::Waiting)?;
        self.ready.retain(|p| !Arc::ptr_eq(p, &process));
        self.waiting.push_back(process);
        Ok(())
    }

    /// Re-admit every waiting process the resume predicate accepts.
    /// Returns how many moved.
    pub fn check_waiting_processes(&mut self) -> usize {
        let mut still_waiting = VecDeque::with_capacity(self.waiting.len());
        let mut resumed = 0;

        for handle in self.waiting.drain(..) {
            let mut process = handle.lock();
            if process.is_terminated() {
                continue;
            }

            if !(self.resume)(&*process) {
                drop(process);
                still_waiting.push_back(handle);
                continue;
            }

            if let Err(why) = process.set_state(ProcessState::Ready) {
                log::warn!("{why}");
                drop(process);
                still_waiting.push_back(handle);
                continue;
            }

            drop(process);
            self.ready.push_back(handle);
            resumed += 1;
        }

        self.waiting = still_waiting;
        resumed
    }

    pub fn ready_processes(&self) -> Vec<ProcessId> {
        ids(&self.ready)
    }

    pub fn waiting_processes(&self) -> Vec<ProcessId> {
        ids(&self.waiting)
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.waiting.is_empty()
    }

    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    pub fn clear(&mut self) {
        self.ready.clear();
        self.waiting.clear();
        self.context_switches = 0;
    }
}
