//! Shared test support: a scripted backend standing in for the kernel, and
//! an in-memory output sink.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use detrun::error::{Result, TraceError};
use detrun::event::{SyscallPhase, TraceEvent};
use detrun::output::{OutputManager, OutputSink};
use detrun::tracer::arch::Registers;
use detrun::tracer::{Backend, ResumeMode};

pub fn pid(n: i32) -> Pid {
    Pid::from_raw(n)
}

// Wait-status constructors for scripting kernel behavior.

pub fn seccomp_stop(p: i32) -> WaitStatus {
    WaitStatus::PtraceEvent(pid(p), Signal::SIGTRAP, libc::PTRACE_EVENT_SECCOMP)
}

pub fn syscall_stop(p: i32) -> WaitStatus {
    WaitStatus::PtraceSyscall(pid(p))
}

pub fn fork_event(p: i32) -> WaitStatus {
    WaitStatus::PtraceEvent(pid(p), Signal::SIGTRAP, libc::PTRACE_EVENT_FORK)
}

pub fn clone_event(p: i32) -> WaitStatus {
    WaitStatus::PtraceEvent(pid(p), Signal::SIGTRAP, libc::PTRACE_EVENT_CLONE)
}

pub fn stopped(p: i32, signal: Signal) -> WaitStatus {
    WaitStatus::Stopped(pid(p), signal)
}

pub fn exited(p: i32, code: i32) -> WaitStatus {
    WaitStatus::Exited(pid(p), code)
}

pub fn signaled(p: i32, signal: Signal) -> WaitStatus {
    WaitStatus::Signaled(pid(p), signal, false)
}

/// Scripted kernel: wait statuses and event messages are popped in order,
/// every ptrace request is recorded for later assertions.
pub struct MockBackend {
    waits: VecDeque<WaitStatus>,
    event_messages: VecDeque<u64>,
    pub regs: HashMap<i32, Registers>,
    pub resumes: Arc<Mutex<Vec<(i32, ResumeMode, Option<Signal>)>>>,
    pub options_set: Arc<Mutex<Vec<i32>>>,
    pub mem_writes: Arc<Mutex<Vec<(i32, u64, Vec<u8>)>>>,
}

impl MockBackend {
    pub fn new(waits: Vec<WaitStatus>, event_messages: Vec<u64>) -> Self {
        Self {
            waits: waits.into(),
            event_messages: event_messages.into(),
            regs: HashMap::new(),
            resumes: Arc::new(Mutex::new(Vec::new())),
            options_set: Arc::new(Mutex::new(Vec::new())),
            mem_writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn pop_wait(&mut self) -> Result<WaitStatus> {
        self.waits
            .pop_front()
            .ok_or_else(|| TraceError::Protocol("wait script exhausted".into()).into())
    }
}

impl Backend for MockBackend {
    fn resume(&mut self, p: Pid, mode: ResumeMode, signal: Option<Signal>) -> Result<()> {
        self.resumes
            .lock()
            .unwrap()
            .push((p.as_raw(), mode, signal));
        Ok(())
    }

    fn wait_any(&mut self) -> Result<WaitStatus> {
        self.pop_wait()
    }

    fn wait_pid(&mut self, _p: Pid) -> Result<WaitStatus> {
        // The event source verifies the reported pid; the script just
        // supplies whatever status comes next.
        self.pop_wait()
    }

    fn registers(&mut self, p: Pid) -> Result<Registers> {
        Ok(self.regs.get(&p.as_raw()).copied().unwrap_or_default())
    }

    fn set_registers(&mut self, p: Pid, regs: &Registers) -> Result<()> {
        self.regs.insert(p.as_raw(), *regs);
        Ok(())
    }

    fn event_message(&mut self, _p: Pid) -> Result<u64> {
        self.event_messages
            .pop_front()
            .ok_or_else(|| TraceError::Protocol("event-message script exhausted".into()).into())
    }

    fn set_trace_options(&mut self, p: Pid) -> Result<()> {
        self.options_set.lock().unwrap().push(p.as_raw());
        Ok(())
    }

    fn read_memory(&mut self, _p: Pid, _addr: u64, len: usize) -> Result<Vec<u8>> {
        Ok(vec![0; len])
    }

    fn write_memory(&mut self, p: Pid, addr: u64, data: &[u8]) -> Result<usize> {
        self.mem_writes
            .lock()
            .unwrap()
            .push((p.as_raw(), addr, data.to_vec()));
        Ok(data.len())
    }
}

/// Captures the supervisor's event stream in memory.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn output_manager(&self) -> OutputManager {
        OutputManager::from_sinks(vec![Box::new(RecordingSink {
            events: self.events.clone(),
        })])
    }

    /// (syscall name, logical time) of every pre-hook, in order.
    pub fn enters(&self) -> Vec<(String, u64)> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                TraceEvent::Syscall(r) if r.phase == SyscallPhase::Enter => {
                    Some((r.syscall.clone(), r.logical_time))
                }
                _ => None,
            })
            .collect()
    }

    pub fn exit_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                matches!(e, TraceEvent::Syscall(r) if r.phase == SyscallPhase::Exit)
            })
            .count()
    }
}

struct RecordingSink {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl OutputSink for RecordingSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
