//! The supervisor: a single-threaded event loop driving every traced
//! process through pre/post syscall interception.
//!
//! The kernel filter reports each intercepted syscall as a trace stop
//! before it executes; the supervisor runs the handler's pre phase there,
//! optionally restarts the tracee in until-syscall mode to also get the
//! exit stop for the post phase, and keeps the whole process tree moving
//! one tracee at a time. Children run to completion before their parent
//! resumes, tracked by a stack of parent pids.

pub mod arch;
pub mod events;
pub mod handlers;
pub mod memory;
pub mod ptrace;
pub mod state;

pub use ptrace::{Backend, KernelBackend, ResumeMode};

use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Instant;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{fork, ForkResult, Pid};

use crate::error::{Result, TraceError};
use crate::event::{ProcessEventKind, RunSummary, SyscallPhase, TraceEvent};
use crate::filter;
use crate::output::OutputManager;
use events::{EventSource, StopEvent};
use state::Tracee;

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Pre-4.8 kernels deliver a redundant syscall-entry stop after each
    /// filter notification; captured once at startup, stored per tracee.
    pub legacy_kernel: bool,
    /// Force post-hooks even when the handler declines one, so return
    /// values of every intercepted call can be logged.
    pub force_post_hook: bool,
    /// Base value in seconds for synthesized clock readings.
    pub clock_epoch: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            legacy_kernel: false,
            force_post_hook: false,
            clock_epoch: 744_847_200,
        }
    }
}

enum ExitKind {
    Code(i32),
    Signal(Signal),
}

pub struct Supervisor<B: Backend> {
    source: EventSource<B>,
    tracees: HashMap<Pid, Tracee>,
    /// Ancestors of the currently scheduled tracee, deepest on top. Encodes
    /// the child-before-parent scheduling policy.
    parent_stack: Vec<Pid>,
    next_pid: Pid,
    current_pid: Pid,
    want_post_hook: bool,
    should_exit: bool,
    settings: Settings,
    initial_pid: Pid,
    initial_exit: Option<i32>,
    output: OutputManager,
    started: Instant,
    total_syscalls: u64,
    process_count: u64,
}

impl<B: Backend> Supervisor<B> {
    /// Take over a tracee that has just arrived at its initial stop.
    pub fn new(
        backend: B,
        first_pid: Pid,
        settings: Settings,
        output: OutputManager,
    ) -> Result<Self> {
        let mut source = EventSource::new(backend);
        source.backend().set_trace_options(first_pid)?;

        let mut tracees = HashMap::new();
        tracees.insert(
            first_pid,
            Tracee::new(first_pid, settings.legacy_kernel, settings.clock_epoch),
        );

        Ok(Self {
            source,
            tracees,
            parent_stack: Vec::new(),
            next_pid: first_pid,
            current_pid: first_pid,
            want_post_hook: false,
            should_exit: false,
            settings,
            initial_pid: first_pid,
            initial_exit: None,
            output,
            started: Instant::now(),
            total_syscalls: 0,
            process_count: 1,
        })
    }

    /// Drive the process tree to completion. Returns the exit code of the
    /// initial tracee (128 + signal number if it died from a signal).
    pub fn run(&mut self) -> Result<i32> {
        while !self.should_exit {
            let signal = self.tracee_mut(self.next_pid)?.take_pending_signal();

            let (pid, event) = self
                .source
                .next_event(self.next_pid, self.want_post_hook, signal)?;
            self.current_pid = pid;
            self.next_pid = pid;

            match event {
                StopEvent::Seccomp => self.handle_filter_notification()?,
                StopEvent::SyscallStop => self.handle_syscall_stop()?,
                StopEvent::Fork | StopEvent::Vfork => {
                    // Spawns are reconciled during the parent's pre-hook;
                    // nothing is left to do when one surfaces here.
                    log::debug!("[{pid}] spawn event outside reconciliation, ignored");
                }
                StopEvent::Clone => {
                    log::debug!("[{pid}] clone event");
                }
                StopEvent::Exec => {
                    log::info!("[{pid}] exec");
                    self.output
                        .emit(TraceEvent::process(pid.as_raw(), ProcessEventKind::Exec))?;
                }
                StopEvent::Signal(signal) => self.handle_signal(signal)?,
                StopEvent::Exited(code) => self.handle_exit(ExitKind::Code(code))?,
                StopEvent::Terminated(signal) => self.handle_exit(ExitKind::Signal(signal))?,
            }
        }

        let exit_code = self.initial_exit.unwrap_or(0);
        self.output.emit(TraceEvent::Summary(RunSummary {
            timestamp: chrono::Utc::now(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            total_syscalls: self.total_syscalls,
            process_count: self.process_count,
            exit_code,
        }))?;
        self.output.flush()?;

        Ok(exit_code)
    }

    pub fn tracee_count(&self) -> usize {
        self.tracees.len()
    }

    pub fn hierarchy_depth(&self) -> usize {
        self.parent_stack.len()
    }

    fn tracee_mut(&mut self, pid: Pid) -> Result<&mut Tracee> {
        self.tracees
            .get_mut(&pid)
            .ok_or_else(|| TraceError::Bug(format!("no state for pid {pid}")).into())
    }

    /// Pre-hook: the filter trapped a syscall before the kernel ran it.
    fn handle_filter_notification(&mut self) -> Result<()> {
        let pid = self.current_pid;
        let message = self.source.backend().event_message(pid)?;

        if message == filter::NO_RULE_SENTINEL {
            // The filter trapped a syscall it has no rule for: the filter
            // and the registry have drifted apart.
            let regs = self.source.backend().registers(pid)?;
            return Err(TraceError::UnfilteredSyscall {
                pid: pid.as_raw(),
                number: regs.syscall_number(),
            }
            .into());
        }

        let number = message as i64;
        let name = handlers::syscall_name(number);
        let mut handler = handlers::lookup(number)?;

        let (logical_time, legacy) = {
            let tracee = self.tracee_mut(pid)?;
            if tracee.current_syscall.is_some() {
                return Err(TraceError::Bug(format!(
                    "pre-hook for {name} on pid {pid} while another syscall is in flight"
                ))
                .into());
            }
            (tracee.advance_time(), tracee.legacy_kernel)
        };
        self.total_syscalls += 1;

        log::info!("[t={logical_time}][{pid}] intercepted {name} (#{number})");
        self.output.emit(TraceEvent::syscall(
            pid.as_raw(),
            &name,
            number,
            SyscallPhase::Enter,
            logical_time,
            None,
        ))?;

        let wants_post = {
            let tracee = self
                .tracees
                .get_mut(&pid)
                .ok_or_else(|| TraceError::Bug(format!("no state for pid {pid}")))?;
            handler.pre(tracee, self.source.backend())?
        };

        if handlers::is_spawn(number) {
            // The kernel's spawn event is imminent and a post-hook resume
            // would misread it; reconcile the spawn now instead.
            if legacy {
                let (entry_pid, entry) = self.source.next_event(pid, true, None)?;
                if entry_pid != pid || entry != StopEvent::SyscallStop {
                    return Err(TraceError::Protocol(format!(
                        "expected entry stop for {name} on pid {pid}, got {entry:?} on pid {entry_pid}"
                    ))
                    .into());
                }
            }
            let child = self.reconcile_spawn(pid)?;
            self.next_pid = child;
            self.want_post_hook = false;
        } else if legacy {
            // The redundant entry stop is still due; flag it for discard
            // and stay in until-syscall mode so the real exit stop arrives.
            let tracee = self.tracee_mut(pid)?;
            tracee.pending_entry_stop = true;
            tracee.current_syscall = Some(handler);
            self.want_post_hook = true;
        } else {
            let wants = wants_post || self.settings.force_post_hook;
            if wants {
                self.tracee_mut(pid)?.current_syscall = Some(handler);
            }
            self.want_post_hook = wants;
        }

        Ok(())
    }

    /// Post-hook: the kernel completed an intercepted syscall.
    fn handle_syscall_stop(&mut self) -> Result<()> {
        let pid = self.current_pid;

        {
            let tracee = self.tracee_mut(pid)?;
            if tracee.pending_entry_stop {
                // Redundant entry stop on old kernels; the pre-hook already
                // ran at the filter notification.
                tracee.pending_entry_stop = false;
                self.want_post_hook = true;
                return Ok(());
            }
        }

        let mut handler = self.tracee_mut(pid)?.current_syscall.take().ok_or_else(|| {
            TraceError::Bug(format!(
                "syscall-exit stop on pid {pid} with no syscall in flight"
            ))
        })?;

        {
            let tracee = self
                .tracees
                .get_mut(&pid)
                .ok_or_else(|| TraceError::Bug(format!("no state for pid {pid}")))?;
            handler.post(tracee, self.source.backend())?;
        }

        let regs = self.source.backend().registers(pid)?;
        let logical_time = self.tracee_mut(pid)?.logical_time();
        log::info!("[{pid}] {} returned {}", handler.name(), regs.return_value());
        self.output.emit(TraceEvent::syscall(
            pid.as_raw(),
            handler.name(),
            regs.syscall_number(),
            SyscallPhase::Exit,
            logical_time,
            Some(regs.return_value()),
        ))?;

        self.want_post_hook = false;
        Ok(())
    }

    /// Capture the child pid after a spawn pre-hook. The kernel does not
    /// serialize the parent's spawn event against the child's first stop,
    /// so both orderings must be accepted.
    fn reconcile_spawn(&mut self, parent: Pid) -> Result<Pid> {
        let (pid, event) = self.source.next_event(parent, false, None)?;

        let child = match event {
            StopEvent::Fork | StopEvent::Vfork | StopEvent::Clone => {
                // Spawn event first.
                if pid != parent {
                    return Err(TraceError::Protocol(format!(
                        "spawn event on pid {pid} while reconciling pid {parent}"
                    ))
                    .into());
                }
                let child = Pid::from_raw(self.source.backend().event_message(parent)? as i32);
                log::debug!("[{parent}] spawn event first, waiting for child {child}");
                match self.source.wait_for(child)? {
                    StopEvent::Signal(_) => {}
                    other => {
                        return Err(TraceError::Protocol(format!(
                            "expected initial stop of child {child}, got {other:?}"
                        ))
                        .into());
                    }
                }
                child
            }
            StopEvent::Signal(_) => {
                // The child's initial stop beat the parent's spawn event.
                let early = pid;
                log::debug!("[{parent}] child {early} stopped before the spawn event");
                let (event_pid, event) = self.source.wait_without_resume()?;
                if event_pid != parent
                    || !matches!(
                        event,
                        StopEvent::Fork | StopEvent::Vfork | StopEvent::Clone
                    )
                {
                    return Err(TraceError::Protocol(format!(
                        "expected spawn event on pid {parent}, got {event:?} on pid {event_pid}"
                    ))
                    .into());
                }
                let child = Pid::from_raw(self.source.backend().event_message(parent)? as i32);
                if early != child {
                    return Err(TraceError::Protocol(format!(
                        "stopped pid {early} is not the spawned child {child}"
                    ))
                    .into());
                }
                child
            }
            other => {
                return Err(TraceError::Protocol(format!(
                    "unexpected event {other:?} while reconciling spawn of pid {parent}"
                ))
                .into());
            }
        };

        // Child runs to completion before the parent continues.
        self.parent_stack.push(parent);
        self.tracees.insert(
            child,
            Tracee::new(child, self.settings.legacy_kernel, self.settings.clock_epoch),
        );
        self.source.backend().set_trace_options(child)?;
        self.process_count += 1;

        log::info!("[{parent}] spawned child {child}");
        self.output.emit(TraceEvent::process(
            parent.as_raw(),
            ProcessEventKind::Spawned {
                child_pid: child.as_raw(),
            },
        ))?;

        Ok(child)
    }

    /// A signal was intercepted before delivery: queue it for the tracee's
    /// next resume.
    fn handle_signal(&mut self, signal: Signal) -> Result<()> {
        let pid = self.current_pid;
        self.tracee_mut(pid)?.pending_signal = Some(signal);
        log::info!("[{pid}] forwarding {signal:?} on next resume");
        self.output.emit(TraceEvent::process(
            pid.as_raw(),
            ProcessEventKind::SignalForwarded {
                signal: format!("{signal:?}"),
            },
        ))?;
        Ok(())
    }

    fn handle_exit(&mut self, exit: ExitKind) -> Result<()> {
        let pid = self.current_pid;
        self.tracees
            .remove(&pid)
            .ok_or_else(|| TraceError::Bug(format!("exit event for unknown pid {pid}")))?;

        let (kind, code) = match exit {
            ExitKind::Code(code) => {
                log::info!("[{pid}] finished with code {code}");
                (ProcessEventKind::Exited { code }, code)
            }
            ExitKind::Signal(signal) => {
                log::info!("[{pid}] killed by {signal:?}");
                (
                    ProcessEventKind::Signaled {
                        signal: format!("{signal:?}"),
                    },
                    128 + signal as i32,
                )
            }
        };
        self.output
            .emit(TraceEvent::process(pid.as_raw(), kind))?;

        if pid == self.initial_pid {
            self.initial_exit = Some(code);
        }

        // A tracee killed between pre- and post-hook takes its in-flight
        // call with it; the next scheduled tracee resumes in continue mode.
        self.want_post_hook = false;

        match self.parent_stack.pop() {
            Some(parent) => self.next_pid = parent,
            None => self.should_exit = true,
        }

        Ok(())
    }
}

/// Fork the command under PTRACE_TRACEME with the trace filter installed,
/// and wait for it to arrive at its initial stop.
pub fn spawn_traced(command: &[String]) -> Result<Pid> {
    match unsafe { fork() }.map_err(TraceError::Spawn)? {
        ForkResult::Child => run_child(command),
        ForkResult::Parent { child } => {
            let status = nix::sys::wait::waitpid(child, None).map_err(TraceError::Wait)?;
            match status {
                WaitStatus::Stopped(_, Signal::SIGTRAP)
                | WaitStatus::Stopped(_, Signal::SIGSTOP) => Ok(child),
                other => Err(TraceError::Protocol(format!(
                    "unexpected initial stop of pid {child}: {other:?}"
                ))
                .into()),
            }
        }
    }
}

fn run_child(command: &[String]) -> ! {
    if let Err(e) = nix::sys::ptrace::traceme() {
        eprintln!("failed to request tracing: {e}");
        std::process::exit(126);
    }
    if let Err(e) = filter::install() {
        eprintln!("failed to install syscall filter: {e}");
        std::process::exit(126);
    }

    let err = Command::new(&command[0]).args(&command[1..]).exec();
    eprintln!("failed to execute {}: {}", command[0], err);
    std::process::exit(127);
}

/// Whether this kernel delivers the filter notification before the
/// conventional syscall-entry stop (pre-4.8 behavior).
pub fn legacy_seccomp_ordering() -> bool {
    let release = match std::fs::read_to_string("/proc/sys/kernel/osrelease") {
        Ok(s) => s,
        Err(_) => return false,
    };
    release_is_pre_4_8(&release)
}

fn release_is_pre_4_8(release: &str) -> bool {
    let mut parts = release.trim().split(['.', '-']);
    let major: u32 = match parts.next().and_then(|s| s.parse().ok()) {
        Some(v) => v,
        None => return false,
    };
    let minor: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    major < 4 || (major == 4 && minor < 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_parsing() {
        assert!(release_is_pre_4_8("4.4.0-116-generic"));
        assert!(release_is_pre_4_8("3.10.0"));
        assert!(!release_is_pre_4_8("4.8.0"));
        assert!(!release_is_pre_4_8("6.18.5-fc-v18"));
        assert!(!release_is_pre_4_8("garbage"));
    }
}
