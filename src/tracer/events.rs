use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use super::ptrace::{Backend, ResumeMode};
use crate::error::{Result, TraceError};

/// The closed set of kernel stops the supervisor understands. Anything the
/// configured trace options cannot produce (PTRACE_EVENT_STOP,
/// PTRACE_EVENT_EXIT, spurious wait statuses) is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    /// Tracee terminated normally.
    Exited(i32),
    Exec,
    Clone,
    Vfork,
    Fork,
    /// The in-kernel filter trapped a syscall: the pre-hook opportunity.
    Seccomp,
    /// Conventional syscall-entry/exit stop (SIGTRAP | 0x80).
    SyscallStop,
    /// Any other stop-for-signal.
    Signal(Signal),
    /// Tracee killed by a signal.
    Terminated(Signal),
}

/// Classify a wait status into a [`StopEvent`].
pub fn classify(status: WaitStatus) -> Result<StopEvent> {
    match status {
        WaitStatus::Exited(_, code) => Ok(StopEvent::Exited(code)),
        WaitStatus::PtraceEvent(pid, _, event) => match event {
            libc::PTRACE_EVENT_EXEC => Ok(StopEvent::Exec),
            libc::PTRACE_EVENT_CLONE => Ok(StopEvent::Clone),
            libc::PTRACE_EVENT_VFORK => Ok(StopEvent::Vfork),
            libc::PTRACE_EVENT_FORK => Ok(StopEvent::Fork),
            libc::PTRACE_EVENT_SECCOMP => Ok(StopEvent::Seccomp),
            other => Err(TraceError::Protocol(format!(
                "unexpected ptrace event {other} on pid {pid}"
            ))
            .into()),
        },
        WaitStatus::PtraceSyscall(_) => Ok(StopEvent::SyscallStop),
        WaitStatus::Stopped(_, signal) => Ok(StopEvent::Signal(signal)),
        WaitStatus::Signaled(_, signal, _) => Ok(StopEvent::Terminated(signal)),
        other => Err(TraceError::Protocol(format!("unexpected wait status {other:?}")).into()),
    }
}

fn status_pid(status: &WaitStatus) -> Result<Pid> {
    status
        .pid()
        .ok_or_else(|| TraceError::Protocol(format!("wait status {status:?} carries no pid")).into())
}

/// Produces the stream of classified kernel stops. The blocking wait in
/// [`EventSource::next_event`] is the only suspension point in the whole
/// supervisor.
pub struct EventSource<B> {
    backend: B,
}

impl<B: Backend> EventSource<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Restart `resume_pid` and block until any tracee stops. The pending
    /// signal, if any, is delivered on the restart; `want_post_hook` selects
    /// PTRACE_SYSCALL so the in-flight call's exit stop is reported.
    ///
    /// The returned pid is whichever tracee actually stopped, which is not
    /// necessarily `resume_pid`.
    pub fn next_event(
        &mut self,
        resume_pid: Pid,
        want_post_hook: bool,
        signal: Option<Signal>,
    ) -> Result<(Pid, StopEvent)> {
        let mode = if want_post_hook {
            ResumeMode::UntilSyscall
        } else {
            ResumeMode::Continue
        };
        self.backend.resume(resume_pid, mode, signal)?;

        let status = self.backend.wait_any()?;
        Ok((status_pid(&status)?, classify(status)?))
    }

    /// Block for the next stop without restarting anyone. Used during spawn
    /// reconciliation when the parent is already running toward its spawn
    /// event and the child's initial stop arrived first.
    pub fn wait_without_resume(&mut self) -> Result<(Pid, StopEvent)> {
        let status = self.backend.wait_any()?;
        Ok((status_pid(&status)?, classify(status)?))
    }

    /// Block until `pid` stops, verifying the wait reported exactly that
    /// pid.
    pub fn wait_for(&mut self, pid: Pid) -> Result<StopEvent> {
        let status = self.backend.wait_pid(pid)?;
        let got = status_pid(&status)?;
        if got != pid {
            return Err(TraceError::Protocol(format!(
                "waited for pid {pid} but the kernel reported pid {got}"
            ))
            .into());
        }
        classify(status)
    }
}
