use nix::sys::signal::Signal;
use nix::unistd::Pid;

use super::handlers::SyscallHandler;

/// Per-tracee bookkeeping. Pure data: handlers mutate `current_syscall`
/// through the supervisor; only the supervisor touches the signal and
/// entry-stop fields.
pub struct Tracee {
    pub pid: Pid,
    logical_time: u64,
    /// Signal to deliver on the next resume of this tracee, then cleared.
    pub pending_signal: Option<Signal>,
    /// The handler in flight between a pre-hook that asked for a post-hook
    /// and the completion of that post-hook.
    pub current_syscall: Option<Box<dyn SyscallHandler>>,
    /// On pre-4.8 kernels the filter notification is followed by a redundant
    /// syscall-entry stop; set after each pre-hook there so the next
    /// syscall stop is recognized and discarded.
    pub pending_entry_stop: bool,
    pub legacy_kernel: bool,
    /// Base value in seconds for clock readings synthesized by handlers.
    pub clock_epoch: u64,
}

impl Tracee {
    pub fn new(pid: Pid, legacy_kernel: bool, clock_epoch: u64) -> Self {
        Self {
            pid,
            logical_time: 0,
            pending_signal: None,
            current_syscall: None,
            pending_entry_stop: false,
            legacy_kernel,
            clock_epoch,
        }
    }

    /// Post-increment the logical clock. Called once per pre-hook, so the
    /// value each handler observes is strictly increasing.
    pub fn advance_time(&mut self) -> u64 {
        let now = self.logical_time;
        self.logical_time += 1;
        now
    }

    pub fn logical_time(&self) -> u64 {
        self.logical_time
    }

    /// Seconds value for synthesized clock readings: the epoch plus one
    /// second per intercepted syscall, so time always moves forward.
    pub fn clock_seconds(&self) -> u64 {
        self.clock_epoch + self.logical_time
    }

    pub fn take_pending_signal(&mut self) -> Option<Signal> {
        self.pending_signal.take()
    }
}

impl std::fmt::Debug for Tracee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracee")
            .field("pid", &self.pid)
            .field("logical_time", &self.logical_time)
            .field("pending_signal", &self.pending_signal)
            .field(
                "current_syscall",
                &self.current_syscall.as_ref().map(|h| h.name()),
            )
            .field("pending_entry_stop", &self.pending_entry_stop)
            .field("legacy_kernel", &self.legacy_kernel)
            .finish()
    }
}
