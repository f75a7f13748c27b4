//! Two-phase syscall handlers.
//!
//! Each intercepted syscall maps to a handler with a pre phase (runs at the
//! filter notification, before the kernel executes the call) and a post
//! phase (runs at the syscall-exit stop, after the kernel completed it).
//! `pre` returns true iff the post phase is required. Handlers own no
//! cross-call state; everything per-tracee lives on [`Tracee`].

pub mod observe;
pub mod random;
pub mod spawn;
pub mod time;

use std::sync::LazyLock;

use crate::error::{Result, TraceError};

use super::ptrace::Backend;
use super::state::Tracee;

pub trait SyscallHandler {
    fn name(&self) -> &'static str;

    /// Inspect or rewrite the call before the kernel executes it. Returns
    /// true iff a post-hook is also required.
    fn pre(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<bool>;

    /// Inspect or rewrite the result after the kernel completed the call.
    fn post(&mut self, _tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn SyscallHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyscallHandler").field("name", &self.name()).finish()
    }
}

type HandlerCtor = fn() -> Box<dyn SyscallHandler>;

/// One row of the syscall descriptor table.
pub struct SyscallDescriptor {
    pub number: i64,
    pub name: &'static str,
    ctor: HandlerCtor,
}

impl SyscallDescriptor {
    fn new(number: i64, name: &'static str, ctor: HandlerCtor) -> Self {
        Self { number, name, ctor }
    }
}

/// The single source of truth for what gets intercepted: the filter
/// program is generated from this table and [`lookup`] resolves against
/// it, so a syscall cannot be trapped without a handler or handled without
/// being trapped.
static SYSCALL_TABLE: LazyLock<Vec<SyscallDescriptor>> = LazyLock::new(|| {
    let mut table = vec![
        SyscallDescriptor::new(libc::SYS_read, "read", || {
            Box::new(observe::ObserveHandler::new("read"))
        }),
        SyscallDescriptor::new(libc::SYS_write, "write", || {
            Box::new(observe::ObserveHandler::new("write"))
        }),
        SyscallDescriptor::new(libc::SYS_getpid, "getpid", || {
            Box::new(observe::ObserveHandler::new("getpid"))
        }),
        SyscallDescriptor::new(libc::SYS_gettimeofday, "gettimeofday", || {
            Box::new(time::GettimeofdayHandler)
        }),
        SyscallDescriptor::new(libc::SYS_clock_gettime, "clock_gettime", || {
            Box::new(time::ClockGettimeHandler)
        }),
        SyscallDescriptor::new(libc::SYS_nanosleep, "nanosleep", || {
            Box::new(time::NanosleepHandler)
        }),
        SyscallDescriptor::new(libc::SYS_getrandom, "getrandom", || {
            Box::new(random::GetrandomHandler)
        }),
        SyscallDescriptor::new(libc::SYS_uname, "uname", || Box::new(observe::UnameHandler)),
        SyscallDescriptor::new(libc::SYS_clone, "clone", || {
            Box::new(spawn::SpawnHandler::new("clone"))
        }),
    ];

    #[cfg(target_arch = "x86_64")]
    table.extend([
        SyscallDescriptor::new(libc::SYS_time, "time", || Box::new(time::TimeHandler)),
        SyscallDescriptor::new(libc::SYS_fork, "fork", || {
            Box::new(spawn::SpawnHandler::new("fork"))
        }),
        SyscallDescriptor::new(libc::SYS_vfork, "vfork", || {
            Box::new(spawn::SpawnHandler::new("vfork"))
        }),
    ]);

    table
});

/// The full descriptor table, in filter-rule order.
pub fn table() -> &'static [SyscallDescriptor] {
    SYSCALL_TABLE.as_slice()
}

fn descriptor(number: i64) -> Option<&'static SyscallDescriptor> {
    SYSCALL_TABLE.iter().find(|d| d.number == number)
}

/// Human-readable name for a syscall number.
pub fn syscall_name(number: i64) -> String {
    if let Some(d) = descriptor(number) {
        return d.name.to_string();
    }
    // A few that show up in logs without being intercepted.
    match number {
        libc::SYS_execve => "execve".to_string(),
        libc::SYS_exit => "exit".to_string(),
        libc::SYS_exit_group => "exit_group".to_string(),
        _ => format!("syscall_{number}"),
    }
}

/// True for the process-spawning syscalls, which must never flow into a
/// post-hook: the kernel's spawn trace-event is imminent and the supervisor
/// reconciles it instead.
pub fn is_spawn(number: i64) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        matches!(number, libc::SYS_fork | libc::SYS_vfork | libc::SYS_clone)
    }
    #[cfg(target_arch = "aarch64")]
    {
        number == libc::SYS_clone
    }
}

/// Produce the handler for an intercepted syscall number.
///
/// A number outside the descriptor table means the installed filter and
/// this registry have diverged, which is a configuration bug and fatal.
pub fn lookup(number: i64) -> Result<Box<dyn SyscallHandler>> {
    match descriptor(number) {
        Some(d) => Ok((d.ctor)()),
        None => Err(TraceError::MissingHandler {
            number,
            name: syscall_name(number),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetrunError;

    #[test]
    fn registry_covers_the_intercepted_set() {
        for d in table() {
            let handler = lookup(d.number).unwrap_or_else(|e| {
                panic!("table row {} has no handler: {e}", d.number);
            });
            assert_eq!(handler.name(), d.name);
            assert_eq!(syscall_name(d.number), d.name);
        }
    }

    #[test]
    fn unlisted_syscall_is_a_config_error() {
        let err = lookup(libc::SYS_openat).unwrap_err();
        assert!(matches!(
            err,
            DetrunError::Trace(TraceError::MissingHandler { .. })
        ));
    }

    #[test]
    fn spawn_syscalls_are_in_the_table() {
        let spawns: Vec<i64> = table()
            .iter()
            .map(|d| d.number)
            .filter(|&nr| is_spawn(nr))
            .collect();
        assert!(spawns.contains(&libc::SYS_clone));
        for nr in spawns {
            assert!(lookup(nr).is_ok());
        }
        assert!(!is_spawn(libc::SYS_read));
    }
}
