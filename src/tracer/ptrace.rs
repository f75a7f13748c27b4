use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use super::arch::Registers;
use super::memory;
use crate::error::{Result, TraceError};

/// How to restart a stopped tracee.
///
/// `Continue` runs until the next filter notification; `UntilSyscall` uses
/// PTRACE_SYSCALL so the pending syscall's exit stop is also delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    Continue,
    UntilSyscall,
}

/// Thin facade over the kernel tracing primitives.
///
/// The supervisor and the syscall handlers only ever talk to the kernel
/// through this trait, which is what lets the whole state machine run
/// against a scripted backend in tests. All errors are fatal.
pub trait Backend {
    /// Restart `pid`, delivering `signal` if one is pending.
    fn resume(&mut self, pid: Pid, mode: ResumeMode, signal: Option<Signal>) -> Result<()>;

    /// Block until any tracee changes state.
    fn wait_any(&mut self) -> Result<WaitStatus>;

    /// Block until `pid` changes state.
    fn wait_pid(&mut self, pid: Pid) -> Result<WaitStatus>;

    fn registers(&mut self, pid: Pid) -> Result<Registers>;

    fn set_registers(&mut self, pid: Pid, regs: &Registers) -> Result<()>;

    /// Read the ptrace event message: the child pid after a spawn event, or
    /// the filter's data word after a filter notification.
    fn event_message(&mut self, pid: Pid) -> Result<u64>;

    /// Enable the trace options every tracee runs with. Called exactly once
    /// per tracee, immediately after its first stop.
    fn set_trace_options(&mut self, pid: Pid) -> Result<()>;

    fn read_memory(&mut self, pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>>;

    fn write_memory(&mut self, pid: Pid, addr: u64, data: &[u8]) -> Result<usize>;
}

/// The real kernel backend. Stateless: every call maps to one ptrace or
/// wait request against the live tracee.
pub struct KernelBackend;

/// Linux constant defined in `include/uapi/linux/elf.h`.
#[cfg(target_arch = "aarch64")]
const NT_PRSTATUS: i32 = 0x1;

fn ptrace_err(op: &'static str, pid: Pid) -> impl FnOnce(nix::errno::Errno) -> TraceError {
    move |source| TraceError::Ptrace {
        op,
        pid: pid.as_raw(),
        source,
    }
}

impl Backend for KernelBackend {
    fn resume(&mut self, pid: Pid, mode: ResumeMode, signal: Option<Signal>) -> Result<()> {
        match mode {
            ResumeMode::Continue => {
                ptrace::cont(pid, signal).map_err(ptrace_err("cont", pid))?;
            }
            ResumeMode::UntilSyscall => {
                ptrace::syscall(pid, signal).map_err(ptrace_err("syscall", pid))?;
            }
        }
        Ok(())
    }

    fn wait_any(&mut self) -> Result<WaitStatus> {
        Ok(waitpid(None::<Pid>, Some(WaitPidFlag::__WALL)).map_err(TraceError::Wait)?)
    }

    fn wait_pid(&mut self, pid: Pid) -> Result<WaitStatus> {
        Ok(waitpid(pid, Some(WaitPidFlag::__WALL)).map_err(TraceError::Wait)?)
    }

    #[cfg(target_arch = "x86_64")]
    fn registers(&mut self, pid: Pid) -> Result<Registers> {
        let raw = ptrace::getregs(pid).map_err(ptrace_err("getregs", pid))?;
        Ok(Registers::from_raw(raw))
    }

    #[cfg(target_arch = "x86_64")]
    fn set_registers(&mut self, pid: Pid, regs: &Registers) -> Result<()> {
        ptrace::setregs(pid, regs.into_raw()).map_err(ptrace_err("setregs", pid))?;
        Ok(())
    }

    #[cfg(target_arch = "aarch64")]
    fn registers(&mut self, pid: Pid) -> Result<Registers> {
        let mut data = std::mem::MaybeUninit::<libc::user_regs_struct>::uninit();
        let mut iov = libc::iovec {
            iov_base: data.as_mut_ptr() as *mut libc::c_void,
            iov_len: std::mem::size_of::<libc::user_regs_struct>(),
        };

        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGSET,
                pid.as_raw(),
                NT_PRSTATUS,
                &mut iov as *mut _ as *mut libc::c_void,
            )
        };
        nix::errno::Errno::result(res).map_err(ptrace_err("getregset", pid))?;

        Ok(Registers::from_raw(unsafe { data.assume_init() }))
    }

    #[cfg(target_arch = "aarch64")]
    fn set_registers(&mut self, pid: Pid, regs: &Registers) -> Result<()> {
        let raw = regs.into_raw();
        let mut iov = libc::iovec {
            iov_base: &raw as *const _ as *mut libc::c_void,
            iov_len: std::mem::size_of::<libc::user_regs_struct>(),
        };

        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGSET,
                pid.as_raw(),
                NT_PRSTATUS,
                &mut iov as *mut _ as *mut libc::c_void,
            )
        };
        nix::errno::Errno::result(res).map_err(ptrace_err("setregset", pid))?;

        Ok(())
    }

    fn event_message(&mut self, pid: Pid) -> Result<u64> {
        let msg = ptrace::getevent(pid).map_err(ptrace_err("geteventmsg", pid))?;
        Ok(msg as u64)
    }

    fn set_trace_options(&mut self, pid: Pid) -> Result<()> {
        let options = ptrace::Options::PTRACE_O_TRACESYSGOOD
            | ptrace::Options::PTRACE_O_TRACEFORK
            | ptrace::Options::PTRACE_O_TRACEVFORK
            | ptrace::Options::PTRACE_O_TRACECLONE
            | ptrace::Options::PTRACE_O_TRACEEXEC
            | ptrace::Options::PTRACE_O_TRACESECCOMP
            | ptrace::Options::PTRACE_O_EXITKILL;
        ptrace::setoptions(pid, options).map_err(ptrace_err("setoptions", pid))?;
        Ok(())
    }

    fn read_memory(&mut self, pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
        memory::read_memory(pid, addr, len)
    }

    fn write_memory(&mut self, pid: Pid, addr: u64, data: &[u8]) -> Result<usize> {
        memory::write_memory(pid, addr, data)
    }
}
