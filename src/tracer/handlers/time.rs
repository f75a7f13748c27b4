//! Clock-reading syscalls, rewritten to the tracee's logical clock.
//!
//! Every intercepted call advances the logical clock by one, and every
//! clock read reports `clock_epoch + logical_time` seconds, so a program
//! that polls the time still observes it moving forward.

use super::SyscallHandler;
use crate::error::Result;
use crate::tracer::memory::struct_bytes;
use crate::tracer::ptrace::Backend;
use crate::tracer::state::Tracee;

pub struct GettimeofdayHandler;

impl SyscallHandler for GettimeofdayHandler {
    fn name(&self) -> &'static str {
        "gettimeofday"
    }

    fn pre(&mut self, _tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<()> {
        let regs = backend.registers(tracee.pid)?;
        let tv_addr = regs.arg(0);
        if regs.return_value() != 0 || tv_addr == 0 {
            return Ok(());
        }

        let tv = libc::timeval {
            tv_sec: tracee.clock_seconds() as libc::time_t,
            tv_usec: 0,
        };
        backend.write_memory(tracee.pid, tv_addr, struct_bytes(&tv))?;
        log::debug!(
            "[{}] gettimeofday -> {}s",
            tracee.pid,
            tracee.clock_seconds()
        );
        Ok(())
    }
}

pub struct ClockGettimeHandler;

impl SyscallHandler for ClockGettimeHandler {
    fn name(&self) -> &'static str {
        "clock_gettime"
    }

    fn pre(&mut self, _tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<()> {
        let regs = backend.registers(tracee.pid)?;
        let ts_addr = regs.arg(1);
        if regs.return_value() != 0 || ts_addr == 0 {
            return Ok(());
        }

        let ts = libc::timespec {
            tv_sec: tracee.clock_seconds() as libc::time_t,
            tv_nsec: 0,
        };
        backend.write_memory(tracee.pid, ts_addr, struct_bytes(&ts))?;
        log::debug!(
            "[{}] clock_gettime -> {}s",
            tracee.pid,
            tracee.clock_seconds()
        );
        Ok(())
    }
}

#[cfg(target_arch = "x86_64")]
pub struct TimeHandler;

#[cfg(target_arch = "x86_64")]
impl SyscallHandler for TimeHandler {
    fn name(&self) -> &'static str {
        "time"
    }

    fn pre(&mut self, _tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<()> {
        let seconds = tracee.clock_seconds() as i64;

        let mut regs = backend.registers(tracee.pid)?;
        regs.set_return_value(seconds);
        backend.set_registers(tracee.pid, &regs)?;

        // time(2) also stores through its pointer argument when non-null.
        let out_addr = regs.arg(0);
        if out_addr != 0 {
            backend.write_memory(tracee.pid, out_addr, &seconds.to_le_bytes())?;
        }
        log::debug!("[{}] time -> {}s", tracee.pid, seconds);
        Ok(())
    }
}

/// Sleeps are a scheduling artifact: the request is rewritten to zero
/// duration before the kernel sees it, so the call returns immediately and
/// wall-clock pacing cannot leak into the execution.
pub struct NanosleepHandler;

impl SyscallHandler for NanosleepHandler {
    fn name(&self) -> &'static str {
        "nanosleep"
    }

    fn pre(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<bool> {
        let regs = backend.registers(tracee.pid)?;
        let req_addr = regs.arg(0);
        if req_addr != 0 {
            let zero = libc::timespec {
                tv_sec: 0,
                tv_nsec: 0,
            };
            backend.write_memory(tracee.pid, req_addr, struct_bytes(&zero))?;
            log::debug!("[{}] nanosleep request zeroed", tracee.pid);
        }
        Ok(false)
    }
}
