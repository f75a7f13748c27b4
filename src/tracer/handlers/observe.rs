use super::SyscallHandler;
use crate::error::Result;
use crate::tracer::memory::struct_bytes;
use crate::tracer::ptrace::Backend;
use crate::tracer::state::Tracee;

/// Post-hooked but not rewritten: the call runs unmodified and its return
/// value is recorded in the event log for cross-run comparison.
pub struct ObserveHandler {
    name: &'static str,
}

impl ObserveHandler {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl SyscallHandler for ObserveHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn pre(&mut self, _tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<()> {
        let regs = backend.registers(tracee.pid)?;
        log::trace!(
            "[{}] {} returned {}",
            tracee.pid,
            self.name,
            regs.return_value()
        );
        Ok(())
    }
}

/// Pins the host identity reported by uname(2) so kernel release strings
/// and hostnames cannot end up in build outputs.
pub struct UnameHandler;

const PINNED_SYSNAME: &str = "Linux";
const PINNED_NODENAME: &str = "detrun";
const PINNED_RELEASE: &str = "4.19.0";
const PINNED_VERSION: &str = "#1 SMP";

impl SyscallHandler for UnameHandler {
    fn name(&self) -> &'static str {
        "uname"
    }

    fn pre(&mut self, _tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<()> {
        let regs = backend.registers(tracee.pid)?;
        let buf_addr = regs.arg(0);
        if regs.return_value() != 0 || buf_addr == 0 {
            return Ok(());
        }

        let mut name: libc::utsname = unsafe { std::mem::zeroed() };
        fill_field(&mut name.sysname, PINNED_SYSNAME);
        fill_field(&mut name.nodename, PINNED_NODENAME);
        fill_field(&mut name.release, PINNED_RELEASE);
        fill_field(&mut name.version, PINNED_VERSION);
        fill_field(&mut name.machine, std::env::consts::ARCH);

        backend.write_memory(tracee.pid, buf_addr, struct_bytes(&name))?;
        log::debug!("[{}] uname pinned to {}", tracee.pid, PINNED_RELEASE);
        Ok(())
    }
}

fn fill_field(dst: &mut [libc::c_char; 65], value: &str) {
    for (d, s) in dst.iter_mut().zip(value.bytes().take(64)) {
        *d = s as libc::c_char;
    }
}
