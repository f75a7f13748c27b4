//! Spawn syscalls. The handler itself does nothing: the supervisor
//! reconciles the kernel's spawn trace-event right after the pre-hook, and
//! these calls must never flow into a post-hook.

use super::SyscallHandler;
use crate::error::Result;
use crate::tracer::ptrace::Backend;
use crate::tracer::state::Tracee;

pub struct SpawnHandler {
    name: &'static str,
}

impl SpawnHandler {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl SyscallHandler for SpawnHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn pre(&mut self, tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<bool> {
        log::debug!("[{}] {} intercepted", tracee.pid, self.name);
        Ok(false)
    }
}
