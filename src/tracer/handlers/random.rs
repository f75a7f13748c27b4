//! Randomness, replaced with a stream derived from the logical clock.

use super::SyscallHandler;
use crate::error::Result;
use crate::tracer::ptrace::Backend;
use crate::tracer::state::Tracee;

pub struct GetrandomHandler;

impl SyscallHandler for GetrandomHandler {
    fn name(&self) -> &'static str {
        "getrandom"
    }

    fn pre(&mut self, _tracee: &mut Tracee, _backend: &mut dyn Backend) -> Result<bool> {
        Ok(true)
    }

    fn post(&mut self, tracee: &mut Tracee, backend: &mut dyn Backend) -> Result<()> {
        let regs = backend.registers(tracee.pid)?;
        let filled = regs.return_value();
        let buf_addr = regs.arg(0);
        if filled <= 0 || buf_addr == 0 {
            return Ok(());
        }

        // Seeded from the logical clock, so the stream depends only on how
        // many syscalls preceded it, never on the kernel's entropy pool.
        let bytes = deterministic_bytes(tracee.logical_time(), filled as usize);
        backend.write_memory(tracee.pid, buf_addr, &bytes)?;
        log::debug!("[{}] getrandom rewrote {} bytes", tracee.pid, filled);
        Ok(())
    }
}

fn deterministic_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut state = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    while out.len() < len {
        // splitmix64 step
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^= z >> 31;
        let chunk = z.to_le_bytes();
        let take = std::cmp::min(len - out.len(), chunk.len());
        out.extend_from_slice(&chunk[..take]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_is_reproducible() {
        assert_eq!(deterministic_bytes(7, 32), deterministic_bytes(7, 32));
        assert_ne!(deterministic_bytes(7, 32), deterministic_bytes(8, 32));
    }

    #[test]
    fn stream_has_requested_length() {
        for len in [0, 1, 7, 8, 9, 64] {
            assert_eq!(deterministic_bytes(1, len).len(), len);
        }
    }
}
