//! Tracee memory access.
//!
//! Reads and writes are symmetric: one process_vm call covers the whole
//! range, and when the kernel refuses it (hardened ptrace_scope, a
//! partially unmapped range) the same range is walked in word-sized ptrace
//! requests instead. Reads yield the readable prefix when the range faults
//! partway through; writes are all-or-nothing.

use nix::unistd::Pid;

use crate::error::{Result, TraceError};

const WORD: usize = std::mem::size_of::<libc::c_long>();

pub fn read_memory(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Ok(Vec::new());
    }

    match read_vm(pid, addr, len) {
        Ok(data) => Ok(data),
        Err(e) => {
            log::debug!("process_vm_readv unavailable for pid {pid}: {e}");
            read_words(pid, addr, len)
        }
    }
}

pub fn write_memory(pid: Pid, addr: u64, data: &[u8]) -> Result<usize> {
    if data.is_empty() {
        return Ok(0);
    }

    match write_vm(pid, addr, data) {
        Ok(n) => Ok(n),
        Err(e) => {
            log::debug!("process_vm_writev unavailable for pid {pid}: {e}");
            write_words(pid, addr, data)
        }
    }
}

fn read_vm(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len];
    let local = libc::iovec {
        iov_base: data.as_mut_ptr().cast(),
        iov_len: len,
    };
    let remote = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: len,
    };

    let copied = unsafe { libc::process_vm_readv(pid.as_raw(), &local, 1, &remote, 1, 0) };
    if copied < 0 {
        return Err(vm_err("process_vm_readv", pid).into());
    }

    data.truncate(copied as usize);
    Ok(data)
}

fn write_vm(pid: Pid, addr: u64, data: &[u8]) -> Result<usize> {
    let local = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };
    let remote = libc::iovec {
        iov_base: addr as *mut libc::c_void,
        iov_len: data.len(),
    };

    let copied = unsafe { libc::process_vm_writev(pid.as_raw(), &local, 1, &remote, 1, 0) };
    if copied < 0 {
        return Err(vm_err("process_vm_writev", pid).into());
    }

    Ok(copied as usize)
}

fn read_words(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    let mut offset = 0usize;

    while offset < len {
        let word = match nix::sys::ptrace::read(pid, (addr + offset as u64) as *mut libc::c_void)
        {
            Ok(w) => w,
            // A fault partway through yields the readable prefix.
            Err(_) if offset > 0 => {
                out.truncate(offset);
                break;
            }
            Err(e) => {
                return Err(TraceError::Ptrace {
                    op: "peekdata",
                    pid: pid.as_raw(),
                    source: e,
                }
                .into())
            }
        };

        let take = std::cmp::min(WORD, len - offset);
        out[offset..offset + take].copy_from_slice(&word.to_le_bytes()[..take]);
        offset += take;
    }

    Ok(out)
}

fn write_words(pid: Pid, addr: u64, data: &[u8]) -> Result<usize> {
    let mut offset = 0usize;

    while offset < data.len() {
        let at = (addr + offset as u64) as *mut libc::c_void;
        let remaining = data.len() - offset;

        let word = if remaining >= WORD {
            let mut bytes = [0u8; WORD];
            bytes.copy_from_slice(&data[offset..offset + WORD]);
            libc::c_long::from_le_bytes(bytes)
        } else {
            // The trailing partial word keeps its bytes past the range.
            let existing =
                nix::sys::ptrace::read(pid, at).map_err(|e| TraceError::Ptrace {
                    op: "peekdata",
                    pid: pid.as_raw(),
                    source: e,
                })?;
            let mut bytes = existing.to_le_bytes();
            bytes[..remaining].copy_from_slice(&data[offset..]);
            libc::c_long::from_le_bytes(bytes)
        };

        nix::sys::ptrace::write(pid, at, word).map_err(|e| TraceError::Ptrace {
            op: "pokedata",
            pid: pid.as_raw(),
            source: e,
        })?;

        offset += std::cmp::min(remaining, WORD);
    }

    Ok(data.len())
}

fn vm_err(op: &'static str, pid: Pid) -> TraceError {
    TraceError::Ptrace {
        op,
        pid: pid.as_raw(),
        source: nix::errno::Errno::last(),
    }
}

/// View a plain C struct as its byte representation, for writing whole
/// out-parameters (timeval, timespec, utsname) into the tracee.
pub fn struct_bytes<T: Sized>(value: &T) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
    }
}
