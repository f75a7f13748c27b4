//! Seccomp-bpf trace filter.
//!
//! The filter is installed in the forked child before exec. Its rules are
//! generated from the registry's syscall descriptor table: for every row it
//! returns `SECCOMP_RET_TRACE` with the syscall number as the event data,
//! which the supervisor reads back through `PTRACE_GETEVENTMSG`. Everything
//! else is allowed through untraced. The data value [`NO_RULE_SENTINEL`] is
//! reserved: a filter that traces a syscall it has no rule for reports it,
//! and the supervisor treats that as a configuration bug.

use crate::tracer::handlers;

// Classic-BPF opcode and seccomp constants, defined here the same way the
// ptrace event codes are: the libc crate does not export all of them on
// every target.
const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;
const SECCOMP_RET_TRACE: u32 = 0x7ff0_0000;

const SECCOMP_SET_MODE_FILTER: libc::c_long = 1;

// Offsets into struct seccomp_data.
const SECCOMP_DATA_NR: u32 = 0;
const SECCOMP_DATA_ARCH: u32 = 4;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH_CURRENT: u32 = 0xc000_003e; // AUDIT_ARCH_X86_64
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH_CURRENT: u32 = 0xc000_00b7; // AUDIT_ARCH_AARCH64

/// Event message value meaning "the filter trapped a syscall it has no rule
/// for". Reserved by convention; the shipped filter never emits it.
pub const NO_RULE_SENTINEL: u64 = i16::MAX as u64;

fn insn(code: u16, jt: u8, jf: u8, k: u32) -> libc::sock_filter {
    libc::sock_filter { code, jt, jf, k }
}

/// Build the trace filter from the registry's descriptor table.
pub fn build_program() -> Vec<libc::sock_filter> {
    let table = handlers::table();
    let mut prog = Vec::with_capacity(4 + 2 * table.len() + 1);

    // Syscall numbers are only meaningful for the arch we were compiled
    // for; let foreign-arch calls (e.g. x32) through untouched.
    prog.push(insn(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARCH));
    prog.push(insn(BPF_JMP | BPF_JEQ | BPF_K, 1, 0, AUDIT_ARCH_CURRENT));
    prog.push(insn(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ALLOW));

    prog.push(insn(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_NR));
    for d in table {
        prog.push(insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, d.number as u32));
        prog.push(insn(
            BPF_RET | BPF_K,
            0,
            0,
            SECCOMP_RET_TRACE | (d.number as u32 & 0xffff),
        ));
    }
    prog.push(insn(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ALLOW));

    prog
}

/// Install the trace filter in the calling process. Must run in the child
/// after `PTRACE_TRACEME` and before exec.
pub fn install() -> std::io::Result<()> {
    let program = build_program();
    let prog = libc::sock_fprog {
        len: program.len() as u16,
        filter: program.as_ptr() as *mut libc::sock_filter,
    };

    // SECCOMP_SET_MODE_FILTER requires either CAP_SYS_ADMIN or no-new-privs.
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let rc = unsafe {
        libc::syscall(
            libc::SYS_seccomp,
            SECCOMP_SET_MODE_FILTER,
            0,
            &prog as *const libc::sock_fprog,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_shape() {
        let prog = build_program();
        assert_eq!(prog.len(), 4 + 2 * handlers::table().len() + 1);

        let last = prog.last().unwrap();
        assert_eq!(last.code, BPF_RET | BPF_K);
        assert_eq!(last.k, SECCOMP_RET_ALLOW);
    }

    #[test]
    fn every_intercepted_syscall_has_a_trace_rule() {
        let prog = build_program();
        for d in handlers::table() {
            let expected = SECCOMP_RET_TRACE | (d.number as u32 & 0xffff);
            assert!(
                prog.iter()
                    .any(|i| i.code == (BPF_RET | BPF_K) && i.k == expected),
                "no trace rule for syscall {}",
                d.number
            );
        }
    }

    #[test]
    fn sentinel_is_outside_the_intercepted_set() {
        assert!(handlers::table()
            .iter()
            .all(|d| d.number as u64 != NO_RULE_SENTINEL));
    }
}
