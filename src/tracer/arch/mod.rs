//! Register-file access for the supported architectures.
//!
//! One architecture is compiled in at a time; `Registers` is a plain struct
//! so the supervisor and handlers can be driven from scripted register
//! values in tests without touching ptrace.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use x86_64::Registers;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::Registers;
