use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetrunError {
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("output error: {0}")]
    Output(#[from] OutputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Fatal tracer-side failures. None of these are recoverable: once ptrace or
/// the per-tracee state machine misbehaves there is no safe way to keep
/// driving the tracee, so every variant aborts the session.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("ptrace {op} failed on pid {pid}: {source}")]
    Ptrace {
        op: &'static str,
        pid: i32,
        #[source]
        source: Errno,
    },

    #[error("wait failed: {0}")]
    Wait(#[source] Errno),

    #[error("spawn failed: {0}")]
    Spawn(#[source] Errno),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no filter rule for syscall {number} on pid {pid}")]
    UnfilteredSyscall { pid: i32, number: i64 },

    #[error("no handler registered for syscall {number} ({name})")]
    MissingHandler { number: i64, name: String },

    #[error("supervisor bug: {0}")]
    Bug(String),
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DetrunError>;
