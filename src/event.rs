use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TraceEvent {
    Syscall(SyscallRecord),
    Process(ProcessRecord),
    Summary(RunSummary),
}

/// One phase of an intercepted syscall. Enter records are emitted at the
/// seccomp pre-hook, exit records after the post-hook has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallRecord {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    pub syscall: String,
    pub syscall_nr: i64,
    pub phase: SyscallPhase,
    pub logical_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyscallPhase {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub timestamp: DateTime<Utc>,
    pub pid: i32,
    #[serde(flatten)]
    pub kind: ProcessEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessEventKind {
    Spawned { child_pid: i32 },
    Exec,
    Exited { code: i32 },
    Signaled { signal: String },
    SignalForwarded { signal: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_syscalls: u64,
    pub process_count: u64,
    pub exit_code: i32,
}

impl TraceEvent {
    pub fn syscall(
        pid: i32,
        syscall: &str,
        syscall_nr: i64,
        phase: SyscallPhase,
        logical_time: u64,
        return_value: Option<i64>,
    ) -> Self {
        TraceEvent::Syscall(SyscallRecord {
            timestamp: Utc::now(),
            pid,
            syscall: syscall.to_string(),
            syscall_nr,
            phase,
            logical_time,
            return_value,
        })
    }

    pub fn process(pid: i32, kind: ProcessEventKind) -> Self {
        TraceEvent::Process(ProcessRecord {
            timestamp: Utc::now(),
            pid,
            kind,
        })
    }
}
