use std::io::{self, Write};

use colored::Colorize;

use super::OutputSink;
use crate::error::Result;
use crate::event::*;

/// Colored terminal narration sink (writes to stderr).
pub struct TerminalSink {
    verbosity: u8,
}

impl TerminalSink {
    pub fn new(verbosity: u8, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { verbosity }
    }

    fn format_syscall(&self, event: &SyscallRecord) -> String {
        let ts = event.timestamp.format("%H:%M:%S%.3f");
        let pid = format!("[{}]", event.pid).dimmed().to_string();
        let name = event.syscall.cyan().to_string();
        let time = format!("t={}", event.logical_time).dimmed().to_string();

        match event.phase {
            SyscallPhase::Enter => {
                format!("{ts} {} {pid} {name} {time}", "CALL".red().bold())
            }
            SyscallPhase::Exit => {
                let ret = event
                    .return_value
                    .map(|v| format!("= {v}"))
                    .unwrap_or_default();
                format!("{ts} {} {pid} {name} {time} {ret}", "RET ".yellow())
            }
        }
    }

    fn format_process(&self, event: &ProcessRecord) -> String {
        let ts = event.timestamp.format("%H:%M:%S%.3f");
        let pid = format!("[{}]", event.pid).dimmed().to_string();
        let tag = "PROC".blue().bold();

        match &event.kind {
            ProcessEventKind::Spawned { child_pid } => {
                format!("{ts} {tag} {pid} spawned -> {child_pid}")
            }
            ProcessEventKind::Exec => format!("{ts} {tag} {pid} exec"),
            ProcessEventKind::Exited { code } => {
                let status = if *code == 0 {
                    format!("exit {code}").green().to_string()
                } else {
                    format!("exit {code}").red().to_string()
                };
                format!("{ts} {tag} {pid} {status}")
            }
            ProcessEventKind::Signaled { signal } => {
                format!("{ts} {tag} {pid} killed by {signal}")
            }
            ProcessEventKind::SignalForwarded { signal } => {
                format!("{ts} {} {pid} forwarding {signal}", "SIG ".yellow().bold())
            }
        }
    }

    fn format_summary(&self, summary: &RunSummary) -> String {
        let mut lines = Vec::new();
        lines.push(format!("\n{}", "=== Run Summary ===".bold()));
        lines.push(format!("Duration:       {}ms", summary.duration_ms));
        lines.push(format!("Intercepted:    {}", summary.total_syscalls));
        lines.push(format!("Processes:      {}", summary.process_count));
        lines.push(format!("Exit code:      {}", summary.exit_code));
        lines.join("\n")
    }
}

impl OutputSink for TerminalSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        let line = match event {
            TraceEvent::Syscall(e) => {
                // Per-syscall narration only from -v up; exits only at -vv.
                if self.verbosity == 0 || (self.verbosity == 1 && e.phase == SyscallPhase::Exit) {
                    return Ok(());
                }
                self.format_syscall(e)
            }
            TraceEvent::Process(e) => {
                if self.verbosity == 0 {
                    return Ok(());
                }
                self.format_process(e)
            }
            TraceEvent::Summary(s) => {
                if self.verbosity == 0 {
                    return Ok(());
                }
                self.format_summary(s)
            }
        };
        writeln!(io::stderr(), "{line}").map_err(crate::error::OutputError::Io)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        io::stderr().flush().map_err(crate::error::OutputError::Io)?;
        Ok(())
    }
}
