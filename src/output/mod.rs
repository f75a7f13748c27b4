pub mod jsonl;
pub mod terminal;

use std::path::Path;

use crate::error::Result;
use crate::event::TraceEvent;
use jsonl::JsonlSink;
use terminal::TerminalSink;

/// Trait for output destinations.
pub trait OutputSink {
    fn emit(&mut self, event: &TraceEvent) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Multiplexes events to multiple sinks.
pub struct OutputManager {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl OutputManager {
    pub fn new(output_path: Option<&Path>, verbosity: u8, no_color: bool) -> Result<Self> {
        let mut sinks: Vec<Box<dyn OutputSink>> = Vec::new();

        // Terminal narration always goes to stderr so the JSONL stream on
        // stdout stays machine-readable.
        sinks.push(Box::new(TerminalSink::new(verbosity, no_color)));

        match output_path {
            Some(path) => {
                let file = std::fs::File::create(path)?;
                sinks.push(Box::new(JsonlSink::new(file)));
            }
            None => {
                sinks.push(Box::new(JsonlSink::new(std::io::stdout())));
            }
        }

        Ok(Self { sinks })
    }

    /// Build a manager from explicit sinks. Used by the test harness to
    /// capture the event stream in memory.
    pub fn from_sinks(sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn emit(&mut self, event: TraceEvent) -> Result<()> {
        for sink in &mut self.sinks {
            sink.emit(&event)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}
