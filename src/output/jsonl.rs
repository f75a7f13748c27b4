use std::io::Write;

use super::OutputSink;
use crate::error::{OutputError, Result};
use crate::event::TraceEvent;

pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> OutputSink for JsonlSink<W> {
    fn emit(&mut self, event: &TraceEvent) -> Result<()> {
        let json = serde_json::to_string(event).map_err(OutputError::Serialize)?;
        writeln!(self.writer, "{}", json).map_err(|e| OutputError::Io(e).into())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| OutputError::Io(e).into())
    }
}
