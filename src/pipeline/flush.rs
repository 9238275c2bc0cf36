use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use super::{LogSink, SharedSink};

/// Buffers partial output and forwards it one complete line at a time,
/// flushing downstream after every line.
///
/// A trailing `\r` before the newline is dropped. Whatever remains unterminated
/// is held until a later write completes it or the writer is closed.
pub struct LineFlushWriter {
    output: SharedSink,
    buffer: Mutex<Vec<u8>>,
}

impl LineFlushWriter {
    pub fn new(output: SharedSink) -> Arc<Self> {
        Arc::new(Self {
            output,
            buffer: Mutex::new(Vec::new()),
        })
    }

    fn emit(&self, line: &[u8]) -> io::Result<()> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let mut terminated = Vec::with_capacity(line.len() + 1);
        terminated.extend_from_slice(line);
        terminated.push(b'\n');
        self.output.write(&terminated)?;
        self.output.flush()
    }
}

impl LogSink for LineFlushWriter {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(data);

        let mut start = 0;
        while let Some(offset) = buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let result = self.emit(&buffer[start..end]);
            start = end + 1;
            if let Err(e) = result {
                buffer.drain(..start);
                return Err(e);
            }
        }
        buffer.drain(..start);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.output.flush()
    }

    /// Forwards any unterminated remainder as a final line.
    ///
    /// Downstream sinks are flushed but left open: the writer may be reused
    /// for the next command's output.
    fn close(&self) -> io::Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut *buffer);
        self.emit(&rest)
    }
}
