use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use super::{LogSink, SharedSink};

/// Prepends a label to every line passing through.
///
/// Line starts are tracked across calls, so a line split over several writes
/// is labeled once and a multi-line write is labeled on every line.
pub struct PrefixWriter {
    output: SharedSink,
    prefix: String,
    at_line_start: Mutex<bool>,
}

impl PrefixWriter {
    pub fn new(output: SharedSink, prefix: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            output,
            prefix: prefix.into(),
            at_line_start: Mutex::new(true),
        })
    }

    /// Derives a writer whose lines carry `prefix` inside this writer's own.
    pub fn with_prefix(self: &Arc<Self>, prefix: impl Into<String>) -> Arc<Self> {
        Self::new(Arc::clone(self) as SharedSink, prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl LogSink for PrefixWriter {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut at_line_start = self.at_line_start.lock().unwrap_or_else(PoisonError::into_inner);

        let mut prefixed = Vec::with_capacity(data.len() + self.prefix.len());
        for segment in data.split_inclusive(|b| *b == b'\n') {
            if *at_line_start {
                prefixed.extend_from_slice(self.prefix.as_bytes());
            }
            prefixed.extend_from_slice(segment);
            *at_line_start = segment.ends_with(b"\n");
        }

        if prefixed.is_empty() {
            return Ok(());
        }
        self.output.write(&prefixed)
    }

    fn flush(&self) -> io::Result<()> {
        self.output.flush()
    }

    fn close(&self) -> io::Result<()> {
        // Downstream completes the partial line, so the next write starts fresh.
        let mut at_line_start = self.at_line_start.lock().unwrap_or_else(PoisonError::into_inner);
        *at_line_start = true;
        self.output.close()
    }
}
