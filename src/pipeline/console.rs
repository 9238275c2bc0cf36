use std::io;
use std::sync::Arc;

use super::LogSink;
use crate::logging::BUILD_TARGET;

/// Operator-facing leaf of the pipeline: one `tracing` event per line.
#[derive(Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl LogSink for ConsoleSink {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        let text = String::from_utf8_lossy(data);
        for line in text.trim_end_matches('\n').split('\n') {
            tracing::info!(target: BUILD_TARGET, "{}", line);
        }
        Ok(())
    }
}
