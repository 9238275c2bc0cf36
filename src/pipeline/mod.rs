//! Streaming log pipeline.
//!
//! Build output travels through a small chain of sinks, each adding one
//! behavior and holding a reference to the next:
//!
//! ```text
//! stage PrefixWriter ("[build] ")
//!   └─ root PrefixWriter ("")
//!        └─ LineFlushWriter          (line buffering, flush per line)
//!             └─ Tee
//!                  ├─ ResponseSink   (HTTP body frames)
//!                  └─ PrefixWriter ("(127.0.0.1:5555) ")
//!                       └─ ConsoleSink (tracing events)
//! ```
//!
//! Top-level progress messages use a sibling `PrefixWriter` ("* ") on the
//! same root, so both share one line buffer.

mod console;
mod flush;
mod prefix;
mod response;

use std::io;
use std::sync::Arc;

pub use console::ConsoleSink;
pub use flush::LineFlushWriter;
pub use prefix::PrefixWriter;
pub use response::ResponseSink;

/// A destination for chunks of log output.
pub trait LogSink: Send + Sync {
    /// Accepts a chunk of bytes. Chunks need not end on line boundaries.
    fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Pushes anything buffered by this sink toward its final destination.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    /// Ends the current stream of writes, completing any partial line.
    fn close(&self) -> io::Result<()> {
        self.flush()
    }

    /// Writes `line` followed by a newline.
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.write(&data)
    }
}

pub type SharedSink = Arc<dyn LogSink>;

/// Duplicates every call to each of its sinks.
pub struct Tee {
    sinks: Vec<SharedSink>,
}

impl Tee {
    pub fn new(sinks: Vec<SharedSink>) -> Arc<Self> {
        Arc::new(Self { sinks })
    }

    fn each(&self, op: impl Fn(&dyn LogSink) -> io::Result<()>) -> io::Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = op(sink.as_ref()) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl LogSink for Tee {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.each(|sink| sink.write(data))
    }

    fn flush(&self) -> io::Result<()> {
        self.each(|sink| sink.flush())
    }

    fn close(&self) -> io::Result<()> {
        self.each(|sink| sink.close())
    }
}

/// Test double recording every call it receives.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Write(String),
        Flush,
        Close,
    }

    #[derive(Default)]
    pub struct MemorySink {
        events: Mutex<Vec<Event>>,
    }

    impl MemorySink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        /// Concatenation of everything written so far.
        pub fn text(&self) -> String {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::Write(s) => Some(s.as_str()),
                    _ => None,
                })
                .collect()
        }

        pub fn writes(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Event::Write(s) => Some(s.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl LogSink for MemorySink {
        fn write(&self, data: &[u8]) -> io::Result<()> {
            let text = String::from_utf8_lossy(data).into_owned();
            self.events.lock().unwrap().push(Event::Write(text));
            Ok(())
        }

        fn flush(&self) -> io::Result<()> {
            self.events.lock().unwrap().push(Event::Flush);
            Ok(())
        }

        fn close(&self) -> io::Result<()> {
            self.events.lock().unwrap().push(Event::Close);
            Ok(())
        }
    }

    /// Sink that fails every call.
    pub struct BrokenSink;

    impl LogSink for BrokenSink {
        fn write(&self, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken"))
        }
    }
}
