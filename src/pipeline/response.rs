use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Bytes;
use hyper::body::Frame;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;

use super::LogSink;

/// Remote-facing leaf of the pipeline: each flush becomes one HTTP body frame.
///
/// A vanished client is not an error. Once the receiving side of the
/// response is gone, output is discarded so the build can run to completion.
/// Frames that find the channel full are dropped as well, so a slow reader
/// never holds more than the channel's capacity in memory.
pub struct ResponseSink {
    tx: Sender<Frame<Bytes>>,
    pending: Mutex<Vec<u8>>,
    disconnected: AtomicBool,
    lagging: AtomicBool,
}

impl ResponseSink {
    pub fn new(tx: Sender<Frame<Bytes>>) -> Arc<Self> {
        Arc::new(Self {
            tx,
            pending: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            lagging: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

impl LogSink for ResponseSink {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        if self.disconnected.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.extend_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        let chunk = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };

        match self.tx.try_send(Frame::data(Bytes::from(chunk))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if !self.lagging.swap(true, Ordering::AcqRel) {
                    tracing::warn!("client reading too slowly, dropping build output");
                }
            }
            Err(TrySendError::Closed(_)) => {
                if !self.disconnected.swap(true, Ordering::AcqRel) {
                    tracing::warn!("client disconnected, build continues without streaming");
                }
            }
        }
        Ok(())
    }
}
