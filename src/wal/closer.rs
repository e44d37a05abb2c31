//! Idle Segment File Closer
//!
//! Segments keep their file handle open between accesses. A single thread
//! per log periodically drops handles that have not been touched for
//! `file_ttl`; the next access reopens them.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{Result, WalError};

use super::segment::SegmentShared;

/// Lower bound for the sweep interval
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

type Registry = Arc<Mutex<Vec<Weak<SegmentShared>>>>;

pub(crate) struct AutoCloser {
    registry: Registry,
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
    storage_name: String,
}

impl AutoCloser {
    pub(crate) fn spawn(storage_name: &str, file_ttl: Duration) -> Result<Self> {
        let registry: Registry = Arc::new(Mutex::new(Vec::new()));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        let sweep_registry = Arc::clone(&registry);
        let thread = thread::Builder::new()
            .name(format!("pagelog-closer-{}", storage_name))
            .spawn(move || {
                let interval = (file_ttl / 2).max(MIN_SWEEP_INTERVAL);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => sweep(&sweep_registry, file_ttl),
                        _ => break,
                    }
                }
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            registry,
            stop_tx: Some(stop_tx),
            done_rx,
            thread: Some(thread),
            storage_name: storage_name.to_string(),
        })
    }

    /// Track a segment; dropped segments are pruned on the next sweep
    pub(crate) fn register(&self, segment: &Arc<SegmentShared>) {
        self.registry.lock().push(Arc::downgrade(segment));
    }

    pub(crate) fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        // Disconnecting the stop channel ends the loop
        if self.stop_tx.take().is_none() {
            return Ok(());
        }

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                return Err(WalError::Shutdown(format!(
                    "file closer of {} did not stop within {:?}",
                    self.storage_name, timeout
                )));
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
        }

        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.registry.lock().clear();
        Ok(())
    }
}

fn sweep(registry: &Registry, file_ttl: Duration) {
    let mut closed = 0usize;
    registry.lock().retain(|weak| match weak.upgrade() {
        Some(segment) => {
            if segment.close_if_idle(file_ttl) {
                closed += 1;
            }
            true
        }
        None => false,
    });
    if closed > 0 {
        tracing::trace!(closed, "idle segment files closed");
    }
}
