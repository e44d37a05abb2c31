//! Background Segment Writer
//!
//! One thread per active segment that turns the in-memory tail into
//! durable pages.
//!
//! ## Commands
//! - `Write`: pending pages crossed the cache threshold, write early
//! - `Flush`: write everything and reply with the outcome
//! - `Stop`: optionally write, then exit
//!
//! With no command queued the thread wakes up every `commit_delay` and
//! writes whatever is pending.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::{Result, WalError};

use super::segment::SegmentShared;

/// Maximum number of queued commands
const QUEUE_CAPACITY: usize = 64;

enum WriterCommand {
    Write,
    Flush(Sender<Result<()>>),
    Stop { flush: bool, done: Sender<Result<()>> },
}

/// Cloneable sender side of a background writer
#[derive(Clone)]
pub(crate) struct WriterHandle {
    tx: Sender<WriterCommand>,
}

impl WriterHandle {
    /// Ask for an early write; dropped if the queue is full
    pub(crate) fn nudge(&self) {
        let _ = self.tx.try_send(WriterCommand::Write);
    }

    /// Write pending pages on the writer thread
    ///
    /// Returns `None` if the writer has already stopped.
    pub(crate) fn flush(&self) -> Option<Result<()>> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        if self.tx.send(WriterCommand::Flush(reply_tx)).is_err() {
            return None;
        }
        reply_rx.recv().ok()
    }
}

/// Owner of the writer thread
pub(crate) struct BackgroundWriter {
    handle: WriterHandle,
    thread: Option<JoinHandle<()>>,
    label: String,
    shutdown_timeout: Duration,
}

impl BackgroundWriter {
    pub(crate) fn spawn(
        segment: Arc<SegmentShared>,
        commit_delay: Duration,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let (tx, rx) = channel::bounded(QUEUE_CAPACITY);
        let label = segment.label();

        let thread = thread::Builder::new()
            .name(format!("pagelog-writer-{}", label))
            .spawn(move || run(segment, rx, commit_delay))?;

        Ok(Self {
            handle: WriterHandle { tx },
            thread: Some(thread),
            label,
            shutdown_timeout,
        })
    }

    pub(crate) fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    pub(crate) fn nudge(&self) {
        self.handle.nudge();
    }

    /// Stop the thread and wait for it within the shutdown timeout
    pub(crate) fn stop(mut self, flush: bool) -> Result<()> {
        let (done_tx, done_rx) = channel::bounded(1);
        let outcome = if self
            .handle
            .tx
            .send(WriterCommand::Stop {
                flush,
                done: done_tx,
            })
            .is_ok()
        {
            match done_rx.recv_timeout(self.shutdown_timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(WalError::Shutdown(format!(
                        "background writer of {} did not stop within {:?}",
                        self.label, self.shutdown_timeout
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => Ok(()),
            }
        } else {
            Ok(())
        };

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                return Err(WalError::Shutdown(format!(
                    "background writer of {} panicked",
                    self.label
                )));
            }
        }
        outcome
    }
}

fn run(segment: Arc<SegmentShared>, rx: Receiver<WriterCommand>, commit_delay: Duration) {
    tracing::debug!(segment = %segment.label(), "background writer started");

    loop {
        match rx.recv_timeout(commit_delay) {
            Ok(WriterCommand::Write) | Err(RecvTimeoutError::Timeout) => {
                if let Err(e) = segment.write_pending() {
                    tracing::error!(segment = %segment.label(), error = %e, "background write failed");
                }
            }
            Ok(WriterCommand::Flush(reply)) => {
                let _ = reply.send(segment.write_pending());
            }
            Ok(WriterCommand::Stop { flush, done }) => {
                let result = if flush { segment.write_pending() } else { Ok(()) };
                let _ = done.send(result);
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Owner dropped without stopping us
                if let Err(e) = segment.write_pending() {
                    tracing::error!(segment = %segment.label(), error = %e, "final background write failed");
                }
                break;
            }
        }
    }

    tracing::debug!(segment = %segment.label(), "background writer stopped");
}
