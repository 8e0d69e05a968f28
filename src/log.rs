//! Asynchronous detail logging and injected output sinks
//!
//! Detail events are produced on timing-sensitive threads (the issue
//! scheduler, SUT completion threads, the settings resolver) and must not
//! block on file I/O. Every producer holds a cheap clonable [`DetailSink`]
//! that enqueues immutable event records onto an MPSC channel; a single
//! logger thread owns the output stream and drains the queue in FIFO order
//! per producer.
//!
//! The summary artifact is written synchronously at the end of the run by the
//! reporter; only detail events flow through the logger thread.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{CargarError, Result};

// ============================================================================
// Log events
// ============================================================================

/// One immutable record sent to the logger thread.
#[derive(Debug)]
enum LogEvent {
    /// Ordinary detail line.
    Detail(String),
    /// Error line; rendered with an `ERROR :` prefix.
    Error(String),
    /// Barrier: the logger acks once everything before it is written.
    Flush(Sender<()>),
    /// Drain and exit.
    Shutdown,
}

// ============================================================================
// DetailSink
// ============================================================================

/// Clonable producer handle for the asynchronous detail log.
///
/// Enqueueing never blocks on I/O; if the logger thread is gone the event is
/// dropped, which only happens during teardown.
#[derive(Debug, Clone)]
pub struct DetailSink {
    tx: Sender<LogEvent>,
}

impl DetailSink {
    /// Append one detail line.
    pub fn detail(&self, line: impl Into<String>) {
        let _ = self.tx.send(LogEvent::Detail(line.into()));
    }

    /// Append one error line.
    ///
    /// Configuration errors report the requested value and the fallback in
    /// use; invariant violations report the impossible state observed.
    pub fn error(&self, line: impl Into<String>) {
        let _ = self.tx.send(LogEvent::Error(line.into()));
    }
}

// ============================================================================
// AsyncLogger
// ============================================================================

/// Owner of the logger thread and the detail output stream.
pub struct AsyncLogger {
    tx: Sender<LogEvent>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncLogger {
    /// Spawn the logger thread around an injected detail writer.
    #[must_use]
    pub fn spawn(mut detail: Box<dyn Write + Send>) -> Self {
        let (tx, rx): (Sender<LogEvent>, Receiver<LogEvent>) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("cargar-logger".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    match event {
                        LogEvent::Detail(line) => {
                            let _ = writeln!(detail, "{line}");
                        }
                        LogEvent::Error(line) => {
                            let _ = writeln!(detail, "ERROR : {line}");
                        }
                        LogEvent::Flush(ack) => {
                            let _ = detail.flush();
                            let _ = ack.send(());
                        }
                        LogEvent::Shutdown => break,
                    }
                }
                let _ = detail.flush();
            })
            .expect("failed to spawn logger thread");
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Producer handle for this logger.
    #[must_use]
    pub fn sink(&self) -> DetailSink {
        DetailSink {
            tx: self.tx.clone(),
        }
    }

    /// Block until every event enqueued so far has been written out.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(LogEvent::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Stop the logger thread after draining the queue.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(LogEvent::Shutdown);
            let _ = handle.join();
        }
    }
}

impl Drop for AsyncLogger {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

// ============================================================================
// Injected outputs
// ============================================================================

/// The pair of output streams a run writes its artifacts to.
pub struct LogOutputs {
    /// Destination of the end-of-run summary artifact.
    pub summary: Box<dyn Write + Send>,
    /// Destination of the line-oriented detail log.
    pub detail: Box<dyn Write + Send>,
}

impl LogOutputs {
    /// Write both artifacts to files at the given paths.
    pub fn to_files(summary_path: &std::path::Path, detail_path: &std::path::Path) -> Result<Self> {
        let summary = std::fs::File::create(summary_path)
            .map_err(|e| CargarError::LogOutput(format!("{}: {e}", summary_path.display())))?;
        let detail = std::fs::File::create(detail_path)
            .map_err(|e| CargarError::LogOutput(format!("{}: {e}", detail_path.display())))?;
        Ok(Self {
            summary: Box::new(std::io::BufWriter::new(summary)),
            detail: Box::new(std::io::BufWriter::new(detail)),
        })
    }

    /// Discard both artifacts.
    #[must_use]
    pub fn discard() -> Self {
        Self {
            summary: Box::new(std::io::sink()),
            detail: Box::new(std::io::sink()),
        }
    }

    /// Capture both artifacts in shared in-memory buffers.
    ///
    /// Returns the outputs plus the two capture handles; used by tests and by
    /// harnesses that post-process logs in memory.
    #[must_use]
    pub fn captured() -> (Self, SharedBuffer, SharedBuffer) {
        let summary = SharedBuffer::default();
        let detail = SharedBuffer::default();
        let outputs = Self {
            summary: Box::new(summary.clone()),
            detail: Box::new(detail.clone()),
        };
        (outputs, summary, detail)
    }
}

/// Clonable in-memory `Write` target backed by a shared byte buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Current contents as UTF-8 (lossy).
    #[must_use]
    pub fn contents(&self) -> String {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        String::from_utf8_lossy(&guard).into_owned()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        let guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.len()
    }

    /// Whether nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
