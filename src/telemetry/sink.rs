//! # Telemetry Sink
//!
//! The single consumer of the event queue. Appends one JSON object per line to
//! the mission log, which is opened once and held for the whole session.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info};

use super::diagnostics::Diagnostics;
use super::event::TelemetryEvent;
use super::queue::EventReceiver;
use crate::error::Result;

/// Default bounded wait of the blocking dequeue
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// JSONL writer draining the event queue
pub struct Sink<W> {
    writer: W,
    idle_timeout: Duration,
    diagnostics: Arc<Diagnostics>,
    /// Records written since the last successful flush
    pending: u64,
    /// The log ends in a fragment left by a failed write
    broken_line: bool,
}

impl Sink<tokio::fs::File> {
    /// Open (or create) the log file in append mode
    ///
    /// Existing content is never truncated.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened
    pub async fn open(path: impl AsRef<Path>, diagnostics: Arc<Diagnostics>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        info!("Appending telemetry to {}", path.display());
        Ok(Self::new(file, diagnostics))
    }
}

impl<W: AsyncWrite + Unpin + Send> Sink<W> {
    /// Wrap an already opened writer
    ///
    /// # Arguments
    ///
    /// * `writer` - Destination of the JSON lines, positioned at its end
    /// * `diagnostics` - Shared counters for written records and write faults
    pub fn new(writer: W, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            writer,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            diagnostics,
            pending: 0,
            broken_line: false,
        }
    }

    /// Replace the bounded wait of the dequeue (default 100 ms)
    ///
    /// This is also the longest the sink takes to notice a stop request.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Drain the queue until stopped
    ///
    /// Waits for events with a bounded timeout, so the loop never spins while
    /// idle and notices `stop` within one timeout. On stop, or once every
    /// producer has hung up, whatever is still queued is written before
    /// returning.
    ///
    /// A failed record is counted in diagnostics and skipped; the loop keeps going.
    pub async fn run(mut self, mut queue: EventReceiver, mut stop: watch::Receiver<bool>) -> W {
        debug!("Telemetry sink started");

        loop {
            tokio::select! {
                // Stop requested (or the supervisor went away)
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }

                event = queue.dequeue_timeout(self.idle_timeout) => {
                    match event {
                        Some(event) => {
                            self.write(&event).await;
                            for event in queue.drain_all() {
                                self.write(&event).await;
                            }
                            self.flush().await;
                        }
                        None if queue.is_closed() => break,
                        None => {}
                    }
                }
            }
        }

        for event in queue.drain_all() {
            self.write(&event).await;
        }
        self.flush().await;
        debug!(written = self.diagnostics.records_written(), "Telemetry sink stopped");
        self.writer
    }

    /// Write one record; failures are reported, never propagated
    ///
    /// A record only counts as written once the batch it belongs to has been
    /// flushed.
    async fn write(&mut self, event: &TelemetryEvent) {
        let mut line = match event.to_json_line() {
            Ok(line) => line,
            Err(e) => {
                self.diagnostics.record_write_fault(&e);
                return;
            }
        };
        line.push('\n');

        // Terminate the fragment so this record starts on its own line
        if self.broken_line {
            if let Err(e) = self.writer.write_all(b"\n").await {
                self.diagnostics.record_write_fault(&e);
                return;
            }
            self.broken_line = false;
        }

        match write_line(&mut self.writer, line.as_bytes()).await {
            Ok(()) => self.pending += 1,
            Err((written, e)) => {
                self.broken_line = written > 0;
                self.diagnostics.record_write_fault(&e);
            }
        }
    }

    async fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        match self.writer.flush().await {
            Ok(()) => self.diagnostics.record_written(pending),
            Err(e) => {
                // Part of the batch may have reached the file
                self.broken_line = true;
                self.diagnostics.record_write_fault(&e);
            }
        }
    }
}

/// `write_all` that also reports how many bytes went out before a failure
async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    mut buf: &[u8],
) -> std::result::Result<(), (usize, io::Error)> {
    let mut written = 0;
    while !buf.is_empty() {
        match writer.write(buf).await {
            Ok(0) => return Err((written, io::ErrorKind::WriteZero.into())),
            Ok(n) => {
                written += n;
                buf = &buf[n..];
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err((written, e)),
        }
    }
    Ok(())
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Writer that fails a scripted number of writes, then records the rest
    #[derive(Default)]
    pub struct FlakyWriter {
        pub fail_next: usize,
        /// A failing write first accepts half of its buffer
        pub short_write: bool,
        pub fail_flush: usize,
        pub written: Vec<u8>,
        pub half_written: bool,
    }

    impl AsyncWrite for FlakyWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail_next > 0 {
                if self.short_write && !self.half_written {
                    let half = buf.len() / 2;
                    self.half_written = true;
                    self.written.extend_from_slice(&buf[..half]);
                    return Poll::Ready(Ok(half));
                }
                self.half_written = false;
                self.fail_next -= 1;
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "Mock disk full")));
            }
            self.written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            if self.fail_flush > 0 {
                self.fail_flush -= 1;
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "Mock flush failed")));
            }
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }
}
