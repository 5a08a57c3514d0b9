use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

/// Snapshot emitted whenever a task's transfer advances.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    /// Percentage in [0, 100].
    pub percent: f64,
    /// Bytes per second since the task started.
    pub speed: f64,
    /// Estimated seconds remaining, unknown while speed is zero.
    pub eta: Option<f64>,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Tracks bytes on the wire for one task. Speed is bytes transferred
/// over wall-clock time since the task started; ETA is remaining bytes
/// over current speed.
pub struct ProgressTracker {
    total_bytes: u64,
    bytes_sent: AtomicU64,
    started: Instant,
    last_emit: Mutex<Option<Instant>>,
    emit_interval: Duration,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            bytes_sent: AtomicU64::new(0),
            started: Instant::now(),
            last_emit: Mutex::new(None),
            emit_interval: Duration::from_millis(100),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Account for `n` more bytes on the wire.
    pub fn record(&self, n: u64) {
        let sent = self.bytes_sent.fetch_add(n, Ordering::Relaxed) + n;
        self.emit(sent, sent >= self.total_bytes);
    }

    /// Jump the transferred counter to an absolute position. Used by
    /// the chunked path, which advances once per acknowledged chunk.
    pub fn advance_to(&self, position: u64) {
        self.bytes_sent.store(position, Ordering::Relaxed);
        self.emit(position, true);
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        self.build_update(self.bytes_sent.load(Ordering::Relaxed))
    }

    fn emit(&self, sent: u64, force: bool) {
        let Some(callback) = &self.callback else {
            return;
        };

        if !force {
            let mut last = match self.last_emit.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            let now = Instant::now();
            match *last {
                Some(prev) if now.duration_since(prev) < self.emit_interval => return,
                _ => *last = Some(now),
            }
        }

        callback(self.build_update(sent));
    }

    fn build_update(&self, sent: u64) -> ProgressUpdate {
        let percent = if self.total_bytes == 0 {
            100.0
        } else {
            ((sent as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        };
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            sent as f64 / elapsed
        } else {
            0.0
        };
        let remaining = self.total_bytes.saturating_sub(sent);
        let eta = if speed > 0.0 {
            Some(remaining as f64 / speed)
        } else {
            None
        };

        ProgressUpdate {
            bytes_sent: sent,
            total_bytes: self.total_bytes,
            percent,
            speed,
            eta,
        }
    }
}

pin_project! {
    /// Counts the bytes a request body actually hands to the
    /// transport, so reported progress reflects real wire traffic.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        tracker: Arc<ProgressTracker>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, tracker: Arc<ProgressTracker>) -> Self {
        Self { inner, tracker }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    this.tracker.record(chunk.len() as u64);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
