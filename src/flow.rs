//! Automatic flushing of idle synthesis streams.
//!
//! When enabled, a timer checks every tick whether payload was sent and then
//! nothing else for longer than the configured window; if so it sends one
//! `Flush`. Outstanding flushes are counted for diagnostics only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::ConnectionManager;
use crate::messages::ControlCommand;

/// Flush timer state shared by the write path, the read loop and the timer.
pub struct FlowController {
    auto_flush_delta: Duration,
    tick: Duration,
    last_send: Mutex<Option<Instant>>,
    outstanding: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlowController {
    /// Creates a controller flushing after `auto_flush_delta` of quiet.
    pub fn new(auto_flush_delta: Duration, tick: Duration) -> Self {
        Self {
            auto_flush_delta,
            tick,
            last_send: Mutex::new(None),
            outstanding: AtomicU64::new(0),
            task: Mutex::new(None),
        }
    }

    /// Records that application payload was just sent.
    pub fn note_payload(&self) {
        *self.last_send.lock() = Some(Instant::now());
    }

    /// Records a `Flush` command on the wire.
    pub fn record_flush(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a `Flushed` acknowledgement from the platform.
    pub fn acknowledge(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Flushes sent and not yet acknowledged.
    pub fn outstanding(&self) -> u64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Clears the last-send mark if the quiet window has elapsed.
    ///
    /// Returns whether a flush is due.
    fn take_due(&self, now: Instant) -> bool {
        let mut last = self.last_send.lock();
        match *last {
            Some(at) if now.saturating_duration_since(at) > self.auto_flush_delta => {
                *last = None;
                true
            }
            _ => false,
        }
    }

    /// Starts the timer unless one is already running.
    pub(crate) fn ensure_running(
        self: &Arc<Self>,
        conn: &Arc<ConnectionManager>,
        token: CancellationToken,
    ) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let flow = Arc::clone(self);
        let conn = Arc::clone(conn);
        *task = Some(tokio::spawn(async move { flow.run(conn, token).await }));
    }

    /// Stops the timer; the next successful connect or dial restarts it.
    pub(crate) fn halt(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    async fn run(self: Arc<Self>, conn: Arc<ConnectionManager>, token: CancellationToken) {
        debug!(delta = ?self.auto_flush_delta, "Auto-flush timer started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
            if !self.take_due(Instant::now()) {
                continue;
            }
            debug!("Stream idle, sending automatic flush");
            if let Err(e) = conn.write_control(&ControlCommand::Flush).await {
                warn!(error = %e, "Automatic flush failed");
            }
        }
        debug!("Auto-flush timer stopped");
    }
}
