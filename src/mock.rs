//! In-memory transports for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::messages::{EventKind, InboundEvent};
use crate::sink::Sink;
use crate::ws::{CloseReason, Dialer, Frame, Transport};

type Inbound = Result<Option<Frame>, Error>;

/// Transport fed by a [`MockRemote`] that records every frame sent to it.
pub(crate) struct MockTransport {
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    sent: parking_lot::Mutex<Vec<Frame>>,
    closed: CancellationToken,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, frame: Frame) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::Transport("use of closed network connection".into()));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Frame>, Error> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            next = inbound.recv() => next.unwrap_or(Ok(None)),
        }
    }

    async fn shutdown(&self) {
        self.closed.cancel();
    }
}

/// The platform side of a [`MockTransport`].
pub(crate) struct MockRemote {
    tx: mpsc::UnboundedSender<Inbound>,
    transport: Arc<MockTransport>,
}

impl MockRemote {
    fn pair() -> (Self, Arc<MockTransport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            inbound: Mutex::new(rx),
            sent: parking_lot::Mutex::new(Vec::new()),
            closed: CancellationToken::new(),
        });
        (
            Self {
                tx,
                transport: Arc::clone(&transport),
            },
            transport,
        )
    }

    pub fn text(&self, text: &str) {
        let _ = self.tx.send(Ok(Some(Frame::Text(text.to_string()))));
    }

    pub fn binary(&self, data: &[u8]) {
        let _ = self.tx.send(Ok(Some(Frame::Binary(data.to_vec()))));
    }

    pub fn close(&self, reason: Option<CloseReason>) {
        let _ = self.tx.send(Ok(Some(Frame::Close(reason))));
    }

    pub fn fail(&self, error: Error) {
        let _ = self.tx.send(Err(error));
    }

    pub fn sent(&self) -> Vec<Frame> {
        self.transport.sent.lock().clone()
    }

    /// Text frames sent so far.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.transport.closed.is_cancelled()
    }
}

/// Dialer that fails a fixed number of times, then hands out mock transports.
pub(crate) struct MockDialer {
    attempts: AtomicUsize,
    fail_first: usize,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

impl MockDialer {
    pub fn new(fail_first: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                fail_first,
                remotes,
            }),
            rx,
        )
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(usize::MAX).0
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self) -> Result<Arc<dyn Transport>, Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(Error::Transport("connection refused".into()));
        }
        let (remote, transport) = MockRemote::pair();
        let _ = self.remotes.send(remote);
        Ok(transport)
    }
}

/// Sink forwarding every event to a channel.
pub(crate) struct RecordingSink {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl RecordingSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn deliver(&self, event: InboundEvent) {
        if let InboundEvent::Unhandled(raw) = &event {
            assert_ne!(raw.as_slice(), b"panic", "handler asked to panic");
        }
        let _ = self.tx.send(event);
    }
}

/// Waits for the next recorded event.
pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) -> InboundEvent {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("sink dropped")
}

/// Waits for the `Open` event every session starts with.
pub(crate) async fn expect_open(rx: &mut mpsc::UnboundedReceiver<InboundEvent>) {
    assert_eq!(next_event(rx).await.kind(), EventKind::Open);
}
