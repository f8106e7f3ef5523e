//! Event sinks.
//!
//! A [`Sink`] receives every decoded [`InboundEvent`] of a connection, in
//! read order, on the read-loop task. Two strategies exist:
//!
//! - [`CallbackSink`] calls one [`StreamHandler`] method per event. A slow
//!   handler holds up delivery of every later frame.
//! - [`ChannelSink`] broadcasts each event to every queue subscribed to its
//!   kind, decoupling consumers from the read loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, trace, warn};

use crate::messages::{
    ClearedMessage, CloseMessage, ErrorMessage, EventKind, FlushedMessage, InboundEvent,
    MetadataMessage, OpenMessage, WarningMessage,
};

/// Destination of inbound events.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Delivers one event. Returns once the event has been accepted.
    async fn deliver(&self, event: InboundEvent);
}

/// Application callbacks, one per event kind.
///
/// Every method defaults to doing nothing.
pub trait StreamHandler: Send + Sync {
    fn open(&self, _open: &OpenMessage) {}
    fn metadata(&self, _metadata: &MetadataMessage) {}
    fn flush(&self, _flushed: &FlushedMessage) {}
    fn clear(&self, _cleared: &ClearedMessage) {}
    fn warning(&self, _warning: &WarningMessage) {}
    fn error(&self, _error: &ErrorMessage) {}
    fn close(&self, _close: &CloseMessage) {}
    fn binary(&self, _data: &[u8]) {}
    fn unhandled(&self, _raw: &[u8]) {}
}

/// Sink calling a [`StreamHandler`] synchronously.
#[derive(Clone)]
pub struct CallbackSink {
    handler: Arc<dyn StreamHandler>,
}

impl CallbackSink {
    /// Wraps `handler`.
    pub fn new(handler: Arc<dyn StreamHandler>) -> Self {
        Self { handler }
    }
}

impl Default for CallbackSink {
    fn default() -> Self {
        Self::new(Arc::new(DebugHandler))
    }
}

#[async_trait]
impl Sink for CallbackSink {
    async fn deliver(&self, event: InboundEvent) {
        let handler = self.handler.as_ref();
        match &event {
            InboundEvent::Open(m) => handler.open(m),
            InboundEvent::Metadata(m) => handler.metadata(m),
            InboundEvent::Flushed(m) => handler.flush(m),
            InboundEvent::Cleared(m) => handler.clear(m),
            InboundEvent::Warning(m) => handler.warning(m),
            InboundEvent::Error(m) => handler.error(m),
            InboundEvent::Close(m) => handler.close(m),
            InboundEvent::Binary(data) => handler.binary(data),
            InboundEvent::Unhandled(raw) => handler.unhandled(raw),
        }
    }
}

/// Handler that pretty-prints every event. Used when none is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugHandler;

impl DebugHandler {
    fn print<T: serde::Serialize>(kind: &str, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => info!(kind, "\n{}", json),
            Err(e) => warn!(kind, error = %e, "Failed to render event"),
        }
    }
}

impl StreamHandler for DebugHandler {
    fn open(&self, open: &OpenMessage) {
        Self::print("Open", open);
    }

    fn metadata(&self, metadata: &MetadataMessage) {
        Self::print("Metadata", metadata);
    }

    fn flush(&self, flushed: &FlushedMessage) {
        Self::print("Flushed", flushed);
    }

    fn clear(&self, cleared: &ClearedMessage) {
        Self::print("Cleared", cleared);
    }

    fn warning(&self, warning: &WarningMessage) {
        Self::print("Warning", warning);
    }

    fn error(&self, error: &ErrorMessage) {
        Self::print("Error", error);
    }

    fn close(&self, close: &CloseMessage) {
        Self::print("Close", close);
    }

    fn binary(&self, data: &[u8]) {
        info!(kind = "Binary", len = data.len(), "Binary frame");
    }

    fn unhandled(&self, raw: &[u8]) {
        info!(kind = "Unhandled", raw = %String::from_utf8_lossy(raw), "Unhandled frame");
    }
}

/// Sink broadcasting events to per-kind queues.
///
/// Subscriptions are made before the sink is handed to a client. Each
/// subscriber of a kind receives every event of that kind.
#[derive(Default)]
pub struct ChannelSink {
    subscribers: HashMap<EventKind, Vec<mpsc::Sender<Arc<InboundEvent>>>>,
}

impl ChannelSink {
    /// Creates a sink with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bounded queue for `kind` and returns its receiving end.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        capacity: usize,
    ) -> mpsc::Receiver<Arc<InboundEvent>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.entry(kind).or_default().push(tx);
        rx
    }

    /// Creates a sink whose every kind is drained by a task pretty-printing
    /// events through [`DebugHandler`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn diagnostic() -> Self {
        let mut sink = Self::new();
        for kind in EventKind::ALL {
            let mut rx = sink.subscribe(kind, 16);
            tokio::spawn(async move {
                let printer = CallbackSink::default();
                while let Some(event) = rx.recv().await {
                    printer.deliver(event.as_ref().clone()).await;
                }
            });
        }
        sink
    }

    /// Number of queues subscribed to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn deliver(&self, event: InboundEvent) {
        let kind = event.kind();
        let Some(queues) = self.subscribers.get(&kind) else {
            trace!(?kind, "No subscriber for event");
            return;
        };
        let event = Arc::new(event);
        for queue in queues {
            if queue.send(Arc::clone(&event)).await.is_err() {
                warn!(?kind, "Subscriber dropped its receiver");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl StreamHandler for Recorder {
        fn flush(&self, flushed: &FlushedMessage) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("flush:{}", flushed.sequence_id));
        }

        fn binary(&self, data: &[u8]) {
            self.calls.lock().unwrap().push(format!("binary:{}", data.len()));
        }

        fn unhandled(&self, raw: &[u8]) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("unhandled:{}", String::from_utf8_lossy(raw)));
        }
    }

    #[tokio::test]
    async fn callback_sink_calls_matching_method() {
        let recorder = Arc::new(Recorder::default());
        let sink = CallbackSink::new(recorder.clone());

        sink.deliver(InboundEvent::Flushed(FlushedMessage {
            msg_type: "Flushed".into(),
            sequence_id: 7,
        }))
        .await;
        sink.deliver(InboundEvent::Binary(vec![0; 4])).await;
        sink.deliver(InboundEvent::Unhandled(b"{\"type\":\"X\"}".to_vec()))
            .await;
        sink.deliver(InboundEvent::Close(CloseMessage::new())).await;

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["flush:7", "binary:4", "unhandled:{\"type\":\"X\"}"]
        );
    }

    #[tokio::test]
    async fn channel_sink_broadcasts_to_every_subscriber() {
        let mut sink = ChannelSink::new();
        let mut first = sink.subscribe(EventKind::Binary, 4);
        let mut second = sink.subscribe(EventKind::Binary, 4);
        let mut closes = sink.subscribe(EventKind::Close, 4);
        assert_eq!(sink.subscriber_count(EventKind::Binary), 2);
        assert_eq!(sink.subscriber_count(EventKind::Open), 0);

        sink.deliver(InboundEvent::Binary(vec![1, 2, 3])).await;
        sink.deliver(InboundEvent::Open(OpenMessage::default())).await;
        sink.deliver(InboundEvent::Close(CloseMessage::new())).await;

        let a = first.recv().await.unwrap();
        let b = second.recv().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*a, InboundEvent::Binary(vec![1, 2, 3]));
        assert_eq!(closes.recv().await.unwrap().kind(), EventKind::Close);
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_sink_skips_dropped_subscribers() {
        let mut sink = ChannelSink::new();
        let dropped = sink.subscribe(EventKind::Warning, 1);
        let mut kept = sink.subscribe(EventKind::Warning, 1);
        drop(dropped);

        sink.deliver(InboundEvent::Warning(WarningMessage::default()))
            .await;
        assert_eq!(kept.recv().await.unwrap().kind(), EventKind::Warning);
    }
}
