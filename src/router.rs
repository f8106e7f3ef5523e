//! Routes inbound frames to a sink.

use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::messages::{self, EventKind, InboundEvent};
use crate::sink::Sink;

/// Stateless dispatcher from raw frames to typed sink deliveries.
#[derive(Clone)]
pub struct MessageRouter {
    sink: Arc<dyn Sink>,
}

impl MessageRouter {
    /// Creates a router delivering to `sink`.
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    /// Routes a text frame and returns the kind it was delivered as.
    ///
    /// Frames that are not a typed JSON envelope, or whose type is unknown,
    /// go to the sink as `Unhandled`. Fails only when a known type carries a
    /// malformed payload.
    pub async fn message(&self, frame: &[u8]) -> Result<EventKind, Error> {
        let discriminator = match messages::inspect(frame) {
            Ok(d) => d,
            Err(e) => {
                debug!(error = %e, "Text frame without type, routing as unhandled");
                self.sink.deliver(InboundEvent::Unhandled(frame.to_vec())).await;
                return Ok(EventKind::Unhandled);
            }
        };
        self.message_with(&discriminator, frame).await
    }

    /// Routes a text frame whose discriminator is already known.
    pub async fn message_with(
        &self,
        discriminator: &str,
        frame: &[u8],
    ) -> Result<EventKind, Error> {
        let event = messages::decode(discriminator, frame)?;
        let kind = event.kind();
        if kind == EventKind::Unhandled {
            debug!(msg_type = %discriminator, "Unhandled message type");
        }
        self.sink.deliver(event).await;
        Ok(kind)
    }

    /// Routes a binary frame without decoding it.
    pub async fn binary(&self, frame: Vec<u8>) {
        self.sink.deliver(InboundEvent::Binary(frame)).await;
    }

    /// Delivers an event built outside the decode path.
    pub async fn deliver(&self, event: InboundEvent) {
        self.sink.deliver(event).await;
    }
}
