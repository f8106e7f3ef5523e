//! Duplex streaming client.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, Direction, RetryPolicy};
use crate::connection::{ConnectionManager, ConnectionState, Settings};
use crate::error::Error;
use crate::flow::FlowController;
use crate::messages::{self, ControlCommand};
use crate::sink::Sink;
use crate::ws::{Dialer, Frame, WsDialer};

/// Long-lived client for one streaming channel.
///
/// The socket is opened by [`connect`](Self::connect) or lazily by the first
/// write, and may be replaced any number of times while the client is reused.
/// [`stop`](Self::stop) is terminal until
/// [`attempt_reconnect`](Self::attempt_reconnect) is called with a new token.
pub struct StreamClient {
    conn: Arc<ConnectionManager>,
    retry: RetryPolicy,
    direction: Direction,
}

impl StreamClient {
    /// Creates a websocket client for `direction` with `query` options.
    pub fn new(
        config: &ClientConfig,
        direction: Direction,
        query: &[(String, String)],
        sink: Arc<dyn Sink>,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        let dialer = WsDialer::new(config, direction.path(), query)?;
        Ok(Self::with_dialer(
            config,
            direction,
            Arc::new(dialer),
            sink,
            token,
        ))
    }

    /// Creates a client over a custom dialer.
    pub fn with_dialer(
        config: &ClientConfig,
        direction: Direction,
        dialer: Arc<dyn Dialer>,
        sink: Arc<dyn Sink>,
        token: CancellationToken,
    ) -> Self {
        let close_command = match direction {
            Direction::Speak => ControlCommand::Close,
            Direction::Listen => ControlCommand::CloseStream,
        };
        let settings = Settings {
            retry: config.retry,
            close_grace: config.close_grace,
            close_command,
            log_frames: config.log_frames,
        };
        // Flush is a synthesis command; listen streams never auto-flush.
        let flow = match (direction, config.auto_flush) {
            (Direction::Speak, Some(delta)) => {
                Some(Arc::new(FlowController::new(delta, config.flush_tick)))
            }
            (Direction::Listen, Some(_)) => {
                debug!("Auto-flush ignored on the listen channel");
                None
            }
            (_, None) => None,
        };
        Self {
            conn: Arc::new(ConnectionManager::new(dialer, sink, settings, flow, token)),
            retry: config.retry,
            direction,
        }
    }

    /// Connects with the configured retry policy.
    pub async fn connect(&self) -> bool {
        self.connect_inner(self.retry, None, false).await
    }

    /// Connects under `token` with up to `retries` dial attempts.
    pub async fn connect_with_cancel(&self, token: CancellationToken, retries: usize) -> bool {
        self.connect_inner(self.retry.with_attempts(retries), Some(token), false)
            .await
    }

    /// Re-enables dialing and connects under `token`.
    ///
    /// This is the only way back after [`stop`](Self::stop) or exhausted retries.
    pub async fn attempt_reconnect(&self, token: CancellationToken, retries: usize) -> bool {
        info!(direction = ?self.direction, retries, "Attempting reconnect");
        self.connect_inner(self.retry.with_attempts(retries), Some(token), true)
            .await
    }

    async fn connect_inner(
        &self,
        policy: RetryPolicy,
        token: Option<CancellationToken>,
        allow_retry: bool,
    ) -> bool {
        match self.conn.connect(policy, token, allow_retry).await {
            Ok(()) => true,
            Err(e) => {
                warn!(direction = ?self.direction, error = %e, "Connect failed");
                false
            }
        }
    }

    /// Sends a binary payload.
    pub async fn write(&self, data: Vec<u8>) -> Result<(), Error> {
        self.conn.write(Frame::Binary(data)).await?;
        self.note_payload();
        Ok(())
    }

    /// Sends a control command.
    pub async fn write_control(&self, command: &ControlCommand) -> Result<(), Error> {
        self.conn.write_control(command).await?;
        if let ControlCommand::Speak { .. } = command {
            self.note_payload();
        }
        Ok(())
    }

    /// Sends any serializable value as a JSON text frame.
    ///
    /// A `Speak` or `Flush` envelope is accounted for like the same command
    /// sent through [`write_control`](Self::write_control).
    pub async fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Error> {
        let json = serde_json::to_string(value)?;
        let discriminator = messages::inspect(json.as_bytes()).ok();
        self.conn.write(Frame::Text(json)).await?;
        match (discriminator.as_deref(), self.conn.flow()) {
            (Some("Speak"), _) => self.note_payload(),
            (Some("Flush"), Some(flow)) => flow.record_flush(),
            _ => {}
        }
        Ok(())
    }

    /// Sends `Flush`.
    pub async fn flush(&self) -> Result<(), Error> {
        self.write_control(&ControlCommand::Flush).await
    }

    /// Sends `Reset`.
    pub async fn reset(&self) -> Result<(), Error> {
        self.write_control(&ControlCommand::Reset).await
    }

    /// Closes the socket gracefully and forbids implicit reconnection.
    pub async fn stop(&self) {
        info!(direction = ?self.direction, "Stopping stream client");
        self.conn.stop().await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Receiver of connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.subscribe_state()
    }

    /// Returns true while a socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Flushes sent and not yet acknowledged.
    pub fn outstanding_flushes(&self) -> u64 {
        self.conn.outstanding_flushes()
    }

    /// The channel this client talks to.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The cancellation token currently in force.
    pub fn token(&self) -> CancellationToken {
        self.conn.token()
    }

    fn note_payload(&self) {
        if let Some(flow) = self.conn.flow() {
            flow.note_payload();
        }
    }
}
