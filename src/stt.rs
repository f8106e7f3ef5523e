//! Realtime speech-to-text client.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::StreamClient;
use crate::config::{ClientConfig, Direction};
use crate::connection::ConnectionState;
use crate::error::Error;
use crate::messages::ControlCommand;
use crate::options::SttOptions;
use crate::sink::{CallbackSink, Sink, StreamHandler};

/// Speech-to-Text client for streaming audio recognition.
///
/// Audio goes out as binary frames. Transcription results arrive at the
/// sink as `Unhandled` events carrying the raw JSON.
pub struct SttClient {
    stream: StreamClient,
}

impl SttClient {
    /// Creates an STT client delivering events to `sink`.
    pub fn new(
        config: &ClientConfig,
        options: &SttOptions,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, Error> {
        Self::with_token(config, options, sink, CancellationToken::new())
    }

    /// Creates an STT client calling `handler` for every event.
    pub fn with_handler(
        config: &ClientConfig,
        options: &SttOptions,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Self, Error> {
        Self::new(config, options, Arc::new(CallbackSink::new(handler)))
    }

    /// Creates an STT client governed by `token`.
    pub fn with_token(
        config: &ClientConfig,
        options: &SttOptions,
        sink: Arc<dyn Sink>,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        let stream = StreamClient::new(
            config,
            Direction::Listen,
            &options.query_pairs(),
            sink,
            token,
        )?;
        Ok(Self { stream })
    }

    /// Wraps an existing listen-direction stream.
    pub fn from_stream(stream: StreamClient) -> Self {
        Self { stream }
    }

    /// Connects with the configured retry policy.
    pub async fn connect(&self) -> bool {
        self.stream.connect().await
    }

    /// Connects under `token` with up to `retries` dial attempts.
    pub async fn connect_with_cancel(&self, token: CancellationToken, retries: usize) -> bool {
        self.stream.connect_with_cancel(token, retries).await
    }

    /// Re-enables dialing and connects under `token`.
    pub async fn attempt_reconnect(&self, token: CancellationToken, retries: usize) -> bool {
        self.stream.attempt_reconnect(token, retries).await
    }

    /// Sends a chunk of audio for recognition.
    pub async fn send_audio(&self, audio: Vec<u8>) -> Result<(), Error> {
        debug!(len = audio.len(), "Sending STT audio");
        self.stream.write(audio).await
    }

    /// Keeps an idle session from timing out.
    pub async fn keep_alive(&self) -> Result<(), Error> {
        self.stream.write_control(&ControlCommand::KeepAlive).await
    }

    /// Asks the platform to finalize pending results.
    pub async fn finalize(&self) -> Result<(), Error> {
        self.stream.write_control(&ControlCommand::Finalize).await
    }

    /// Closes the session; see [`StreamClient::stop`].
    pub async fn stop(&self) {
        self.stream.stop().await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.stream.state()
    }

    /// Receiver of connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.stream.subscribe_state()
    }

    /// The underlying stream client.
    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }
}
