//! Realtime text-to-speech client.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::StreamClient;
use crate::config::{ClientConfig, Direction};
use crate::connection::ConnectionState;
use crate::error::Error;
use crate::messages::ControlCommand;
use crate::options::TtsOptions;
use crate::sink::{CallbackSink, Sink, StreamHandler};

/// Text-to-Speech client for streaming audio synthesis.
///
/// Text goes out as `Speak` commands; synthesized audio comes back to the
/// sink as `Binary` events.
pub struct TtsClient {
    stream: StreamClient,
}

impl TtsClient {
    /// Creates a TTS client delivering events to `sink`.
    pub fn new(
        config: &ClientConfig,
        options: &TtsOptions,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, Error> {
        Self::with_token(config, options, sink, CancellationToken::new())
    }

    /// Creates a TTS client calling `handler` for every event.
    pub fn with_handler(
        config: &ClientConfig,
        options: &TtsOptions,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<Self, Error> {
        Self::new(config, options, Arc::new(CallbackSink::new(handler)))
    }

    /// Creates a TTS client governed by `token`.
    pub fn with_token(
        config: &ClientConfig,
        options: &TtsOptions,
        sink: Arc<dyn Sink>,
        token: CancellationToken,
    ) -> Result<Self, Error> {
        let stream = StreamClient::new(
            config,
            Direction::Speak,
            &options.query_pairs(),
            sink,
            token,
        )?;
        Ok(Self { stream })
    }

    /// Wraps an existing speak-direction stream.
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

    /// Sends text for synthesis.
    pub async fn speak(&self, text: &str) -> Result<(), Error> {
        debug!(len = text.len(), "Sending TTS text");
        self.stream
            .write_control(&ControlCommand::speak(text))
            .await
    }

    /// Asks the platform to synthesize everything sent so far.
    pub async fn flush(&self) -> Result<(), Error> {
        self.stream.flush().await
    }

    /// Drops text and audio buffered on the platform.
    pub async fn clear(&self) -> Result<(), Error> {
        self.stream.write_control(&ControlCommand::Clear).await
    }

    /// Resets the synthesis session.
    pub async fn reset(&self) -> Result<(), Error> {
        self.stream.reset().await
    }

    /// Sends an arbitrary control command.
    pub async fn write_control(&self, command: &ControlCommand) -> Result<(), Error> {
        self.stream.write_control(command).await
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

    /// Flushes sent and not yet acknowledged.
    pub fn outstanding_flushes(&self) -> u64 {
        self.stream.outstanding_flushes()
    }

    /// The underlying stream client.
    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use super::*;
    use crate::mock::{MockDialer, RecordingSink};

    #[tokio::test]
    async fn speak_clear_and_flush_commands() {
        let config = ClientConfig::new(SecretString::new("key".to_string()))
            .with_close_grace(Duration::from_millis(1));
        let (dialer, mut remotes) = MockDialer::new(0);
        let (sink, _events) = RecordingSink::new();
        let client = TtsClient::from_stream(StreamClient::with_dialer(
            &config,
            Direction::Speak,
            dialer,
            sink,
            CancellationToken::new(),
        ));

        assert!(client.connect().await);
        let remote = remotes.recv().await.unwrap();
        client.speak("Hello, world!").await.unwrap();
        client.flush().await.unwrap();
        client.clear().await.unwrap();
        client.stop().await;

        assert_eq!(
            remote.sent_texts(),
            vec![
                r#"{"type":"Speak","text":"Hello, world!"}"#,
                r#"{"type":"Flush"}"#,
                r#"{"type":"Clear"}"#,
                r#"{"type":"Close"}"#,
            ]
        );
        assert!(client.speak("late").await.is_err());
    }
}
