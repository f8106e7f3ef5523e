//! Rust client library for realtime speech streaming over WebSocket:
//! text-to-speech (`speak`) and speech-to-text (`listen`).
//!
//! A client keeps one long-lived socket per channel. It dials lazily on the
//! first write, retries dialing with a fixed delay, and routes every inbound
//! frame to a [`Sink`] as a typed [`InboundEvent`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rust_speechstream::{
//!     ChannelSink, ClientConfig, EventKind, InboundEvent, TtsClient, TtsOptions,
//! };
//! use secrecy::SecretString;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rust_speechstream::Error> {
//!     let api_key = std::env::var("SPEECH_API_KEY").unwrap_or_default();
//!     let config = ClientConfig::new(SecretString::new(api_key));
//!
//!     let mut sink = ChannelSink::new();
//!     let mut audio = sink.subscribe(EventKind::Binary, 64);
//!     let mut closed = sink.subscribe(EventKind::Close, 1);
//!
//!     let client = TtsClient::new(&config, &TtsOptions::default(), Arc::new(sink))?;
//!     client.speak("Hello, world!").await?;
//!     client.flush().await?;
//!
//!     loop {
//!         tokio::select! {
//!             Some(event) = audio.recv() => {
//!                 if let InboundEvent::Binary(chunk) = event.as_ref() {
//!                     println!("Received audio chunk: {} bytes", chunk.len());
//!                 }
//!             }
//!             _ = closed.recv() => break,
//!         }
//!     }
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

mod classify;
mod client;
mod config;
mod connection;
mod error;
mod flow;
mod messages;
#[cfg(test)]
mod mock;
mod options;
mod router;
mod sink;
mod stt;
mod tts;
mod ws;

pub use classify::{
    classify, panic_event, Classification, FailureKind, ReadFailure, CLOSED_SOCKET_MARKER,
    FATAL_READ_MARKER, GRACEFUL_CLOSE_MARKER, PLATFORM_ERROR_MARKER,
};
pub use client::StreamClient;
pub use config::{
    AuthScheme, ClientConfig, Direction, RetryPolicy, DEFAULT_API_VERSION, DEFAULT_HOST,
};
pub use connection::ConnectionState;
pub use error::Error;
pub use messages::*;
pub use options::{SttOptions, TtsOptions};
pub use router::MessageRouter;
pub use sink::{CallbackSink, ChannelSink, DebugHandler, Sink, StreamHandler};
pub use stt::SttClient;
pub use tts::TtsClient;
pub use ws::{CloseReason, Dialer, Frame, Transport, WebSocket, WsDialer};
