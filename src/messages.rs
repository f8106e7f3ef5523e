//! Control and event messages of the streaming protocol.
//!
//! Every text frame is a flat JSON object whose `type` field names the
//! message. Inbound frames are inspected for that field first and decoded
//! into a typed [`InboundEvent`] second; unknown types are kept as raw bytes.

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Outbound
// ============================================================================

/// Control command sent to the platform as a text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ControlCommand {
    /// Text to synthesize.
    Speak {
        /// The text.
        text: String,
    },
    /// Synthesize everything buffered so far.
    Flush,
    /// Drop buffered text and audio.
    Clear,
    /// Reset the synthesis session.
    Reset,
    /// End the synthesis session.
    Close,
    /// Keep an idle transcription session open.
    KeepAlive,
    /// Finalize pending transcription results.
    Finalize,
    /// End the transcription session.
    CloseStream,
}

impl ControlCommand {
    /// Creates a `Speak` command.
    pub fn speak(text: impl Into<String>) -> Self {
        ControlCommand::Speak { text: text.into() }
    }
}

/// Serializes a command to its canonical JSON form.
pub fn encode(command: &ControlCommand) -> Result<String, Error> {
    Ok(serde_json::to_string(command)?)
}

// ============================================================================
// Inbound
// ============================================================================

/// Generic message with just a type field, used for initial parsing.
#[derive(Debug, Clone, Deserialize)]
struct GenericMessage {
    #[serde(rename = "type")]
    msg_type: String,
}

/// Extracts the `type` discriminator of a text frame.
///
/// Fields other than `type` are ignored.
pub fn inspect(frame: &[u8]) -> Result<String, Error> {
    let generic: GenericMessage = serde_json::from_slice(frame)?;
    Ok(generic.msg_type)
}

/// Session opened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenMessage {
    /// The message type (always "Open").
    #[serde(rename = "type", default)]
    pub msg_type: String,
}

impl OpenMessage {
    pub(crate) fn new() -> Self {
        Self {
            msg_type: "Open".to_string(),
        }
    }
}

/// Session metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataMessage {
    /// The message type (always "Metadata").
    #[serde(rename = "type", default)]
    pub msg_type: String,
    /// Request ID for this session.
    #[serde(default)]
    pub request_id: String,
    /// Any further metadata fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Acknowledgement of a `Flush` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushedMessage {
    /// The message type (always "Flushed").
    #[serde(rename = "type", default)]
    pub msg_type: String,
    /// Sequence number of the flushed segment.
    #[serde(default)]
    pub sequence_id: u64,
}

/// Acknowledgement of a `Clear` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearedMessage {
    /// The message type (always "Cleared").
    #[serde(rename = "type", default)]
    pub msg_type: String,
    /// Sequence number of the cleared segment.
    #[serde(default)]
    pub sequence_id: u64,
}

/// Non-fatal warning from the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningMessage {
    /// The message type (always "Warning").
    #[serde(rename = "type", default)]
    pub msg_type: String,
    /// Warning code.
    #[serde(default)]
    pub warn_code: String,
    /// Warning message.
    #[serde(default)]
    pub warn_msg: String,
}

/// Error reported by the platform or raised locally by the read loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// The message type (always "Error").
    #[serde(rename = "type", default)]
    pub msg_type: String,
    /// Error code.
    #[serde(default)]
    pub err_code: String,
    /// Error message.
    #[serde(default)]
    pub err_msg: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Error variant.
    #[serde(default)]
    pub variant: String,
}

impl ErrorMessage {
    /// Creates an error message with the canonical type tag.
    pub fn new(
        err_code: impl Into<String>,
        err_msg: impl Into<String>,
        description: impl Into<String>,
        variant: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: "Error".to_string(),
            err_code: err_code.into(),
            err_msg: err_msg.into(),
            description: description.into(),
            variant: variant.into(),
        }
    }
}

/// Session closed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloseMessage {
    /// The message type (always "Close").
    #[serde(rename = "type", default)]
    pub msg_type: String,
}

impl CloseMessage {
    pub(crate) fn new() -> Self {
        Self {
            msg_type: "Close".to_string(),
        }
    }
}

/// Kind of an inbound event, used to key subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Metadata,
    Flushed,
    Cleared,
    Warning,
    Error,
    Close,
    Binary,
    Unhandled,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 9] = [
        EventKind::Open,
        EventKind::Metadata,
        EventKind::Flushed,
        EventKind::Cleared,
        EventKind::Warning,
        EventKind::Error,
        EventKind::Close,
        EventKind::Binary,
        EventKind::Unhandled,
    ];

    /// Dispatch table from text-frame discriminator to event kind.
    ///
    /// Returns `None` for discriminators this client does not know.
    pub fn from_discriminator(discriminator: &str) -> Option<EventKind> {
        match discriminator {
            "Open" => Some(EventKind::Open),
            "Metadata" => Some(EventKind::Metadata),
            "Flushed" => Some(EventKind::Flushed),
            "Cleared" => Some(EventKind::Cleared),
            "Warning" => Some(EventKind::Warning),
            "Error" => Some(EventKind::Error),
            "Close" => Some(EventKind::Close),
            _ => None,
        }
    }
}

/// Event delivered to a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Open(OpenMessage),
    Metadata(MetadataMessage),
    Flushed(FlushedMessage),
    Cleared(ClearedMessage),
    Warning(WarningMessage),
    Error(ErrorMessage),
    Close(CloseMessage),
    /// Binary frame payload, untouched.
    Binary(Vec<u8>),
    /// Text frame of an unknown type, raw bytes untouched.
    Unhandled(Vec<u8>),
}

impl InboundEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Open(_) => EventKind::Open,
            InboundEvent::Metadata(_) => EventKind::Metadata,
            InboundEvent::Flushed(_) => EventKind::Flushed,
            InboundEvent::Cleared(_) => EventKind::Cleared,
            InboundEvent::Warning(_) => EventKind::Warning,
            InboundEvent::Error(_) => EventKind::Error,
            InboundEvent::Close(_) => EventKind::Close,
            InboundEvent::Binary(_) => EventKind::Binary,
            InboundEvent::Unhandled(_) => EventKind::Unhandled,
        }
    }
}

/// Decodes a text frame whose discriminator was already extracted by [`inspect`].
///
/// Unknown discriminators decode to [`InboundEvent::Unhandled`]; a known
/// discriminator with a malformed payload is an error.
pub fn decode(discriminator: &str, frame: &[u8]) -> Result<InboundEvent, Error> {
    let kind = match EventKind::from_discriminator(discriminator) {
        Some(kind) => kind,
        None => return Ok(InboundEvent::Unhandled(frame.to_vec())),
    };
    let event = match kind {
        EventKind::Open => InboundEvent::Open(serde_json::from_slice(frame)?),
        EventKind::Metadata => InboundEvent::Metadata(serde_json::from_slice(frame)?),
        EventKind::Flushed => InboundEvent::Flushed(serde_json::from_slice(frame)?),
        EventKind::Cleared => InboundEvent::Cleared(serde_json::from_slice(frame)?),
        EventKind::Warning => InboundEvent::Warning(serde_json::from_slice(frame)?),
        EventKind::Error => InboundEvent::Error(serde_json::from_slice(frame)?),
        EventKind::Close => InboundEvent::Close(serde_json::from_slice(frame)?),
        EventKind::Binary | EventKind::Unhandled => InboundEvent::Unhandled(frame.to_vec()),
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_encode_to_flat_envelopes() {
        assert_eq!(
            encode(&ControlCommand::speak("hello")).unwrap(),
            r#"{"type":"Speak","text":"hello"}"#
        );
        assert_eq!(encode(&ControlCommand::Flush).unwrap(), r#"{"type":"Flush"}"#);
        assert_eq!(encode(&ControlCommand::Clear).unwrap(), r#"{"type":"Clear"}"#);
        assert_eq!(encode(&ControlCommand::Reset).unwrap(), r#"{"type":"Reset"}"#);
        assert_eq!(encode(&ControlCommand::Close).unwrap(), r#"{"type":"Close"}"#);
        assert_eq!(
            encode(&ControlCommand::KeepAlive).unwrap(),
            r#"{"type":"KeepAlive"}"#
        );
        assert_eq!(
            encode(&ControlCommand::CloseStream).unwrap(),
            r#"{"type":"CloseStream"}"#
        );
    }

    #[test]
    fn inspect_reads_only_the_discriminator() {
        let frame = br#"{"type":"Results","channel":{"alternatives":[]},"is_final":true}"#;
        assert_eq!(inspect(frame).unwrap(), "Results");
        assert!(inspect(b"not json").is_err());
        assert!(inspect(br#"{"kind":"Open"}"#).is_err());
    }

    #[test]
    fn decode_flushed_keeps_sequence_id() {
        let frame = br#"{"type":"Flushed","sequence_id":3}"#;
        let event = decode(&inspect(frame).unwrap(), frame).unwrap();
        match event {
            InboundEvent::Flushed(msg) => assert_eq!(msg.sequence_id, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_error_and_warning_fields() {
        let frame = br#"{"type":"Error","err_code":"DATA-0000","err_msg":"bad","description":"d","variant":"v"}"#;
        let event = decode("Error", frame).unwrap();
        assert_eq!(
            event,
            InboundEvent::Error(ErrorMessage::new("DATA-0000", "bad", "d", "v"))
        );

        let frame = br#"{"type":"Warning","warn_code":"W1","warn_msg":"slow down"}"#;
        match decode("Warning", frame).unwrap() {
            InboundEvent::Warning(w) => {
                assert_eq!(w.warn_code, "W1");
                assert_eq!(w.warn_msg, "slow down");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn metadata_keeps_unknown_fields() {
        let frame = br#"{"type":"Metadata","request_id":"abc","model_name":"aura"}"#;
        match decode("Metadata", frame).unwrap() {
            InboundEvent::Metadata(meta) => {
                assert_eq!(meta.request_id, "abc");
                assert_eq!(meta.extra["model_name"], "aura");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_discriminator_keeps_raw_bytes() {
        let frame = br#"{"type":"UtteranceEnd","last_word_end":1.5}"#;
        let event = decode(&inspect(frame).unwrap(), frame).unwrap();
        assert_eq!(event, InboundEvent::Unhandled(frame.to_vec()));
        assert_eq!(event.kind(), EventKind::Unhandled);
    }

    #[test]
    fn malformed_known_payload_is_an_error() {
        let frame = br#"{"type":"Flushed","sequence_id":"three"}"#;
        assert!(decode("Flushed", frame).is_err());
    }
}
