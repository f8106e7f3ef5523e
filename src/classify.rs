//! Classification of read-loop failures.
//!
//! Structured transport errors are matched first. Errors known only by their
//! description fall back to marker strings.

use std::any::Any;
use std::io::ErrorKind;

use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::error::Error;
use crate::messages::ErrorMessage;
use crate::ws::CloseReason;

/// Marker of a normal close in textual transport errors.
pub const GRACEFUL_CLOSE_MARKER: &str = "close 1000";
/// Marker of a read on a socket that was already closed locally.
pub const CLOSED_SOCKET_MARKER: &str = "use of closed network connection";
/// Marker of an unrecoverable read failure.
pub const FATAL_READ_MARKER: &str = "can't assign requested address";
/// Marker of an error reported by the platform.
pub const PLATFORM_ERROR_MARKER: &str = "platform error";

const NORMAL_CLOSE: u16 = 1000;
const GOING_AWAY: u16 = 1001;

/// What went wrong on a read.
#[derive(Debug)]
pub enum ReadFailure {
    /// The platform sent a protocol close frame.
    Closed(Option<CloseReason>),
    /// The stream ended without a close frame.
    EndOfStream,
    /// The transport failed.
    Transport(Error),
}

/// Outcome class of a read failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Normal shutdown by either side.
    GracefulClose,
    /// The socket was already closed locally; most likely a graceful close.
    ClosedSocket,
    /// Unrecoverable read failure.
    FatalRead,
    /// The platform reported an error.
    Platform,
    /// The stream ended while reconnecting was not allowed.
    EndOfStream,
    /// Anything else.
    Unknown,
    /// A handler or the loop itself panicked.
    PanicRecovered,
}

impl FailureKind {
    /// Whether an `Error` event is delivered before closing.
    pub fn emits_error(self) -> bool {
        !matches!(self, FailureKind::GracefulClose | FailureKind::ClosedSocket)
    }

    /// Whether the connection is torn down without the close handshake.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            FailureKind::GracefulClose | FailureKind::ClosedSocket | FailureKind::Platform
        )
    }

    fn code(self) -> &'static str {
        match self {
            FailureKind::GracefulClose => "GRACEFUL_CLOSE",
            FailureKind::ClosedSocket => "CLOSED_SOCKET",
            FailureKind::FatalRead => "FATAL_SOCKET_ERROR",
            FailureKind::Platform => "PROTOCOL_ERROR",
            FailureKind::EndOfStream => "END_OF_STREAM",
            FailureKind::Unknown => "UNKNOWN_ERROR",
            FailureKind::PanicRecovered => "PANIC_RECOVERED",
        }
    }
}

/// Classified failure with the error event to deliver, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Outcome class.
    pub kind: FailureKind,
    /// Event for the sink's error path; `None` for graceful closes.
    pub event: Option<ErrorMessage>,
}

/// Classifies a read failure.
///
/// `retrying` tells whether reconnecting is still allowed; an end of stream
/// is only reported as such when it is not.
pub fn classify(failure: &ReadFailure, retrying: bool) -> Classification {
    match failure {
        ReadFailure::Closed(None) => graceful(),
        ReadFailure::Closed(Some(reason)) => {
            if reason.code == NORMAL_CLOSE || reason.code == GOING_AWAY {
                graceful()
            } else {
                Classification {
                    kind: FailureKind::Platform,
                    event: Some(ErrorMessage::new(
                        reason.code.to_string(),
                        reason.reason.clone(),
                        format!("connection closed by platform with code {}", reason.code),
                        FailureKind::Platform.code(),
                    )),
                }
            }
        }
        ReadFailure::EndOfStream => end_of_stream("stream ended", retrying),
        ReadFailure::Transport(err) => classify_error(err, retrying),
    }
}

/// Builds the error event for a panic caught on the read loop.
pub fn panic_event(payload: &(dyn Any + Send)) -> ErrorMessage {
    let text = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    failure_event(FailureKind::PanicRecovered, text)
}

fn classify_error(err: &Error, retrying: bool) -> Classification {
    match err {
        Error::WebSocket(WsError::ConnectionClosed) => graceful(),
        Error::WebSocket(WsError::AlreadyClosed) => Classification {
            kind: FailureKind::ClosedSocket,
            event: None,
        },
        Error::WebSocket(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => {
            end_of_stream(&err.to_string(), retrying)
        }
        Error::WebSocket(WsError::Io(io)) => match io.kind() {
            ErrorKind::UnexpectedEof => end_of_stream(&io.to_string(), retrying),
            ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied => {
                failed(FailureKind::FatalRead, io.to_string())
            }
            _ => classify_text(&io.to_string()),
        },
        Error::Transport(text) => classify_text(text),
        other => failed(FailureKind::Unknown, other.to_string()),
    }
}

fn classify_text(text: &str) -> Classification {
    if text.contains(GRACEFUL_CLOSE_MARKER) {
        graceful()
    } else if text.contains(CLOSED_SOCKET_MARKER) {
        Classification {
            kind: FailureKind::ClosedSocket,
            event: None,
        }
    } else if text.contains(FATAL_READ_MARKER) {
        failed(FailureKind::FatalRead, text.to_string())
    } else if text.contains(PLATFORM_ERROR_MARKER) {
        Classification {
            kind: FailureKind::Platform,
            event: Some(platform_event(text)),
        }
    } else {
        failed(FailureKind::Unknown, text.to_string())
    }
}

// Recovers the close code from text such as "close 1011 (internal error): NET-0001".
fn platform_event(text: &str) -> ErrorMessage {
    let mut code = FailureKind::Platform.code().to_string();
    let mut message = text.to_string();
    if let Some(idx) = text.find("close ") {
        let rest = &text[idx + "close ".len()..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            code = digits;
        }
        if let Some((_, tail)) = rest.split_once("): ") {
            message = tail.trim().to_string();
        }
    }
    ErrorMessage::new(code, message, text, FailureKind::Platform.code())
}

fn graceful() -> Classification {
    Classification {
        kind: FailureKind::GracefulClose,
        event: None,
    }
}

fn end_of_stream(text: &str, retrying: bool) -> Classification {
    if retrying {
        failed(FailureKind::Unknown, text.to_string())
    } else {
        failed(FailureKind::EndOfStream, text.to_string())
    }
}

fn failed(kind: FailureKind, text: String) -> Classification {
    Classification {
        kind,
        event: Some(failure_event(kind, text)),
    }
}

fn failure_event(kind: FailureKind, text: String) -> ErrorMessage {
    ErrorMessage::new(kind.code(), text.clone(), text, kind.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(text: &str) -> ReadFailure {
        ReadFailure::Transport(Error::Transport(text.to_string()))
    }

    #[test]
    fn normal_close_frames_are_graceful() {
        for failure in [
            ReadFailure::Closed(None),
            ReadFailure::Closed(Some(CloseReason::new(1000, ""))),
            ReadFailure::Closed(Some(CloseReason::new(1001, "going away"))),
            ReadFailure::Transport(Error::WebSocket(WsError::ConnectionClosed)),
            transport("websocket: close 1000 (normal)"),
        ] {
            let c = classify(&failure, false);
            assert_eq!(c.kind, FailureKind::GracefulClose, "{failure:?}");
            assert!(c.event.is_none());
        }
    }

    #[test]
    fn closed_socket_is_a_probable_graceful_close() {
        for failure in [
            ReadFailure::Transport(Error::WebSocket(WsError::AlreadyClosed)),
            transport("read tcp 10.0.0.1:443: use of closed network connection"),
        ] {
            let c = classify(&failure, false);
            assert_eq!(c.kind, FailureKind::ClosedSocket);
            assert!(!c.kind.emits_error());
            assert!(!c.kind.is_fatal());
        }
    }

    #[test]
    fn platform_close_code_becomes_error_event() {
        let c = classify(
            &ReadFailure::Closed(Some(CloseReason::new(1011, "NET-0001"))),
            false,
        );
        assert_eq!(c.kind, FailureKind::Platform);
        assert!(!c.kind.is_fatal());
        let event = c.event.unwrap();
        assert_eq!(event.msg_type, "Error");
        assert_eq!(event.err_code, "1011");
        assert_eq!(event.err_msg, "NET-0001");
    }

    #[test]
    fn platform_error_text_is_parsed() {
        let c = classify(
            &transport("platform error: close 1008 (policy violation): DATA-0000 bad audio"),
            false,
        );
        assert_eq!(c.kind, FailureKind::Platform);
        let event = c.event.unwrap();
        assert_eq!(event.err_code, "1008");
        assert_eq!(event.err_msg, "DATA-0000 bad audio");
    }

    #[test]
    fn fatal_read_is_fatal() {
        let c = classify(
            &transport("read: can't assign requested address"),
            true,
        );
        assert_eq!(c.kind, FailureKind::FatalRead);
        assert!(c.kind.is_fatal());
        assert!(c.kind.emits_error());
    }

    #[test]
    fn end_of_stream_depends_on_retry_flag() {
        assert_eq!(
            classify(&ReadFailure::EndOfStream, false).kind,
            FailureKind::EndOfStream
        );
        assert_eq!(
            classify(&ReadFailure::EndOfStream, true).kind,
            FailureKind::Unknown
        );
        let io = std::io::Error::new(ErrorKind::UnexpectedEof, "eof");
        let c = classify(&ReadFailure::Transport(Error::WebSocket(WsError::Io(io))), false);
        assert_eq!(c.kind, FailureKind::EndOfStream);
        assert!(c.kind.is_fatal());
    }

    #[test]
    fn anything_else_is_unknown_and_fatal() {
        let c = classify(&transport("tls handshake eof"), false);
        assert_eq!(c.kind, FailureKind::Unknown);
        assert!(c.kind.is_fatal());
        assert_eq!(c.event.unwrap().err_code, "UNKNOWN_ERROR");
    }

    #[test]
    fn panic_payloads_become_error_events() {
        let payload: Box<dyn Any + Send> = Box::new("handler exploded");
        let event = panic_event(payload.as_ref());
        assert_eq!(event.err_code, "PANIC_RECOVERED");
        assert_eq!(event.err_msg, "handler exploded");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_event(payload.as_ref()).err_msg, "owned");
    }
}
