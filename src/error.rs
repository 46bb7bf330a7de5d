//! # Error Handling
//!
//! Error types for the whole service. There are two families:
//!
//! - **AppError**: process- and HTTP-level failures. Converted into JSON HTTP
//!   responses through actix's `ResponseError` trait, and used at startup for
//!   the fatal `ModelUnavailable` case.
//! - **Session taxonomy**: the errors that can happen while one streaming
//!   session is running (`RecognitionError`, `FrameError`, `SendError`) and
//!   the `CloseReason` that records why a session ended.
//!
//! ## Propagation Policy:
//! Nothing inside a session ever escapes to the listener. Each call site in
//! `session::Session` decides locally whether an error is fatal for that one
//! session or can be ignored.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Process and HTTP level errors.
///
/// ## HTTP Status Code Mapping:
/// - ConfigError/ModelUnavailable → 500
/// - ServiceUnavailable → 503 (a session could not be opened or started)
#[derive(Debug)]
pub enum AppError {
    /// Configuration file or environment variable problems
    ConfigError(String),

    /// The speech model could not be located or loaded. Fatal at startup.
    ModelUnavailable(String),

    /// A per-connection resource could not be allocated
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Converts errors into HTTP responses with a consistent JSON body:
///
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "failed to create recognizer",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::ConfigError(_) | AppError::ModelUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::ConfigError(msg) => ("config_error", msg),
            AppError::ModelUnavailable(msg) => ("model_unavailable", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<RecognitionError> for AppError {
    fn from(err: RecognitionError) -> Self {
        AppError::ServiceUnavailable(err.to_string())
    }
}

/// Failures raised by a recognizer handle or its factory.
///
/// Any of these raised while a session is processing a frame is a
/// session-fatal `RecognitionFault`; raised during the final flush it is
/// reported and swallowed.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionError {
    /// Audio could not be turned into model input
    InvalidAudio(String),

    /// The model failed while running (tensor op, device error, ...)
    Inference(String),

    /// Model output could not be turned back into text
    Decode(String),

    /// A new handle could not be created
    Unavailable(String),
}

impl fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognitionError::InvalidAudio(msg) => write!(f, "invalid audio: {}", msg),
            RecognitionError::Inference(msg) => write!(f, "inference failed: {}", msg),
            RecognitionError::Decode(msg) => write!(f, "decode failed: {}", msg),
            RecognitionError::Unavailable(msg) => write!(f, "recognizer unavailable: {}", msg),
        }
    }
}

impl std::error::Error for RecognitionError {}

impl From<candle_core::Error> for RecognitionError {
    fn from(err: candle_core::Error) -> Self {
        RecognitionError::Inference(err.to_string())
    }
}

/// An inbound frame that must not be fed to the recognizer. Never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameError {
    /// A text/control message where audio was expected
    NotBinary { len: usize },

    /// A binary frame with no samples
    Empty,

    /// A binary frame that is not a whole number of 16-bit samples
    Misaligned { len: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::NotBinary { len } => write!(f, "non-binary message ({} bytes)", len),
            FrameError::Empty => write!(f, "empty audio frame"),
            FrameError::Misaligned { len } => {
                write!(f, "audio frame of {} bytes is not 16-bit aligned", len)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Outbound delivery failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    /// The connection is closing or gone
    ChannelClosed,

    /// The message could not be serialized
    Encode(String),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::ChannelClosed => write!(f, "outbound channel closed"),
            SendError::Encode(msg) => write!(f, "failed to encode message: {}", msg),
        }
    }
}

impl std::error::Error for SendError {}

impl From<serde_json::Error> for SendError {
    fn from(err: serde_json::Error) -> Self {
        SendError::Encode(err.to_string())
    }
}

/// Why a session left the `Active` state.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// The client closed the connection cleanly
    TransportClosedNormal,

    /// The connection broke: protocol error, oversized frame, keep-alive
    /// timeout or an unusable outbound channel
    TransportClosedError(String),

    /// The client sent an explicit end-of-stream control message
    EndOfStream,

    /// The recognizer failed while processing a frame
    Fault(RecognitionError),
}

impl CloseReason {
    /// Short machine-readable label used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TransportClosedNormal => "closed",
            CloseReason::TransportClosedError(_) => "transport_error",
            CloseReason::EndOfStream => "end_of_stream",
            CloseReason::Fault(_) => "recognition_fault",
        }
    }

    /// Whether this is one of the benign endings.
    pub fn is_normal(&self) -> bool {
        matches!(self, CloseReason::TransportClosedNormal | CloseReason::EndOfStream)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::TransportClosedNormal => write!(f, "client disconnected normally"),
            CloseReason::TransportClosedError(cause) => {
                write!(f, "connection closed with error: {}", cause)
            }
            CloseReason::EndOfStream => write!(f, "client signalled end of stream"),
            CloseReason::Fault(err) => write!(f, "recognition fault: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::ServiceUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::ConfigError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::ModelUnavailable("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_recognition_error_maps_to_service_unavailable() {
        let err: AppError = RecognitionError::Unavailable("factory busy".into()).into();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
        assert!(err.to_string().contains("factory busy"));

        let err: AppError = RecognitionError::InvalidAudio("8000 Hz".into()).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("invalid audio: 8000 Hz"));
    }

    #[test]
    fn test_close_reason_classification() {
        assert!(CloseReason::TransportClosedNormal.is_normal());
        assert!(CloseReason::EndOfStream.is_normal());
        assert!(!CloseReason::TransportClosedError("reset".into()).is_normal());
        assert!(!CloseReason::Fault(RecognitionError::Inference("oom".into())).is_normal());
        assert_eq!(CloseReason::EndOfStream.as_str(), "end_of_stream");
    }
}
