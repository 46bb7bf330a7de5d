//! Transcript events and their JSON wire form.
//!
//! ## Outbound Messages:
//! - `{"partial": "<text>"}`: provisional text for the utterance in progress
//! - `{"text": "<text>"}`: the final text of one utterance
//! - `{"error": "<message>"}`: recognition fault notice, sent just before the
//!   server closes the connection

use crate::error::SendError;
use serde::Serialize;

/// A transcript produced by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Provisional; may be revised or shortened by the next partial
    Partial { text: String },
    /// Ends one utterance; never empty
    Final { text: String },
}

/// Everything a session can ask the transport to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Transcript(TranscriptEvent),
    FaultNotice(String),
}

#[derive(Serialize)]
#[serde(untagged)]
enum WireMessage<'a> {
    Partial { partial: &'a str },
    Final { text: &'a str },
    Error { error: &'a str },
}

impl OutboundMessage {
    /// Serialize into the JSON text frame the client expects.
    pub fn to_json(&self) -> Result<String, SendError> {
        let wire = match self {
            OutboundMessage::Transcript(TranscriptEvent::Partial { text }) => {
                WireMessage::Partial { partial: text }
            }
            OutboundMessage::Transcript(TranscriptEvent::Final { text }) => {
                WireMessage::Final { text }
            }
            OutboundMessage::FaultNotice(message) => WireMessage::Error { error: message },
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

/// The outbound half of a connection, as seen by a session.
///
/// Implementations queue the message for delivery and must fail with
/// `SendError::ChannelClosed` once the connection can no longer carry it.
pub trait EventSink {
    fn send(&mut self, message: &OutboundMessage) -> Result<(), SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let partial = OutboundMessage::Transcript(TranscriptEvent::Partial { text: "hel".into() });
        assert_eq!(partial.to_json().unwrap(), r#"{"partial":"hel"}"#);

        let final_text =
            OutboundMessage::Transcript(TranscriptEvent::Final { text: "hello world".into() });
        assert_eq!(final_text.to_json().unwrap(), r#"{"text":"hello world"}"#);

        let notice = OutboundMessage::FaultNotice("inference failed: oom".into());
        assert_eq!(notice.to_json().unwrap(), r#"{"error":"inference failed: oom"}"#);
    }

    #[test]
    fn test_text_is_escaped() {
        let message = OutboundMessage::Transcript(TranscriptEvent::Final {
            text: "say \"hi\"".into(),
        });
        let parsed: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(parsed["text"], "say \"hi\"");
    }
}
