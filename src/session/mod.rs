//! # Streaming Sessions
//!
//! One session per WebSocket connection. This module is transport-agnostic:
//! it sees inbound frames as `Frame` values and hands outbound messages to an
//! `EventSink`, so it runs unchanged under the actix actor and in tests.
//!
//! ## Key Components:
//! - **Session**: the `Active → Closing → Closed` state machine
//! - **SessionManager**: opens sessions over the shared recognizer factory
//! - **Events**: transcript events and their JSON wire form
//! - **Observer**: lifecycle reporting, logged by `TracingObserver`
//! - **SessionWorker**: runs a session on its own thread, fed over a channel

mod lifecycle;
pub mod event;
pub mod manager;
pub mod observer;
pub mod stats;
pub mod worker;

pub use lifecycle::{Frame, FrameOutcome, Session, SessionState};
pub use event::{EventSink, OutboundMessage, TranscriptEvent};
pub use manager::{ConnectionId, SessionManager};
pub use observer::{SessionEvent, SessionObserver, TracingObserver};
pub use stats::SessionStats;
pub use worker::{InboundFrame, SessionWorker, WorkerCommand, WorkerEvent};
