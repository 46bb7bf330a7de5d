//! # Session Manager
//!
//! Creates one `Session` per accepted connection. The manager holds only
//! read-only, shared resources: the recognizer factory, the observer and the
//! per-session settings. It keeps no per-session state and never coordinates
//! sessions with each other.

use crate::config::SessionConfig;
use crate::error::RecognitionError;
use crate::session::{Session, SessionEvent, SessionObserver};
use crate::transcription::{ModelDescriptor, RecognizerFactory};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

/// Identity of one connection, for logging and correlation only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub peer: Option<SocketAddr>,
    pub id: Uuid,
}

impl ConnectionId {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            peer,
            id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.id.simple().to_string();
        match self.peer {
            Some(peer) => write!(f, "{} ({})", peer, &short[..8]),
            None => write!(f, "unknown ({})", &short[..8]),
        }
    }
}

pub struct SessionManager {
    factory: Arc<dyn RecognizerFactory>,
    observer: Arc<dyn SessionObserver>,
    settings: SessionConfig,
}

impl SessionManager {
    pub fn new(
        factory: Arc<dyn RecognizerFactory>,
        observer: Arc<dyn SessionObserver>,
        settings: SessionConfig,
    ) -> Self {
        Self {
            factory,
            observer,
            settings,
        }
    }

    /// Open a session for a newly accepted connection.
    ///
    /// ## Returns:
    /// - `Ok(Session)`: an `Active` session owning a fresh recognizer handle
    /// - `Err(RecognitionError)`: no handle could be created; only this
    ///   connection is affected
    pub fn open(&self, connection: ConnectionId) -> Result<Session, RecognitionError> {
        let recognizer = self.factory.create(self.settings.sample_rate)?;

        self.observer.on_event(&connection, &SessionEvent::Connected);
        Ok(Session::new(
            connection,
            recognizer,
            self.settings.clone(),
            Arc::clone(&self.observer),
        ))
    }

    pub fn model(&self) -> ModelDescriptor {
        self.factory.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::session::SessionState;
    use crate::testing::{RecordingObserver, ScriptedFactory};

    fn manager(factory: ScriptedFactory, observer: Arc<RecordingObserver>) -> SessionManager {
        SessionManager::new(Arc::new(factory), observer, AppConfig::default().session)
    }

    #[test]
    fn test_open_creates_one_handle_per_session() {
        let factory = ScriptedFactory::new();
        let created = factory.created_counter();
        let observer = Arc::new(RecordingObserver::default());
        let manager = manager(factory, observer.clone());

        let first = manager.open(ConnectionId::new(None)).unwrap();
        let second = manager.open(ConnectionId::new(None)).unwrap();

        assert_eq!(first.state(), SessionState::Active);
        assert_eq!(second.state(), SessionState::Active);
        assert_ne!(first.connection().id, second.connection().id);
        assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(observer.events(), vec![SessionEvent::Connected, SessionEvent::Connected]);
    }

    #[test]
    fn test_open_failure_is_reported_to_caller() {
        let observer = Arc::new(RecordingObserver::default());
        let manager = manager(ScriptedFactory::unavailable(), observer.clone());

        let result = manager.open(ConnectionId::new(None));
        assert!(matches!(result, Err(RecognitionError::Unavailable(_))));
        assert!(observer.events().is_empty());

        // The manager itself is unaffected
        assert_eq!(manager.model().sample_rate, 16_000);
    }

    #[test]
    fn test_connection_id_display() {
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();
        let id = ConnectionId::new(Some(peer));
        let shown = id.to_string();
        assert!(shown.starts_with("127.0.0.1:5555 ("));
        assert!(ConnectionId::new(None).to_string().starts_with("unknown ("));
    }
}
