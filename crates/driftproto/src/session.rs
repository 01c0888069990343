//! The seam between the engine and a generative backend.
//!
//! A backend implements [`SessionConnector`]; every successful `connect`
//! yields one [`Session`] and pushes [`SessionEvent`]s into the supplied
//! [`SessionEvents`] sink until the session closes. The engine never
//! reuses a session after it closes; it opens a new one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{ServerMessage, WeightedPrompt};

/// Errors surfaced by a session backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open session: {0}")]
    ConnectFailed(String),

    #[error("session is closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// The backend did not answer `{0}` in time.
    #[error("session {0} timed out")]
    Timeout(&'static str),
}

/// Lifecycle callbacks from a live session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Message(ServerMessage),
    Error(String),
    Closed,
}

/// Sink a backend uses to deliver callbacks for one session.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the engine stopped listening.
    pub fn message(&self, message: ServerMessage) -> bool {
        self.tx.send(SessionEvent::Message(message)).is_ok()
    }

    pub fn error(&self, error: impl Into<String>) -> bool {
        self.tx.send(SessionEvent::Error(error.into())).is_ok()
    }

    pub fn closed(&self) -> bool {
        self.tx.send(SessionEvent::Closed).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A live bidirectional connection to the generative backend.
#[async_trait]
pub trait Session: Send + Sync {
    /// Replace the full set of weighted prompts steering generation.
    async fn set_weighted_prompts(&self, prompts: Vec<WeightedPrompt>) -> Result<(), SessionError>;

    async fn play(&self) -> Result<(), SessionError>;

    async fn pause(&self) -> Result<(), SessionError>;

    async fn stop(&self) -> Result<(), SessionError>;
}

/// Opens sessions against a backend.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        model: &str,
        events: SessionEvents,
    ) -> Result<Arc<dyn Session>, SessionError>;
}
