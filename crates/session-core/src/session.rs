//! Session Implementation
//!
//! One [`Session`] per active call. The session owns its media negotiation
//! handle for its whole lifetime.

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{Result, SessionError};
use crate::media::MediaEngine;

/// Unique identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle status of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    New,
    Ringing,
    Connected,
    Disconnected,
    Failed,
}

impl SessionStatus {
    /// Disconnected and Failed accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Disconnected | SessionStatus::Failed)
    }

    /// Still waiting for the call to be answered
    pub fn is_pending(self) -> bool {
        matches!(self, SessionStatus::New | SessionStatus::Ringing)
    }

    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (New, Ringing) | (New, Connected) | (Ringing, Connected) | (Connected, Disconnected) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::New => "New",
            SessionStatus::Ringing => "Ringing",
            SessionStatus::Connected => "Connected",
            SessionStatus::Disconnected => "Disconnected",
            SessionStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// A call known to this node
pub struct Session {
    id: SessionId,
    call_id: String,
    status: RwLock<SessionStatus>,
    created_at: DateTime<Utc>,
    media: Mutex<Box<dyn MediaEngine>>,
}

impl Session {
    pub fn new(call_id: impl Into<String>, media: Box<dyn MediaEngine>) -> Self {
        Self::with_created_at(call_id, Utc::now(), media)
    }

    /// Create a session with an explicit creation time
    pub fn with_created_at(call_id: impl Into<String>, created_at: DateTime<Utc>, media: Box<dyn MediaEngine>) -> Self {
        Self {
            id: SessionId::new(),
            call_id: call_id.into(),
            status: RwLock::new(SessionStatus::New),
            created_at,
            media: Mutex::new(media),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Move to `next`, rejecting transitions the state machine does not allow
    pub fn transition(&self, next: SessionStatus) -> Result<()> {
        let mut status = self.status.write();
        if !status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition { from: *status, to: next });
        }
        debug!("Session {} ({}) {} -> {}", self.id, self.call_id, *status, next);
        *status = next;
        Ok(())
    }

    /// Hand an SDP offer to the session's media engine
    pub async fn negotiate(&self, offer: &str) -> Result<String> {
        self.media.lock().await.set_offer(offer).await
    }

    pub async fn close_media(&self) {
        self.media.lock().await.close().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("call_id", &self.call_id)
            .field("status", &self.status())
            .field("created_at", &self.created_at)
            .finish()
    }
}
