//! Session table
//!
//! All sessions of this node, keyed by session id. Every mutating operation
//! takes the table's write lock; lookups share the read lock.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{Result, SessionError};
use crate::media::{MediaEngineFactory, UdpMediaEngine};
use crate::session::{Session, SessionId, SessionStatus};

/// How long a session may live before the sweep removes it
pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default sweep period
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Session manager configuration
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Age, from creation, after which a session is reaped
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_SESSION_RETENTION,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

/// Owns every session of this node
pub struct SessionManager {
    config: SessionManagerConfig,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    media_factory: MediaEngineFactory,
}

impl SessionManager {
    /// Manager whose sessions negotiate with a [`UdpMediaEngine`]
    pub fn new(config: SessionManagerConfig) -> Self {
        Self::with_media_factory(config, UdpMediaEngine::factory(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
    }

    pub fn with_media_factory(config: SessionManagerConfig, media_factory: MediaEngineFactory) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            media_factory,
        }
    }

    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// Always allocates a new session, even if one exists for `call_id`
    pub fn create_session(&self, call_id: &str) -> Arc<Session> {
        let session = Arc::new(Session::new(call_id, (self.media_factory)(call_id)));
        self.sessions.write().insert(session.id(), session.clone());
        debug!("Created session {} for call {}", session.id(), call_id);
        session
    }

    pub fn get_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Idempotent removal; returns the session if it was present
    pub fn delete_session(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            debug!("Deleted session {}", id);
        }
        removed
    }

    /// Existing session for `call_id`, or a new one
    pub fn get_or_create_session(&self, call_id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.values().find(|s| s.call_id() == call_id) {
            return existing.clone();
        }

        let session = Arc::new(Session::new(call_id, (self.media_factory)(call_id)));
        sessions.insert(session.id(), session.clone());
        debug!("Created session {} for call {}", session.id(), call_id);
        session
    }

    pub fn find_by_call_id(&self, call_id: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.call_id() == call_id)
            .cloned()
            .collect()
    }

    /// Remove every session of a call; removing nothing is not an error
    pub fn delete_by_call_id(&self, call_id: &str) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let ids: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.call_id() == call_id)
            .map(|s| s.id())
            .collect();
        ids.iter().filter_map(|id| sessions.remove(id)).collect()
    }

    pub fn update_status(&self, id: &SessionId, status: SessionStatus) -> Result<()> {
        let session = self.get_session(id).ok_or_else(|| SessionError::not_found(id))?;
        session.transition(status)
    }

    /// Add a pre-built session (e.g. with a chosen creation time)
    pub fn insert_session(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.sessions.write().insert(session.id(), session.clone());
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Remove sessions older than the configured retention window
    pub fn cleanup_sessions(&self) -> Vec<Arc<Session>> {
        self.cleanup_sessions_older_than(self.config.retention)
    }

    /// Remove sessions created more than `retention` ago
    pub fn cleanup_sessions_older_than(&self, retention: Duration) -> Vec<Arc<Session>> {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Vec::new();
        };

        let mut sessions = self.sessions.write();
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.created_at() < cutoff)
            .map(|s| s.id())
            .collect();
        expired.iter().filter_map(|id| sessions.remove(id)).collect()
    }

    /// Remove every session, closing their media
    ///
    /// ```rust
    /// # use sipmesh_session_core::{SessionManager, SessionManagerConfig};
    /// # tokio_test::block_on(async {
    /// let manager = SessionManager::new(SessionManagerConfig::default());
    /// manager.create_session("call-1");
    /// manager.create_session("call-2");
    ///
    /// assert_eq!(manager.terminate_all().await, 2);
    /// assert!(manager.is_empty());
    /// # });
    /// ```
    pub async fn terminate_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.close_media().await;
        }
        sessions.len()
    }

    /// Run [`cleanup_sessions`](Self::cleanup_sessions) every
    /// `cleanup_interval` until `shutdown` is cancelled
    pub fn start_cleanup_task(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.cleanup_interval);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let expired = manager.cleanup_sessions();
                        for session in &expired {
                            session.close_media().await;
                        }
                        if !expired.is_empty() {
                            info!("Cleaned up {} expired sessions", expired.len());
                        }
                    }
                }
            }
            debug!("Session cleanup task stopped");
        })
    }
}
