//! # Call Controller
//!
//! Turns inbound SIP requests into session-table changes and responses.
//!
//! Every request is first routed through the [`HashRing`]: a call owned by
//! another instance is not processed here and produces no response. Owned
//! requests are dispatched by method:
//!
//! | Method   | Effect                                              | Response        |
//! |----------|-----------------------------------------------------|-----------------|
//! | INVITE   | get-or-create session, negotiate the SDP offer      | 200 / 400 / 500 |
//! | ACK      | answered (ringing) sessions become connected        | none            |
//! | BYE      | every session of the call is removed                | 200             |
//! | CANCEL   | sessions not yet answered are removed               | 200             |
//! | REGISTER | `Authorization` checked by the [`TokenValidator`]   | 200 / 401       |
//! | OPTIONS  | none                                                | 200             |
//! | other    | none                                                | 501             |

use std::sync::Arc;

use tracing::{debug, info, warn};

use sipmesh_session_core::{Session, SessionManager, SessionStatus};

use crate::auth::{StaticTokenValidator, TokenValidator};
use crate::routing::HashRing;
use crate::sip::{SipMethod, SipRequest, SipResponse, StatusCode};

/// What to do with a request after the controller has seen it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Call belongs to another instance (or no instance); dropped here
    NotOwned { owner: Option<String> },
    /// Handled, nothing to send back
    NoResponse,
    /// Handled, send this response
    Respond(SipResponse),
}

impl Dispatch {
    pub fn response(&self) -> Option<&SipResponse> {
        match self {
            Dispatch::Respond(response) => Some(response),
            _ => None,
        }
    }
}

/// Per-request orchestration for the calls this instance owns
pub struct CallController {
    instance_id: String,
    ring: Arc<HashRing>,
    sessions: Arc<SessionManager>,
    validator: Arc<dyn TokenValidator>,
}

impl CallController {
    pub fn new(instance_id: impl Into<String>, ring: Arc<HashRing>, sessions: Arc<SessionManager>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ring,
            sessions,
            validator: Arc::new(StaticTokenValidator),
        }
    }

    /// Replace the REGISTER credential validator
    pub fn with_validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Route and handle one request.
    ///
    /// ```rust
    /// # use std::sync::Arc;
    /// # use sipmesh_call_engine::prelude::*;
    /// # use sipmesh_session_core::{SessionManager, SessionManagerConfig};
    /// # tokio_test::block_on(async {
    /// let ring = Arc::new(HashRing::with_instances(100, ["node-a"]));
    /// let sessions = Arc::new(SessionManager::new(SessionManagerConfig::default()));
    /// let controller = CallController::new("node-a", ring, sessions);
    ///
    /// let dispatch = controller
    ///     .handle_request(&SipRequest::new(SipMethod::Options, "call-1"))
    ///     .await;
    /// assert_eq!(dispatch.response().map(|r| r.status), Some(StatusCode::OK));
    /// # });
    /// ```
    pub async fn handle_request(&self, request: &SipRequest) -> Dispatch {
        let call_id = request.call_id.as_str();
        info!("Received SIP request {} for call {}", request.method, call_id);

        let owner = self.ring.get(call_id);
        if owner.as_deref() != Some(self.instance_id.as_str()) {
            info!("Call {} routed to instance {:?}, not processing", call_id, owner);
            return Dispatch::NotOwned { owner };
        }

        match &request.method {
            SipMethod::Invite => self.handle_invite(request).await,
            SipMethod::Ack => self.handle_ack(call_id),
            SipMethod::Bye => self.handle_bye(call_id).await,
            SipMethod::Cancel => self.handle_cancel(call_id).await,
            SipMethod::Register => self.handle_register(request),
            SipMethod::Options => Dispatch::Respond(SipResponse::ok()),
            SipMethod::Other(method) => fail(
                call_id,
                StatusCode::NOT_IMPLEMENTED,
                &format!("Method {} not supported", method),
            ),
        }
    }

    async fn handle_invite(&self, request: &SipRequest) -> Dispatch {
        let call_id = request.call_id.as_str();

        let mut session = self.sessions.get_or_create_session(call_id);
        if session.status().is_terminal() {
            // A new INVITE for a finished call starts over
            self.sessions.delete_session(&session.id());
            session = self.sessions.create_session(call_id);
        }
        if session.status() == SessionStatus::New {
            advance(&session, SessionStatus::Ringing);
        }

        match session.negotiate(&request.body).await {
            Ok(answer) => {
                // Connected once the ACK for this answer arrives
                debug!("Call {} answered by session {} ({})", call_id, session.id(), session.status());
                Dispatch::Respond(SipResponse::ok().with_body(answer))
            }
            Err(e) if e.is_offer_error() => {
                advance(&session, SessionStatus::Failed);
                fail(call_id, StatusCode::BAD_REQUEST, &format!("Bad Request: Invalid SDP ({})", e))
            }
            Err(e) => {
                advance(&session, SessionStatus::Failed);
                fail(call_id, StatusCode::INTERNAL_SERVER_ERROR, &format!("Media setup failed: {}", e))
            }
        }
    }

    fn handle_ack(&self, call_id: &str) -> Dispatch {
        info!("Received ACK for call {}", call_id);
        for session in self.sessions.find_by_call_id(call_id) {
            if session.status() == SessionStatus::Ringing {
                advance(&session, SessionStatus::Connected);
            }
        }
        Dispatch::NoResponse
    }

    async fn handle_bye(&self, call_id: &str) -> Dispatch {
        let removed = self.sessions.delete_by_call_id(call_id);
        for session in &removed {
            if session.status().can_transition_to(SessionStatus::Disconnected) {
                advance(session, SessionStatus::Disconnected);
            }
            session.close_media().await;
        }
        info!("Call {} ended, {} session(s) removed", call_id, removed.len());
        Dispatch::Respond(SipResponse::ok())
    }

    async fn handle_cancel(&self, call_id: &str) -> Dispatch {
        info!("Received CANCEL for call {}", call_id);
        for session in self.sessions.find_by_call_id(call_id) {
            if session.status().is_pending() {
                advance(&session, SessionStatus::Failed);
                self.sessions.delete_session(&session.id());
                session.close_media().await;
                debug!("Cancelled pending session {} of call {}", session.id(), call_id);
            }
        }
        Dispatch::Respond(SipResponse::ok())
    }

    fn handle_register(&self, request: &SipRequest) -> Dispatch {
        let token = request.header("Authorization").unwrap_or_default();
        if !self.validator.validate(token) {
            return fail(&request.call_id, StatusCode::UNAUTHORIZED, "Unauthorized");
        }
        info!("Accepted REGISTER for call {}", request.call_id);
        Dispatch::Respond(SipResponse::ok())
    }
}

fn advance(session: &Session, status: SessionStatus) {
    if let Err(e) = session.transition(status) {
        warn!("Session {} of call {}: {}", session.id(), session.call_id(), e);
    }
}

fn fail(call_id: &str, status: StatusCode, reason: &str) -> Dispatch {
    warn!(call_id = %call_id, status = status.as_u16(), "Request failed: {}", reason);
    Dispatch::Respond(SipResponse::new(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sipmesh_session_core::{MediaEngine, SessionError, SessionManagerConfig};

    /// Accepts offers containing PCMU, rejects the rest like a real engine
    struct FakeEngine;

    #[async_trait]
    impl MediaEngine for FakeEngine {
        async fn set_offer(&mut self, offer: &str) -> sipmesh_session_core::Result<String> {
            if !offer.starts_with("v=0") {
                return Err(SessionError::malformed_offer("not sdp"));
            }
            if !offer.contains("PCMU") {
                return Err(SessionError::NoCommonCodec);
            }
            Ok("v=0\r\nm=audio 4000 RTP/AVP 0\r\n".to_string())
        }

        async fn close(&mut self) {}
    }

    fn controller_with_ring(instances: &[&str]) -> CallController {
        let ring = Arc::new(HashRing::with_instances(100, instances.iter().copied()));
        let sessions = Arc::new(SessionManager::with_media_factory(
            SessionManagerConfig::default(),
            Arc::new(|_: &str| -> Box<dyn MediaEngine> { Box::new(FakeEngine) }),
        ));
        CallController::new("instance1", ring, sessions)
    }

    fn controller() -> CallController {
        controller_with_ring(&["instance1"])
    }

    fn status(dispatch: &Dispatch) -> Option<u16> {
        dispatch.response().map(|r| r.status.as_u16())
    }

    #[tokio::test]
    async fn test_invite_then_ack_connects_session() {
        let controller = controller();
        let req = SipRequest::new(SipMethod::Invite, "call-1").with_body("v=0\r\na=rtpmap:0 PCMU/8000\r\n");

        let dispatch = controller.handle_request(&req).await;
        assert_eq!(status(&dispatch), Some(200));
        assert!(dispatch.response().unwrap().body.as_deref().unwrap().contains("RTP/AVP 0"));

        let sessions = controller.sessions().find_by_call_id("call-1");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status(), SessionStatus::Ringing);

        let ack = controller.handle_request(&SipRequest::new(SipMethod::Ack, "call-1")).await;
        assert_eq!(ack, Dispatch::NoResponse);
        assert_eq!(sessions[0].status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_reinvite_keeps_connected_session() {
        let controller = controller();
        let invite = SipRequest::new(SipMethod::Invite, "call-1").with_body("v=0\r\nPCMU");
        controller.handle_request(&invite).await;
        controller.handle_request(&SipRequest::new(SipMethod::Ack, "call-1")).await;

        assert_eq!(status(&controller.handle_request(&invite).await), Some(200));
        let sessions = controller.sessions().find_by_call_id("call-1");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_invite_failures_map_to_status_codes() {
        let controller = controller();

        let malformed = SipRequest::new(SipMethod::Invite, "call-1").with_body("garbage");
        assert_eq!(status(&controller.handle_request(&malformed).await), Some(400));
        assert_eq!(controller.sessions().find_by_call_id("call-1")[0].status(), SessionStatus::Failed);

        let no_codec = SipRequest::new(SipMethod::Invite, "call-2").with_body("v=0\r\na=rtpmap:8 PCMA/8000\r\n");
        assert_eq!(status(&controller.handle_request(&no_codec).await), Some(500));
        assert_eq!(controller.sessions().find_by_call_id("call-2")[0].status(), SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_invite_after_failure_starts_new_session() {
        let controller = controller();
        let bad = SipRequest::new(SipMethod::Invite, "call-1").with_body("garbage");
        controller.handle_request(&bad).await;

        let good = SipRequest::new(SipMethod::Invite, "call-1").with_body("v=0\r\nPCMU");
        assert_eq!(status(&controller.handle_request(&good).await), Some(200));

        let sessions = controller.sessions().find_by_call_id("call-1");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status(), SessionStatus::Ringing);
    }

    #[tokio::test]
    async fn test_bye_is_idempotent() {
        let controller = controller();
        let invite = SipRequest::new(SipMethod::Invite, "call-1").with_body("v=0\r\nPCMU");
        controller.handle_request(&invite).await;

        let bye = SipRequest::new(SipMethod::Bye, "call-1");
        assert_eq!(status(&controller.handle_request(&bye).await), Some(200));
        assert!(controller.sessions().is_empty());
        assert_eq!(status(&controller.handle_request(&bye).await), Some(200));
    }

    #[tokio::test]
    async fn test_ack_has_no_response() {
        let controller = controller();
        let ack = SipRequest::new(SipMethod::Ack, "call-1");
        assert_eq!(controller.handle_request(&ack).await, Dispatch::NoResponse);
    }

    #[tokio::test]
    async fn test_ack_finalizes_ringing_session() {
        let controller = controller();
        let session = controller.sessions().create_session("call-1");
        session.transition(SessionStatus::Ringing).unwrap();

        controller.handle_request(&SipRequest::new(SipMethod::Ack, "call-1")).await;
        assert_eq!(session.status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_cancel_removes_only_pending_sessions() {
        let controller = controller();
        let pending = controller.sessions().create_session("call-1");
        pending.transition(SessionStatus::Ringing).unwrap();

        let cancel = SipRequest::new(SipMethod::Cancel, "call-1");
        assert_eq!(status(&controller.handle_request(&cancel).await), Some(200));
        assert!(controller.sessions().get_session(&pending.id()).is_none());

        // No session at all is fine too
        let cancel = SipRequest::new(SipMethod::Cancel, "call-unknown");
        assert_eq!(status(&controller.handle_request(&cancel).await), Some(200));

        // Answered but not yet acknowledged is still pending
        let invite = SipRequest::new(SipMethod::Invite, "call-2").with_body("v=0\r\nPCMU");
        assert_eq!(status(&controller.handle_request(&invite).await), Some(200));
        controller.handle_request(&SipRequest::new(SipMethod::Cancel, "call-2")).await;
        assert!(controller.sessions().find_by_call_id("call-2").is_empty());

        let invite = SipRequest::new(SipMethod::Invite, "call-3").with_body("v=0\r\nPCMU");
        controller.handle_request(&invite).await;
        controller.handle_request(&SipRequest::new(SipMethod::Ack, "call-3")).await;
        controller.handle_request(&SipRequest::new(SipMethod::Cancel, "call-3")).await;
        let connected = controller.sessions().find_by_call_id("call-3");
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].status(), SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_register_requires_valid_token() {
        let controller = controller();
        let missing = SipRequest::new(SipMethod::Register, "reg-1");
        assert_eq!(status(&controller.handle_request(&missing).await), Some(401));

        let wrong = missing.clone().with_header("Authorization", "nope");
        assert_eq!(status(&controller.handle_request(&wrong).await), Some(401));

        let valid = missing.clone().with_header("Authorization", "valid-token");
        assert_eq!(status(&controller.handle_request(&valid).await), Some(200));
        assert!(controller.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_custom_validator() {
        let controller = controller().with_validator(Arc::new(|token: &str| token == "Bearer abc"));
        let req = SipRequest::new(SipMethod::Register, "reg-1").with_header("Authorization", "Bearer abc");
        assert_eq!(status(&controller.handle_request(&req).await), Some(200));
    }

    #[tokio::test]
    async fn test_options_and_unsupported_methods() {
        let controller = controller();
        let options = SipRequest::new(SipMethod::Options, "c");
        assert_eq!(status(&controller.handle_request(&options).await), Some(200));

        let info = SipRequest::new(SipMethod::Other("INFO".to_string()), "c");
        assert_eq!(status(&controller.handle_request(&info).await), Some(501));
        assert!(controller.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_not_owned_requests_are_dropped() {
        let controller = controller_with_ring(&["instance1", "instance2", "instance3"]);
        let ring = HashRing::with_instances(100, ["instance1", "instance2", "instance3"]);

        let foreign = (0..)
            .map(|i| format!("call-{}", i))
            .find(|c| ring.get(c).as_deref() != Some("instance1"))
            .unwrap();
        let invite = SipRequest::new(SipMethod::Invite, foreign.clone()).with_body("v=0\r\nPCMU");

        let dispatch = controller.handle_request(&invite).await;
        assert_eq!(dispatch, Dispatch::NotOwned { owner: ring.get(&foreign) });
        assert!(controller.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_empty_ring_owns_nothing() {
        let controller = controller_with_ring(&[]);
        let dispatch = controller.handle_request(&SipRequest::new(SipMethod::Options, "c")).await;
        assert_eq!(dispatch, Dispatch::NotOwned { owner: None });
    }
}
