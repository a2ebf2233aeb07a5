//! # Session Core for sipmesh
//!
//! Tracks the calls owned by this node. Each call gets a [`Session`] with a
//! lifecycle status and its own media negotiation handle; the
//! [`SessionManager`] owns all of them and reaps sessions past their retention
//! window.
//!
//! - [`session`]: session identity and the status state machine
//! - [`manager`]: the session table and its periodic cleanup
//! - [`media`]: the offer/answer capability and its UDP implementation
//! - [`sdp`]: SDP offer lookups and the answer format, on top of `rvoip-sip-core`

pub mod errors;
pub mod manager;
pub mod media;
pub mod sdp;
pub mod session;

pub use errors::{Result, SessionError};
pub use manager::{SessionManager, SessionManagerConfig};
pub use media::{InboundRtp, MediaEngine, MediaEngineFactory, UdpMediaEngine};
pub use session::{Session, SessionId, SessionStatus};
