//! # Call Engine for sipmesh
//!
//! The signaling side of a sipmesh node. Several identical nodes share the
//! call load: each one hashes the Call-ID of every request onto a consistent
//! hash ring and only processes the calls it owns.
//!
//! ## Components
//!
//! - [`routing`]: the consistent [`HashRing`](routing::HashRing)
//! - [`controller`]: per-method request handling against the session table
//! - [`media_router`]: inbound RTP split between DTMF, transcoding and conferences
//! - [`server`]: the [`NodeServer`] that wires everything and owns the lifecycle
//! - [`transport`]: the signaling transport seam and its UDP implementation
//! - [`config`] and [`logging`]: TOML/environment configuration and tracing setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sipmesh_call_engine::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<()> {
//! let config = NodeConfig::default();
//! let transport = Arc::new(UdpSignaling::bind(config.signaling.listen_addr).await?);
//! let server = NodeServer::new(config)?;
//!
//! let shutdown = CancellationToken::new();
//! server.run(transport, shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod media_router;
pub mod routing;
pub mod server;
pub mod sip;
pub mod transport;

pub use config::NodeConfig;
pub use controller::{CallController, Dispatch};
pub use error::{CallEngineError, Result};
pub use server::NodeServer;

pub mod prelude {
    pub use crate::auth::{StaticTokenValidator, TokenValidator, PLACEHOLDER_TOKEN};
    pub use crate::config::{ClusterConfig, LogConfig, MediaConfig, NodeConfig, SessionsConfig, SignalingConfig};
    pub use crate::controller::{CallController, Dispatch};
    pub use crate::error::{CallEngineError, Result};
    pub use crate::logging::{setup_logging, LoggingConfig};
    pub use crate::media_router::{MediaOutcome, MediaRouter};
    pub use crate::routing::{fnv1a_32, HashRing};
    pub use crate::server::NodeServer;
    pub use crate::sip::{SipMethod, SipRequest, SipResponse, StatusCode};
    pub use crate::transport::{SignalingTransport, UdpSignaling};
}
