//! # Node Server
//!
//! Wires one node together: the hash ring, the session table, the call
//! controller and the media pipeline (transcoder, DTMF detector, conference
//! rooms). [`NodeServer::run`] serves a [`SignalingTransport`] until the
//! shutdown token is cancelled, then drains in-flight requests for the
//! configured grace period and tears down every remaining session.
//!
//! ```text
//!   transport ──recv──▶ NodeServer ──spawn──▶ CallController ──▶ SessionManager
//!       ▲                                          │
//!       └───────────────send (Respond)─────────────┘
//!
//!   RTP socket ──InboundRtp──▶ MediaRouter ──▶ DtmfDetector | TranscodingService ──▶ ConferenceRegistry
//! ```
//!
//! Media engines built by [`NodeServer::new`] forward every received RTP
//! packet, tagged with its Call-ID, to a bounded queue that `run` drains into
//! the [`MediaRouter`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use sipmesh_media_core::{ConferenceConfig, ConferenceRegistry, DtmfDetector, MixerConfig, TranscodingService};
use sipmesh_session_core::{InboundRtp, MediaEngineFactory, SessionManager, SessionManagerConfig, UdpMediaEngine};

use crate::config::NodeConfig;
use crate::controller::{CallController, Dispatch};
use crate::error::Result;
use crate::media_router::MediaRouter;
use crate::routing::HashRing;
use crate::sip::SipRequest;
use crate::transport::SignalingTransport;

/// A fully wired node
pub struct NodeServer {
    config: Arc<NodeConfig>,
    ring: Arc<HashRing>,
    sessions: Arc<SessionManager>,
    controller: Arc<CallController>,
    dtmf: Arc<DtmfDetector>,
    conferences: Arc<ConferenceRegistry>,
    media: Arc<MediaRouter>,
    inbound_rtp: Mutex<Option<mpsc::Receiver<InboundRtp>>>,
}

impl NodeServer {
    /// Build a node whose sessions negotiate media on UDP sockets bound to
    /// `media.rtp_bind_ip`
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.media.rtp_queue_capacity);
        let factory = UdpMediaEngine::factory_with_sink(config.media.rtp_bind_ip, tx);
        let server = Self::with_media_factory(config, factory)?;
        *server.inbound_rtp.lock() = Some(rx);
        Ok(server)
    }

    /// Build a node with a custom media engine per session. Inbound RTP is
    /// up to those engines; nothing is routed to [`media`](Self::media).
    pub fn with_media_factory(config: NodeConfig, media_factory: MediaEngineFactory) -> Result<Self> {
        config.validate()?;
        let conference_codec = config.media.conference_codec()?;

        let ring = Arc::new(HashRing::with_instances(
            config.cluster.virtual_nodes,
            config.cluster.instances.iter().cloned(),
        ));

        let sessions = Arc::new(SessionManager::with_media_factory(
            SessionManagerConfig {
                retention: config.sessions.retention(),
                cleanup_interval: config.sessions.cleanup_interval(),
            },
            media_factory,
        ));

        let controller = Arc::new(CallController::new(
            config.cluster.instance_id.clone(),
            ring.clone(),
            sessions.clone(),
        ));

        let dtmf = Arc::new(DtmfDetector::new(config.media.dtmf_payload_type));
        let conferences = Arc::new(ConferenceRegistry::new(ConferenceConfig {
            codec: conference_codec,
            queue_capacity: config.media.participant_queue_capacity,
            mixer: MixerConfig::default(),
        }));
        let media = Arc::new(MediaRouter::new(
            conference_codec,
            Arc::new(TranscodingService::new()),
            dtmf.clone(),
            conferences.clone(),
        ));

        info!(
            "Node {} configured with {} ring instances ({} virtual nodes each)",
            config.cluster.instance_id,
            ring.instances().len(),
            ring.virtual_nodes()
        );

        Ok(Self {
            config: Arc::new(config),
            ring,
            sessions,
            controller,
            dtmf,
            conferences,
            media,
            inbound_rtp: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ring(&self) -> &Arc<HashRing> {
        &self.ring
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn controller(&self) -> &Arc<CallController> {
        &self.controller
    }

    pub fn dtmf(&self) -> &Arc<DtmfDetector> {
        &self.dtmf
    }

    pub fn conferences(&self) -> &Arc<ConferenceRegistry> {
        &self.conferences
    }

    pub fn media(&self) -> &Arc<MediaRouter> {
        &self.media
    }

    /// Serve `transport` until `shutdown` is cancelled.
    ///
    /// Each request is handled on its own task. After cancellation no new
    /// requests are read; in-flight ones get `sessions.shutdown_grace_secs`
    /// to finish before they are aborted. Remaining sessions are then
    /// removed and their media closed.
    pub async fn run<T>(&self, transport: Arc<T>, shutdown: CancellationToken) -> Result<()>
    where
        T: SignalingTransport + 'static,
    {
        info!("🚀 Node {} serving requests", self.controller.instance_id());
        let cleanup = self.sessions.start_cleanup_task(shutdown.child_token());
        let media_drain = self
            .inbound_rtp
            .lock()
            .take()
            .map(|rx| tokio::spawn(drain_media(self.media.clone(), rx, shutdown.child_token())));
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = transport.recv() => match received {
                    Ok((request, from)) => {
                        let controller = self.controller.clone();
                        let transport = transport.clone();
                        in_flight.spawn(async move {
                            serve_request(&controller, transport.as_ref(), request, from).await;
                        });
                    }
                    Err(e) => error!("Failed to read signaling request: {}", e),
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Request task ended abnormally: {}", e);
                    }
                }
            }
        }

        info!("🛑 Shutting down node {}", self.controller.instance_id());
        let grace = self.config.sessions.shutdown_grace();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    warn!("Request task ended abnormally: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                "Grace period of {:?} elapsed with {} requests in flight, aborting them",
                grace,
                in_flight.len()
            );
            in_flight.abort_all();
        }

        if let Err(e) = cleanup.await {
            warn!("Session cleanup task ended abnormally: {}", e);
        }
        if let Some(media_drain) = media_drain {
            if let Err(e) = media_drain.await {
                warn!("Media routing task ended abnormally: {}", e);
            }
        }

        let terminated = self.sessions.terminate_all().await;
        info!("✅ Node stopped, {} sessions terminated", terminated);
        Ok(())
    }
}

async fn drain_media(media: Arc<MediaRouter>, mut rx: mpsc::Receiver<InboundRtp>, cancel: CancellationToken) {
    loop {
        let inbound = tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(inbound) => inbound,
                None => break,
            },
        };
        match media.route_inbound(&inbound) {
            Ok(outcome) => trace!("RTP for call {}: {:?}", inbound.call_id, outcome),
            Err(e) => debug!("Dropped RTP for call {}: {}", inbound.call_id, e),
        }
    }
    debug!("Media routing stopped");
}

async fn serve_request<T>(controller: &CallController, transport: &T, request: SipRequest, from: std::net::SocketAddr)
where
    T: SignalingTransport + ?Sized,
{
    match controller.handle_request(&request).await {
        Dispatch::Respond(response) => {
            if let Err(e) = transport.send(&request, &response, from).await {
                error!("Failed to send {} for call {} to {}: {}", response.status, request.call_id, from, e);
            }
        }
        Dispatch::NoResponse => debug!("{} for call {} needs no response", request.method, request.call_id),
        Dispatch::NotOwned { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::{SipMethod, SipResponse, StatusCode};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::sync::{mpsc, Mutex};

    /// Requests come from a channel; responses are collected
    struct ChannelTransport {
        incoming: Mutex<mpsc::Receiver<SipRequest>>,
        sent: mpsc::UnboundedSender<(String, SipResponse)>,
    }

    #[async_trait]
    impl SignalingTransport for ChannelTransport {
        async fn recv(&self) -> Result<(SipRequest, SocketAddr)> {
            let mut incoming = self.incoming.lock().await;
            match incoming.recv().await {
                Some(request) => Ok((request, "127.0.0.1:5060".parse().unwrap())),
                None => std::future::pending().await,
            }
        }

        async fn send(&self, request: &SipRequest, response: &SipResponse, _to: SocketAddr) -> Result<()> {
            let _ = self.sent.send((request.call_id.clone(), response.clone()));
            Ok(())
        }
    }

    fn single_node_config() -> NodeConfig {
        let mut config = NodeConfig::default();
        config.cluster.instance_id = "solo".to_string();
        config.cluster.instances = vec!["solo".to_string()];
        config
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = single_node_config();
        config.cluster.instance_id = "missing".to_string();
        assert!(NodeServer::new(config).is_err());
    }

    #[tokio::test]
    async fn test_serves_until_cancelled() {
        let server = NodeServer::new(single_node_config()).unwrap();
        let (req_tx, req_rx) = mpsc::channel(8);
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport {
            incoming: Mutex::new(req_rx),
            sent: sent_tx,
        });
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        let handle = tokio::spawn(async move { server.run(transport, token).await });

        req_tx.send(SipRequest::new(SipMethod::Options, "opt-1")).await.unwrap();
        req_tx
            .send(SipRequest::new(SipMethod::Register, "reg-1").with_header("Authorization", "nope"))
            .await
            .unwrap();

        let mut statuses = Vec::new();
        for _ in 0..2 {
            let (call_id, response) = tokio::time::timeout(Duration::from_secs(5), sent_rx.recv())
                .await
                .unwrap()
                .unwrap();
            statuses.push((call_id, response.status));
        }
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            statuses,
            vec![
                ("opt-1".to_string(), StatusCode::OK),
                ("reg-1".to_string(), StatusCode::UNAUTHORIZED),
            ]
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_terminates_sessions() {
        let server = Arc::new(NodeServer::new(single_node_config()).unwrap());
        server.sessions().create_session("left-over");
        assert_eq!(server.sessions().len(), 1);

        let (_req_tx, req_rx) = mpsc::channel(1);
        let (sent_tx, _sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(ChannelTransport {
            incoming: Mutex::new(req_rx),
            sent: sent_tx,
        });

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        server.run(transport, shutdown).await.unwrap();
        assert!(server.sessions().is_empty());
    }
}
