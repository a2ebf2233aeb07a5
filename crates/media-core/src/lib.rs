//! # Media Core for sipmesh
//!
//! Packet-level media processing for a sipmesh node. Everything here works on
//! individual RTP packets handed over by the transport layer; nothing in this
//! crate owns a socket.
//!
//! ## Architecture
//!
//! - [`rtp`]: the `rvoip-rtp-core` packet model and datagram helpers
//! - [`codec`]: codec identification and G.711 μ-law sample conversion
//! - [`mixer`]: the mixing engine contract and its default implementation
//! - [`transcoder`]: per-packet codec conversion with a cached mixer per codec pair
//! - [`dtmf`]: RFC 4733 telephone-event detection and handler dispatch
//! - [`conference`]: rooms, participants and mixed fan-out with bounded queues
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sipmesh_media_core::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let registry = ConferenceRegistry::default();
//! registry.create_room("standup")?;
//! let _alice = registry.join_room("standup", "alice")?;
//! let mut bob = registry.join_room("standup", "bob")?;
//!
//! let packet = RtpPacket::new_with_payload(0, 1, 160, 0x1234, vec![0xFFu8; 160].into());
//! registry.process_rtp_packet("standup", "alice", &packet)?;
//! assert!(bob.try_recv().is_ok());
//! # Ok(())
//! # }
//! ```

pub mod error;

pub mod codec;
pub mod conference;
pub mod dtmf;
pub mod mixer;
pub mod rtp;
pub mod transcoder;

pub use error::{Error, Result};

pub use codec::CodecType;
pub use conference::{ConferenceConfig, ConferenceRegistry};
pub use dtmf::{DtmfDetector, DtmfEvent, DtmfTone};
pub use mixer::{AudioMixer, Mixer, MixerConfig};
pub use rtp::{RtpHeader, RtpPacket};
pub use transcoder::TranscodingService;

/// Commonly used types
pub mod prelude {
    pub use crate::codec::{g711, CodecType};
    pub use crate::conference::{ConferenceConfig, ConferenceRegistry, DEFAULT_PARTICIPANT_QUEUE};
    pub use crate::dtmf::{
        DtmfApplication, DtmfDetector, DtmfEvent, DtmfPayload, DtmfTone, DEFAULT_DTMF_PAYLOAD_TYPE,
    };
    pub use crate::error::{Error, Result};
    pub use crate::mixer::{AudioMixer, Mixer, MixerConfig};
    pub use crate::rtp::{RtpHeader, RtpPacket};
    pub use crate::transcoder::{CodecKey, TranscodingService};
}
