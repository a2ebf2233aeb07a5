//! DTMF detection from RFC 4733 telephone-event packets
//!
//! Payload layout (4 bytes):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     event     |E|R| volume    |          duration             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A key press is reported once, when a packet with the end bit arrives.
//! Notifications are dispatched on their own tasks so packet processing never
//! waits for a handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::rtp::RtpPacket;

/// Default dynamic payload type for telephone-event
pub const DEFAULT_DTMF_PAYLOAD_TYPE: u8 = 101;

const MIN_PAYLOAD_LEN: usize = 4;
const END_OF_EVENT: u8 = 0x80;
const VOLUME_MASK: u8 = 0x3F;
const EVENT_LOG_CAPACITY: usize = 64;

/// DTMF tone definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtmfTone {
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Star,
    Pound,
    A,
    B,
    C,
    D,
    /// Event code outside 0-15
    Unknown(u8),
}

impl DtmfTone {
    /// Map an RFC 4733 event code
    pub fn from_event_code(code: u8) -> Self {
        match code {
            0 => Self::Digit0,
            1 => Self::Digit1,
            2 => Self::Digit2,
            3 => Self::Digit3,
            4 => Self::Digit4,
            5 => Self::Digit5,
            6 => Self::Digit6,
            7 => Self::Digit7,
            8 => Self::Digit8,
            9 => Self::Digit9,
            10 => Self::Star,
            11 => Self::Pound,
            12 => Self::A,
            13 => Self::B,
            14 => Self::C,
            15 => Self::D,
            other => Self::Unknown(other),
        }
    }

    /// Keypad character; `'?'` for unknown events
    pub fn to_char(self) -> char {
        match self {
            Self::Digit0 => '0',
            Self::Digit1 => '1',
            Self::Digit2 => '2',
            Self::Digit3 => '3',
            Self::Digit4 => '4',
            Self::Digit5 => '5',
            Self::Digit6 => '6',
            Self::Digit7 => '7',
            Self::Digit8 => '8',
            Self::Digit9 => '9',
            Self::Star => '*',
            Self::Pound => '#',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::Unknown(_) => '?',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Digit0),
            '1' => Some(Self::Digit1),
            '2' => Some(Self::Digit2),
            '3' => Some(Self::Digit3),
            '4' => Some(Self::Digit4),
            '5' => Some(Self::Digit5),
            '6' => Some(Self::Digit6),
            '7' => Some(Self::Digit7),
            '8' => Some(Self::Digit8),
            '9' => Some(Self::Digit9),
            '*' => Some(Self::Star),
            '#' => Some(Self::Pound),
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            'C' | 'c' => Some(Self::C),
            'D' | 'd' => Some(Self::D),
            _ => None,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for DtmfTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Decoded telephone-event payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfPayload {
    pub event: u8,
    pub end_of_event: bool,
    /// Power level in -dBm0 (0-63)
    pub volume: u8,
    /// Duration in timestamp units
    pub duration: u16,
}

impl DtmfPayload {
    /// Parse the first four bytes of a telephone-event payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload {
            [event, flags, d0, d1, ..] => Ok(Self {
                event: *event,
                end_of_event: flags & END_OF_EVENT != 0,
                volume: flags & VOLUME_MASK,
                duration: u16::from_be_bytes([*d0, *d1]),
            }),
            _ => Err(Error::invalid_payload(format!(
                "DTMF payload needs {} bytes, got {}",
                MIN_PAYLOAD_LEN,
                payload.len()
            ))),
        }
    }

    pub fn tone(&self) -> DtmfTone {
        DtmfTone::from_event_code(self.event)
    }
}

/// A completed key press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtmfEvent {
    pub tone: DtmfTone,
    pub volume: u8,
    pub duration: u16,
    /// Session the key press belongs to, when known
    pub session_id: Option<String>,
}

/// Callback registered for one key
pub type DtmfHandler = Arc<dyn Fn(DtmfEvent) + Send + Sync>;

/// Application hook for session-level DTMF (IVR menus and the like)
pub trait DtmfApplication: Send + Sync {
    fn on_dtmf(&self, session_id: &str, tone: DtmfTone);
}

/// Stateless telephone-event decoder with a handler registry
pub struct DtmfDetector {
    payload_type: u8,
    handlers: RwLock<HashMap<char, DtmfHandler>>,
    application: RwLock<Option<Arc<dyn DtmfApplication>>>,
    events: broadcast::Sender<DtmfEvent>,
}

impl DtmfDetector {
    pub fn new(payload_type: u8) -> Self {
        let (events, _) = broadcast::channel(EVENT_LOG_CAPACITY);
        Self {
            payload_type,
            handlers: RwLock::new(HashMap::new()),
            application: RwLock::new(None),
            events,
        }
    }

    /// Configured telephone-event payload type
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Inspect one RTP packet.
    ///
    /// Returns the completed event when the end bit is set, `None` for
    /// intermediate packets of a key press.
    pub fn handle_dtmf(&self, packet: &RtpPacket) -> Result<Option<DtmfEvent>> {
        self.handle_session_dtmf(packet, None)
    }

    /// [`handle_dtmf`](Self::handle_dtmf) for a packet received on a known session
    pub fn handle_session_dtmf(&self, packet: &RtpPacket, session_id: Option<&str>) -> Result<Option<DtmfEvent>> {
        if packet.header.payload_type != self.payload_type {
            return Err(Error::NotDtmfPacket {
                expected: self.payload_type,
                actual: packet.header.payload_type,
            });
        }

        let payload = DtmfPayload::parse(&packet.payload)?;
        if !payload.end_of_event {
            return Ok(None);
        }

        let event = DtmfEvent {
            tone: payload.tone(),
            volume: payload.volume,
            duration: payload.duration,
            session_id: session_id.map(str::to_string),
        };
        self.dispatch(event.clone());
        Ok(Some(event))
    }

    /// Register the handler for a key, replacing any previous one
    pub fn register_handler<F>(&self, key: char, handler: F)
    where
        F: Fn(DtmfEvent) + Send + Sync + 'static,
    {
        self.handlers.write().insert(key, Arc::new(handler));
    }

    pub fn unregister_handler(&self, key: char) -> bool {
        self.handlers.write().remove(&key).is_some()
    }

    /// Install the session-level application hook
    pub fn set_application(&self, application: Arc<dyn DtmfApplication>) {
        *self.application.write() = Some(application);
    }

    /// Receive every completed key press
    pub fn subscribe(&self) -> broadcast::Receiver<DtmfEvent> {
        self.events.subscribe()
    }

    /// Application-level entry point, independent of packet parsing
    pub fn process_dtmf_event(&self, tone: DtmfTone, session_id: &str) {
        info!("Processing DTMF event {} for session {}", tone, session_id);

        let application = self.application.read().clone();
        match application {
            Some(app) => {
                let session_id = session_id.to_string();
                spawn_notification(move || app.on_dtmf(&session_id, tone));
            }
            None => debug!("No DTMF application installed, event {} only notified", tone),
        }

        self.dispatch(DtmfEvent {
            tone,
            volume: 0,
            duration: 0,
            session_id: Some(session_id.to_string()),
        });
    }

    fn dispatch(&self, event: DtmfEvent) {
        // Registry lock is released before any handler runs
        let handler = self.handlers.read().get(&event.tone.to_char()).cloned();
        let events = self.events.clone();

        spawn_notification(move || {
            info!("DTMF event received: {}", event.tone);
            // No subscribers is not an error
            let _ = events.send(event.clone());
            if let Some(handler) = handler {
                handler(event);
            }
        });
    }
}

impl Default for DtmfDetector {
    fn default() -> Self {
        Self::new(DEFAULT_DTMF_PAYLOAD_TYPE)
    }
}

/// Fire-and-forget: on the runtime's blocking pool when inside Tokio,
/// otherwise on a plain thread.
fn spawn_notification<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(f);
        }
        Err(_) => {
            std::thread::spawn(f);
        }
    }
}
