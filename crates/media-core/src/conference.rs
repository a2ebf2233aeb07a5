//! Conference rooms and per-packet mixing fan-out
//!
//! The registry table and each room have their own lock. The table lock is
//! only held long enough to find a room; the room lock is taken after it is
//! released, so work in one room never blocks another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::codec::CodecType;
use crate::error::{Error, Result};
use crate::mixer::{AudioMixer, Mixer, MixerConfig};
use crate::rtp::{self, RtpPacket};

/// Default capacity of a participant's outbound queue
pub const DEFAULT_PARTICIPANT_QUEUE: usize = 100;

/// Conference settings shared by every room of a registry
#[derive(Debug, Clone)]
pub struct ConferenceConfig {
    /// Codec of the audio flowing through rooms
    pub codec: CodecType,
    /// Outbound queue capacity per participant
    pub queue_capacity: usize,
    pub mixer: MixerConfig,
}

impl Default for ConferenceConfig {
    fn default() -> Self {
        Self {
            codec: CodecType::Pcmu,
            queue_capacity: DEFAULT_PARTICIPANT_QUEUE,
            mixer: MixerConfig::default(),
        }
    }
}

struct Participant {
    sender: mpsc::Sender<RtpPacket>,
}

/// Participants and mixer sources change together under the room lock
struct RoomState {
    participants: HashMap<String, Participant>,
    mixer: AudioMixer,
}

struct ConferenceRoom {
    id: String,
    state: Mutex<RoomState>,
}

/// Registry of conference rooms
pub struct ConferenceRegistry {
    config: ConferenceConfig,
    rooms: RwLock<HashMap<String, Arc<ConferenceRoom>>>,
}

impl ConferenceRegistry {
    pub fn new(config: ConferenceConfig) -> Self {
        Self {
            config,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn create_room(&self, room_id: &str) -> Result<()> {
        let mut rooms = self.rooms.write();
        if rooms.contains_key(room_id) {
            return Err(Error::RoomExists(room_id.to_string()));
        }

        let room = ConferenceRoom {
            id: room_id.to_string(),
            state: Mutex::new(RoomState {
                participants: HashMap::new(),
                mixer: AudioMixer::new(self.config.mixer.clone()),
            }),
        };
        rooms.insert(room_id.to_string(), Arc::new(room));

        info!("Created conference room: {}", room_id);
        Ok(())
    }

    /// Remove a room, closing every participant's queue
    pub fn delete_room(&self, room_id: &str) -> Result<()> {
        let room = self
            .rooms
            .write()
            .remove(room_id)
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;

        let closed = {
            let mut state = room.state.lock();
            let closed = state.participants.len();
            state.participants.clear();
            closed
        };

        info!("Deleted conference room {} ({} participants disconnected)", room_id, closed);
        Ok(())
    }

    /// Add a participant and return the receiving end of its outbound queue
    ///
    /// ```rust
    /// # use sipmesh_media_core::{ConferenceRegistry, RtpPacket};
    /// # tokio_test::block_on(async {
    /// let registry = ConferenceRegistry::default();
    /// registry.create_room("standup").unwrap();
    /// let _alice = registry.join_room("standup", "alice").unwrap();
    /// let mut bob = registry.join_room("standup", "bob").unwrap();
    ///
    /// let packet = RtpPacket::new_with_payload(0, 1, 160, 42, vec![0xFFu8; 160].into());
    /// assert_eq!(registry.process_rtp_packet("standup", "alice", &packet).unwrap(), 1);
    /// assert_eq!(bob.recv().await.unwrap().header.ssrc, 42);
    /// # });
    /// ```
    pub fn join_room(&self, room_id: &str, participant_id: &str) -> Result<mpsc::Receiver<RtpPacket>> {
        let room = self.room(room_id)?;
        let mut state = room.state.lock();

        if state.participants.contains_key(participant_id) {
            return Err(Error::ParticipantExists {
                room: room_id.to_string(),
                participant: participant_id.to_string(),
            });
        }

        // Mixer first: if it refuses, the participant table is untouched
        state.mixer.add_source(participant_id)?;
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        state
            .participants
            .insert(participant_id.to_string(), Participant { sender });

        info!("Participant {} joined room {}", participant_id, room_id);
        Ok(receiver)
    }

    /// Remove a participant; its queue is closed once buffered packets drain
    pub fn leave_room(&self, room_id: &str, participant_id: &str) -> Result<()> {
        let room = self.room(room_id)?;
        let mut state = room.state.lock();

        if !state.participants.contains_key(participant_id) {
            return Err(Error::ParticipantNotFound {
                room: room_id.to_string(),
                participant: participant_id.to_string(),
            });
        }

        state.mixer.remove_source(participant_id)?;
        state.participants.remove(participant_id);

        info!("Participant {} left room {}", participant_id, room_id);
        Ok(())
    }

    /// Mix one packet from `participant_id` and deliver it to everyone else.
    ///
    /// Returns the number of participants the mixed packet was queued for.
    /// An unknown room is not an error: the packet is dropped with a warning.
    /// Full queues drop the packet for that participant only.
    pub fn process_rtp_packet(&self, room_id: &str, participant_id: &str, packet: &RtpPacket) -> Result<usize> {
        let room = match self.rooms.read().get(room_id) {
            Some(room) => room.clone(),
            None => {
                warn!("Attempt to process RTP packet for non-existent room: {}", room_id);
                return Ok(0);
            }
        };

        let codec = self.config.codec;
        let samples = codec.decode(&packet.payload)?;

        let mut state = room.state.lock();
        if !state.participants.contains_key(participant_id) {
            return Err(Error::ParticipantNotFound {
                room: room.id.clone(),
                participant: participant_id.to_string(),
            });
        }

        state.mixer.add_samples(participant_id, &samples)?;
        let mixed = state.mixer.mix();
        let payload = codec.encode(&mixed)?;
        let mixed_packet = rtp::with_payload(packet, payload);

        let mut delivered = 0;
        for (id, participant) in state.participants.iter() {
            if id == participant_id {
                continue;
            }
            match participant.sender.try_send(mixed_packet.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Participant buffer full, dropping packet: {} in room {}", id, room.id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Participant {} in room {} stopped receiving", id, room.id);
                }
            }
        }

        Ok(delivered)
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.read().contains_key(room_id)
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.read().keys().cloned().collect()
    }

    pub fn participant_count(&self, room_id: &str) -> Result<usize> {
        Ok(self.room(room_id)?.state.lock().participants.len())
    }

    fn room(&self, room_id: &str) -> Result<Arc<ConferenceRoom>> {
        self.rooms
            .read()
            .get(room_id)
            .cloned()
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))
    }
}

impl Default for ConferenceRegistry {
    fn default() -> Self {
        Self::new(ConferenceConfig::default())
    }
}
