//! Per-connection protocol state machine.
//!
//! A [`Session`] is sans-IO: the owner hands it received bytes and writes
//! out whatever it returns. It owns both cipher streams, the pending
//! challenge, the verified peer identity and the chunk accumulators.
//!
//! ```text
//! Connecting ──start()──▶ Ready ──▶ HandshakeSent ──ack ok──▶ Verified
//!      │                                  │                      │
//!      └──────────────── close() ─────────┴──────────────────────┴──▶ Closed
//! ```

pub mod framing;
pub mod handshake;

use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::chunk::ChunkReassembler;
use crate::crypto::{CipherDirection, CryptoError, SessionKey, StreamCipher, BLOCK_SIZE};
use crate::domain::machine::{LocalMachine, PeerIdentity};
use crate::protocol::{finalize, Packet, PacketIdCounter, PacketType};

pub use framing::DecryptPipeline;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Ready,
    HandshakeSent,
    Verified,
    Closed,
}

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Which of the two listening ports the connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Message,
    Clipboard,
}

impl Channel {
    fn handshake_repeat(self) -> usize {
        match self {
            Channel::Message => handshake::MESSAGE_HANDSHAKE_REPEAT,
            Channel::Clipboard => handshake::CLIPBOARD_HANDSHAKE_REPEAT,
        }
    }
}

/// Errors returned by [`Session`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The operation needs a live connection but the session is in `state`.
    #[error("session is not open (state {0:?})")]
    NotOpen(SessionState),

    /// `start` was called twice.
    #[error("session already started")]
    AlreadyStarted,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Something the owner must act on after feeding bytes to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    /// Ciphertext to write to the connection.
    Transmit(Vec<u8>),
    /// The handshake completed; the peer is now known.
    Verified(PeerIdentity),
    /// A validated application packet from a verified peer.
    Packet(Packet),
}

/// One TCP connection's protocol state.
#[derive(Debug)]
pub struct Session {
    direction: Direction,
    channel: Channel,
    state: SessionState,
    local: LocalMachine,
    magic: u32,
    encryptor: StreamCipher,
    decryptor: DecryptPipeline,
    packet_ids: PacketIdCounter,
    challenge: Option<[u32; 4]>,
    peer: Option<PeerIdentity>,
    reassembler: ChunkReassembler,
    handshake_failures: u32,
}

impl Session {
    pub fn new(
        key: &SessionKey,
        local: LocalMachine,
        direction: Direction,
        channel: Channel,
    ) -> Self {
        Self {
            direction,
            channel,
            state: SessionState::Connecting,
            local,
            magic: key.magic(),
            encryptor: key.make_stream_cipher(CipherDirection::Encrypt),
            decryptor: DecryptPipeline::new(key),
            packet_ids: PacketIdCounter::new(),
            challenge: None,
            peer: None,
            reassembler: ChunkReassembler::new(),
            handshake_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn is_verified(&self) -> bool {
        self.state == SessionState::Verified
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// The peer, once verified.
    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    /// Updates the verified peer's display name from a liveness packet.
    /// Returns `true` if the name changed.
    pub fn refresh_peer_name(&mut self, name: &str) -> bool {
        match self.peer.as_mut() {
            Some(peer) if !name.is_empty() && peer.name != name => {
                peer.name = name.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn handshake_failures(&self) -> u32 {
        self.handshake_failures
    }

    pub fn invalid_packets(&self) -> u64 {
        self.decryptor.invalid_packets()
    }

    pub fn reassembler(&self) -> &ChunkReassembler {
        &self.reassembler
    }

    /// Clipboard and drag/drop accumulators.
    pub fn reassembler_mut(&mut self) -> &mut ChunkReassembler {
        &mut self.reassembler
    }

    /// Called once the TCP connection is up. Returns the synchronisation
    /// block followed by the handshake challenge(s), already encrypted.
    pub fn start(&mut self) -> Result<Vec<u8>, SessionError> {
        match self.state {
            SessionState::Connecting => {}
            SessionState::Closed => return Err(SessionError::NotOpen(self.state)),
            _ => return Err(SessionError::AlreadyStarted),
        }
        self.state = SessionState::Ready;

        let mut sync = [0u8; BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut sync);
        let mut wire = self.encryptor.process(&sync)?;

        let mut challenge = handshake::challenge_packet();
        self.challenge = Some(challenge.machine_words());
        for _ in 0..self.channel.handshake_repeat() {
            wire.extend(self.seal(&mut challenge)?);
        }

        self.state = SessionState::HandshakeSent;
        debug!(
            channel = ?self.channel,
            direction = ?self.direction,
            "handshake challenge sent"
        );
        Ok(wire)
    }

    /// Stamps, numbers, seals and encrypts `packet`.
    ///
    /// The packet's `id`, `src`, name, magic tag and checksum are overwritten.
    pub fn send_packet(&mut self, packet: &mut Packet) -> Result<Vec<u8>, SessionError> {
        match self.state {
            SessionState::Connecting | SessionState::Closed => {
                Err(SessionError::NotOpen(self.state))
            }
            _ => self.seal(packet),
        }
    }

    /// Like [`send_packet`](Self::send_packet) but keeps the caller's `src`
    /// and name. Matrix packets use those fields for slot and slot name.
    pub fn send_verbatim(&mut self, packet: &mut Packet) -> Result<Vec<u8>, SessionError> {
        match self.state {
            SessionState::Connecting | SessionState::Closed => {
                Err(SessionError::NotOpen(self.state))
            }
            _ => self.encrypt(packet),
        }
    }

    fn seal(&mut self, packet: &mut Packet) -> Result<Vec<u8>, SessionError> {
        self.local.stamp(packet);
        self.encrypt(packet)
    }

    fn encrypt(&mut self, packet: &mut Packet) -> Result<Vec<u8>, SessionError> {
        packet.set_id(self.packet_ids.next());
        finalize(packet, self.magic);
        Ok(self.encryptor.process(packet.as_bytes())?)
    }

    /// Feeds received ciphertext through the pipeline and the handshake.
    pub fn receive(&mut self, data: &[u8]) -> Result<Vec<SessionOutput>, SessionError> {
        match self.state {
            SessionState::Connecting | SessionState::Closed => {
                return Err(SessionError::NotOpen(self.state))
            }
            _ => {}
        }

        let packets = self.decryptor.push(data)?;
        let mut outputs = Vec::new();
        for packet in packets {
            self.handle_packet(packet, &mut outputs)?;
        }
        Ok(outputs)
    }

    fn handle_packet(
        &mut self,
        packet: Packet,
        outputs: &mut Vec<SessionOutput>,
    ) -> Result<(), SessionError> {
        let kind = packet.packet_type();
        if self.state == SessionState::Verified {
            if !matches!(kind, PacketType::Handshake | PacketType::HandshakeAck) {
                outputs.push(SessionOutput::Packet(packet));
            }
            return Ok(());
        }

        match kind {
            PacketType::Handshake => {
                let mut ack = handshake::ack_packet(&packet);
                outputs.push(SessionOutput::Transmit(self.seal(&mut ack)?));
            }
            PacketType::HandshakeAck => {
                let Some(sent) = self.challenge else {
                    return Ok(());
                };
                if handshake::verify(sent, &packet) {
                    let peer = PeerIdentity::from_packet(&packet);
                    info!(
                        peer_id = peer.id,
                        peer_name = %peer.name,
                        channel = ?self.channel,
                        "session verified"
                    );
                    self.challenge = None;
                    self.peer = Some(peer.clone());
                    self.state = SessionState::Verified;
                    outputs.push(SessionOutput::Verified(peer));
                } else {
                    self.handshake_failures += 1;
                    if self.handshake_failures == 1 {
                        warn!(
                            peer_id = packet.src(),
                            channel = ?self.channel,
                            "handshake verification failed; check that both sides use the same key"
                        );
                    }
                }
            }
            other => trace!(?other, "ignoring packet before verification"),
        }
        Ok(())
    }

    /// Tears the session down. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.challenge = None;
        self.reassembler.clear();
        debug!(channel = ?self.channel, peer = ?self.peer, "session closed");
    }
}
