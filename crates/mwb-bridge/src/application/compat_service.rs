//! CompatService: the sans-IO orchestrator behind the MWB-compatible bridge.
//!
//! The service owns the session key, the session registry, every timer and
//! the reconnect counters. It performs no I/O: callers feed it commands,
//! network notifications and the current time, then drain
//! [`poll_action`](CompatService::poll_action) and
//! [`poll_event`](CompatService::poll_event).
//!
//! # Data flow
//!
//! ```text
//!  Command ──▶ handle_command ─┐
//!  on_data ──▶ Session ────────┼──▶ NetAction queue ──▶ runtime (sockets)
//!  tick    ──▶ TimerWheel ─────┘
//!                              └──▶ CompatEvent queue ──▶ collaborator
//! ```
//!
//! Every packet from a verified session is dispatched by type in
//! [`CompatService::dispatch`]. Clipboard payloads are reassembled per
//! session and surfaced once their end marker arrives.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mwb_core::chunk::{
    decode_clipboard_text, decode_file_drop, encode_clipboard_text, encode_file_drop,
    split_payload,
};
use mwb_core::protocol::{KeyboardData, MouseData, Packet, PacketType};
use mwb_core::{
    derive_session_key, validate_passphrase, Channel, CryptoError, Direction, LocalMachine,
    MachineId, MachineMatrix, PeerIdentity, Session, SessionKey, SessionOutput, ID_ALL, ID_NONE,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::commands::{Command, CompatEvent};
use super::reconnect::{
    ReconnectDecision, ReconnectPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
use super::session_registry::{
    DialTarget, PortPair, SessionEntry, SessionId, SessionOrigin, SessionRegistry,
};
use super::timer_wheel::TimerWheel;

/// Default TCP port of the message channel.
pub const DEFAULT_MESSAGE_PORT: u16 = 15101;

/// Default TCP port of the clipboard channel.
pub const DEFAULT_CLIPBOARD_PORT: u16 = 15100;

/// Interval between `HeartbeatEx` packets on a verified session.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Interval between clipboard-channel keep-alives.
pub const DEFAULT_CLIPBOARD_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Errors reported by direct calls into the service.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("cannot start: {0}")]
    Crypto(#[from] CryptoError),

    #[error("service is not running")]
    NotRunning,
}

/// Runtime-independent settings for the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub local: LocalMachine,
    pub bind_address: String,
    pub ports: PortPair,
    pub heartbeat_interval: Duration,
    pub clipboard_keepalive_interval: Duration,
    pub reconnect_max_attempts: u32,
    pub reconnect_delay: Duration,
}

impl ServiceConfig {
    pub fn new(local: LocalMachine) -> Self {
        Self {
            local,
            bind_address: "0.0.0.0".to_string(),
            ports: PortPair {
                message: DEFAULT_MESSAGE_PORT,
                clipboard: DEFAULT_CLIPBOARD_PORT,
            },
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            clipboard_keepalive_interval: DEFAULT_CLIPBOARD_KEEPALIVE_INTERVAL,
            reconnect_max_attempts: DEFAULT_MAX_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// I/O the runtime must perform on the service's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetAction {
    /// Bind both listeners.
    Listen { bind_address: String, ports: PortPair },
    StopListening,
    /// Open a TCP connection; report back with the same `id`.
    Dial {
        id: SessionId,
        host: String,
        port: u16,
        channel: Channel,
    },
    Send { id: SessionId, bytes: Vec<u8> },
    /// Abort the connection's I/O tasks. Unknown ids are ignored.
    Close { id: SessionId },
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote end closed the TCP stream.
    PeerClosed,
    /// Read or write failed.
    Transport(String),
    /// The dial never connected.
    ConnectFailed(String),
    /// The peer said goodbye.
    ByeBye,
    /// A newer verified session to the same peer replaced this one.
    Superseded,
    /// The peer's message session went away.
    MessageSessionLost,
    /// Local shutdown or restart.
    Stopped,
    /// The session rejected its input.
    Protocol(String),
}

impl CloseReason {
    /// Losses that make an eligible session redial.
    pub fn is_transport_loss(&self) -> bool {
        matches!(
            self,
            CloseReason::PeerClosed | CloseReason::Transport(_) | CloseReason::ConnectFailed(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TimerEvent {
    Heartbeat(SessionId),
    ClipboardKeepAlive(SessionId),
    Reconnect { target: DialTarget, attempt: u32 },
}

impl TimerEvent {
    fn session(&self) -> Option<SessionId> {
        match self {
            TimerEvent::Heartbeat(id) | TimerEvent::ClipboardKeepAlive(id) => Some(*id),
            TimerEvent::Reconnect { .. } => None,
        }
    }

    fn redials(&self, host: &str) -> bool {
        matches!(self, TimerEvent::Reconnect { target, .. } if target.host == host)
    }
}

#[derive(Debug, Clone)]
struct PendingDial {
    target: DialTarget,
    channel: Channel,
    reconnect: bool,
}

/// Sans-IO protocol orchestrator. See the module docs.
#[derive(Debug)]
pub struct CompatService {
    config: ServiceConfig,
    key: Option<SessionKey>,
    registry: SessionRegistry,
    pending_dials: HashMap<SessionId, PendingDial>,
    timers: TimerWheel<TimerEvent>,
    reconnect: ReconnectPolicy,
    matrix: MachineMatrix,
    active_machine: Option<MachineId>,
    closed_for_reconnect: Vec<DialTarget>,
    actions: VecDeque<NetAction>,
    events: VecDeque<CompatEvent>,
}

impl CompatService {
    pub fn new(config: ServiceConfig) -> Self {
        let reconnect =
            ReconnectPolicy::new(config.reconnect_max_attempts, config.reconnect_delay);
        Self {
            config,
            key: None,
            registry: SessionRegistry::new(),
            pending_dials: HashMap::new(),
            timers: TimerWheel::new(),
            reconnect,
            matrix: MachineMatrix::new(),
            active_machine: None,
            closed_for_reconnect: Vec::new(),
            actions: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// `true` between a successful [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        self.key.is_some()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalMachine {
        &self.config.local
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// The most recently sent or received machine matrix.
    pub fn matrix(&self) -> &MachineMatrix {
        &self.matrix
    }

    pub fn active_machine(&self) -> Option<MachineId> {
        self.active_machine
    }

    pub fn connected_peers(&self) -> Vec<PeerIdentity> {
        self.registry.connected_peers()
    }

    /// When the runtime should next call [`tick`](Self::tick).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn poll_action(&mut self) -> Option<NetAction> {
        self.actions.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<CompatEvent> {
        self.events.pop_front()
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    /// Applies one collaborator command. Failures surface as `Error` events.
    pub fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::Start { passphrase } => {
                let _ = self.start(&passphrase);
            }
            Command::Stop => self.stop(),
            Command::UpdatePassphrase { passphrase } => {
                let _ = self.update_passphrase(&passphrase);
            }
            Command::UpdatePorts { ports } => self.update_ports(ports),
            Command::ConnectToHost { ip, ports } => {
                let _ = self.connect_to_host(&ip, ports);
            }
            Command::SendMachineMatrix {
                names,
                two_row,
                swap,
            } => self.send_machine_matrix(&names, two_row, swap),
            Command::SendNextMachine { target } => self.send_next_machine(target),
            Command::SendMouseEvent(data) => self.send_mouse_event(data),
            Command::SendKeyEvent(data) => self.send_key_event(data),
            Command::SendHideMouse => self.send_hide_mouse(),
            Command::SendFileDrop { paths } => self.send_file_drop(&paths),
            Command::SendClipboardText { text } => self.send_clipboard_text(&text),
            Command::SendClipboardImage { bytes } => self.send_clipboard_image(&bytes),
        }
        self.flush_closed(now);
    }

    /// Validates the passphrase, derives the key and requests both listeners.
    ///
    /// A running service is stopped first. On failure the service stays
    /// stopped and an `Error` event is emitted.
    pub fn start(&mut self, passphrase: &str) -> Result<(), ServiceError> {
        if self.is_running() {
            self.stop();
        }

        let derived =
            validate_passphrase(passphrase).and_then(|normalized| derive_session_key(&normalized));
        let key = match derived {
            Ok(key) => key,
            Err(e) => {
                warn!("refusing to start: {e}");
                self.emit_error(format!("cannot start: {e}"));
                return Err(e.into());
            }
        };

        info!(
            machine_id = self.config.local.id(),
            machine_name = self.config.local.name(),
            "compatibility service starting"
        );
        self.key = Some(key);
        self.actions.push_back(NetAction::Listen {
            bind_address: self.config.bind_address.clone(),
            ports: self.config.ports,
        });
        Ok(())
    }

    /// Says goodbye to verified peers, closes every session, cancels every
    /// timer and stops the listeners.
    pub fn stop(&mut self) {
        let was_running = self.is_running();

        for id in self.registry.verified(Channel::Message) {
            self.send_to(id, Packet::control(PacketType::ByeBye, ID_ALL));
        }
        for id in self.registry.all_ids() {
            self.close_session(id, CloseReason::Stopped);
        }
        for id in self.pending_dials.keys().copied().collect::<Vec<_>>() {
            self.actions.push_back(NetAction::Close { id });
        }
        self.pending_dials.clear();
        self.closed_for_reconnect.clear();
        self.timers.clear();
        self.reconnect.reset_all();
        self.active_machine = None;
        self.key = None;

        if was_running {
            self.actions.push_back(NetAction::StopListening);
            info!("compatibility service stopped");
        }
    }

    /// Restarts every session under a new passphrase.
    pub fn update_passphrase(&mut self, passphrase: &str) -> Result<(), ServiceError> {
        self.stop();
        self.start(passphrase)
    }

    /// Stores new listening ports and rebinds if running.
    pub fn update_ports(&mut self, ports: PortPair) {
        self.config.ports = ports;
        if self.is_running() {
            self.actions.push_back(NetAction::StopListening);
            self.actions.push_back(NetAction::Listen {
                bind_address: self.config.bind_address.clone(),
                ports,
            });
        }
    }

    /// Dials `ip`'s message port. The session redials on transport loss.
    pub fn connect_to_host(
        &mut self,
        ip: &str,
        ports: PortPair,
    ) -> Result<SessionId, ServiceError> {
        if !self.is_running() {
            self.emit_error(format!("cannot connect to {ip}: service is not running"));
            return Err(ServiceError::NotRunning);
        }
        let target = DialTarget {
            host: ip.to_string(),
            ports,
        };
        self.reconnect.reset(&target.host);
        let cancelled = self.timers.cancel_where(|t| t.redials(&target.host));
        if cancelled > 0 {
            debug!(host = %target.host, cancelled, "pending reconnect replaced by explicit dial");
        }
        Ok(self.dial(target, Channel::Message, true))
    }

    fn dial(&mut self, target: DialTarget, channel: Channel, reconnect: bool) -> SessionId {
        let id = self.registry.allocate_id();
        debug!(%id, host = %target.host, ?channel, "dialing");
        self.actions.push_back(NetAction::Dial {
            id,
            host: target.host.clone(),
            port: target.port_for(channel),
            channel,
        });
        self.pending_dials.insert(
            id,
            PendingDial {
                target,
                channel,
                reconnect,
            },
        );
        id
    }

    // ── Outgoing operations ───────────────────────────────────────────────────

    /// Sends four `Matrix` packets (slots 1..=4) to every verified message session.
    pub fn send_machine_matrix<S: AsRef<str>>(
        &mut self,
        names: &[S],
        two_row: bool,
        swap: bool,
    ) {
        self.matrix = MachineMatrix::from_names(names, two_row, swap);
        let packets = self.matrix.to_packets();

        for id in self.registry.verified(Channel::Message) {
            for packet in &packets {
                let mut packet = packet.clone();
                packet.set_des(ID_ALL);
                self.send_verbatim_to(id, packet);
            }
        }
    }

    /// Records `target` as the machine receiving input and tells every peer.
    pub fn send_next_machine(&mut self, target: MachineId) {
        self.active_machine = (target != ID_NONE).then_some(target);

        self.broadcast_input(Packet::control(PacketType::NextMachine, target));
    }

    pub fn send_mouse_event(&mut self, data: MouseData) {
        self.broadcast_input(Packet::mouse_event(data, self.input_destination()));
    }

    pub fn send_key_event(&mut self, data: KeyboardData) {
        self.broadcast_input(Packet::key_event(data, self.input_destination()));
    }

    pub fn send_hide_mouse(&mut self) {
        let des = self.input_destination();
        self.broadcast_input(Packet::control(PacketType::HideMouse, des));
    }

    /// Sends clipboard text as deflated UTF-16LE chunks plus an end marker.
    pub fn send_clipboard_text(&mut self, text: &str) {
        match encode_clipboard_text(text) {
            Ok(payload) => self.send_chunked(
                None,
                PacketType::ClipboardText,
                PacketType::ClipboardDataEnd,
                &payload,
            ),
            Err(e) => {
                warn!("clipboard text not sent: {e}");
                self.emit_error(format!("clipboard text not sent: {e}"));
            }
        }
    }

    /// Sends image bytes as `ClipboardImage` chunks. An empty image is not sent.
    pub fn send_clipboard_image(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            debug!("empty clipboard image not sent");
            return;
        }
        self.send_chunked(
            None,
            PacketType::ClipboardImage,
            PacketType::ClipboardDataEnd,
            bytes,
        );
    }

    /// Sends a dropped file list: `ClipboardDragDrop`, the list as
    /// `ClipboardPush` chunks, then `ClipboardDragDropEnd`.
    pub fn send_file_drop<S: AsRef<str>>(&mut self, paths: &[S]) {
        let payload = encode_file_drop(paths);
        self.send_chunked(
            Some(PacketType::ClipboardDragDrop),
            PacketType::ClipboardPush,
            PacketType::ClipboardDragDropEnd,
            &payload,
        );
    }

    fn input_destination(&self) -> MachineId {
        self.active_machine.unwrap_or(ID_ALL)
    }

    fn broadcast_input(&mut self, packet: Packet) {
        for id in self.registry.verified(Channel::Message) {
            self.send_to(id, packet.clone());
        }
    }

    /// Clipboard payloads prefer clipboard sessions and fall back to message sessions.
    fn send_chunked(
        &mut self,
        begin_type: Option<PacketType>,
        chunk_type: PacketType,
        end_type: PacketType,
        payload: &[u8],
    ) {
        let mut targets = self.registry.verified(Channel::Clipboard);
        if targets.is_empty() {
            targets = self.registry.verified(Channel::Message);
        }
        if targets.is_empty() {
            debug!(?chunk_type, "no verified peers, payload dropped");
            return;
        }

        let chunks = split_payload(payload);
        let total = payload.len() as u32;
        for id in targets {
            let des = self.peer_of(id).map_or(ID_ALL, |p| p.id);
            if let Some(begin_type) = begin_type {
                self.send_to(id, Packet::control(begin_type, des));
            }
            for chunk in &chunks {
                self.send_to(id, Packet::payload_chunk(chunk_type, chunk, des));
            }
            self.send_to(id, Packet::end_marker(end_type, total, des));
        }
        trace!(?chunk_type, bytes = payload.len(), chunks = chunks.len(), "payload sent");
    }

    fn peer_of(&self, id: SessionId) -> Option<&PeerIdentity> {
        self.registry.get(id)?.session.peer()
    }

    fn send_to(&mut self, id: SessionId, mut packet: Packet) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        match entry.session.send_packet(&mut packet) {
            Ok(bytes) => self.actions.push_back(NetAction::Send { id, bytes }),
            Err(e) => debug!(%id, "send skipped: {e}"),
        }
    }

    fn send_verbatim_to(&mut self, id: SessionId, mut packet: Packet) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        match entry.session.send_verbatim(&mut packet) {
            Ok(bytes) => self.actions.push_back(NetAction::Send { id, bytes }),
            Err(e) => debug!(%id, "send skipped: {e}"),
        }
    }

    // ── Network notifications ─────────────────────────────────────────────────

    /// Both listeners are bound.
    pub fn on_listening(&mut self, message: SocketAddr, clipboard: SocketAddr) {
        info!(%message, %clipboard, "listening");
        self.events.push_back(CompatEvent::Listening { message, clipboard });
    }

    pub fn on_listen_failed(&mut self, error: &str) {
        warn!("listen failed: {error}");
        self.emit_error(format!("listen failed: {error}"));
    }

    /// Registers an inbound connection and starts its handshake.
    ///
    /// Returns `None` when the service is stopped; the runtime then drops
    /// the stream.
    pub fn on_accepted(&mut self, channel: Channel, remote: SocketAddr) -> Option<SessionId> {
        let key = self.key.as_ref()?;
        let id = self.registry.allocate_id();
        let session = Session::new(key, self.config.local.clone(), Direction::Inbound, channel);
        debug!(%id, %remote, ?channel, "accepted connection");
        self.open_session(id, session, SessionOrigin::Inbound { remote });
        Some(id)
    }

    /// A dial issued through [`NetAction::Dial`] connected.
    pub fn on_connected(&mut self, id: SessionId) {
        let pending = self.pending_dials.remove(&id);
        let (Some(pending), Some(key)) = (pending, self.key.clone()) else {
            debug!(%id, "connection no longer wanted");
            self.actions.push_back(NetAction::Close { id });
            return;
        };
        let session = Session::new(
            &key,
            self.config.local.clone(),
            Direction::Outbound,
            pending.channel,
        );
        info!(%id, host = %pending.target.host, channel = ?pending.channel, "connected");
        self.open_session(
            id,
            session,
            SessionOrigin::Dialed {
                target: pending.target,
                reconnect: pending.reconnect,
            },
        );
    }

    fn open_session(&mut self, id: SessionId, mut session: Session, origin: SessionOrigin) {
        match session.start() {
            Ok(bytes) => {
                self.actions.push_back(NetAction::Send { id, bytes });
                self.registry.insert(id, SessionEntry { session, origin });
            }
            Err(e) => {
                warn!(%id, "session failed to start: {e}");
                self.actions.push_back(NetAction::Close { id });
            }
        }
    }

    /// A dial failed before connecting.
    pub fn on_connect_failed(&mut self, id: SessionId, error: &str, now: Instant) {
        let Some(pending) = self.pending_dials.remove(&id) else {
            return;
        };
        let reason = CloseReason::ConnectFailed(error.to_string());
        warn!(%id, host = %pending.target.host, channel = ?pending.channel, ?reason, "connect failed");
        self.emit_log(format!("connect to {} failed: {error}", pending.target.host));
        if pending.reconnect && reason.is_transport_loss() && self.is_running() {
            self.schedule_reconnect(pending.target, now);
        }
    }

    /// Bytes arrived on a connection.
    pub fn on_data(&mut self, id: SessionId, bytes: &[u8], now: Instant) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        let outputs = match entry.session.receive(bytes) {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(%id, "dropping session: {e}");
                self.close_session(id, CloseReason::Protocol(e.to_string()));
                self.flush_closed(now);
                return;
            }
        };

        for output in outputs {
            if !self.registry.contains(id) {
                break;
            }
            match output {
                SessionOutput::Transmit(bytes) => {
                    self.actions.push_back(NetAction::Send { id, bytes })
                }
                SessionOutput::Verified(peer) => self.on_verified(id, peer, now),
                SessionOutput::Packet(packet) => self.dispatch(id, packet),
            }
        }
        self.flush_closed(now);
    }

    /// The connection closed; `error` is `None` for an orderly remote close.
    pub fn on_closed(&mut self, id: SessionId, error: Option<String>, now: Instant) {
        if !self.registry.contains(id) {
            return;
        }
        let reason = error.map_or(CloseReason::PeerClosed, CloseReason::Transport);
        self.close_session(id, reason);
        self.flush_closed(now);
    }

    // ── Timers ────────────────────────────────────────────────────────────────

    /// Fires every timer due at `now`.
    pub fn tick(&mut self, now: Instant) {
        for event in self.timers.pop_expired(now) {
            match event {
                TimerEvent::Heartbeat(id) => {
                    if self.send_heartbeat(id) {
                        self.timers.schedule(
                            now + self.config.heartbeat_interval,
                            TimerEvent::Heartbeat(id),
                        );
                    }
                }
                TimerEvent::ClipboardKeepAlive(id) => {
                    if self.clipboard_keepalive(id) {
                        self.timers.schedule(
                            now + self.config.clipboard_keepalive_interval,
                            TimerEvent::ClipboardKeepAlive(id),
                        );
                    }
                }
                TimerEvent::Reconnect { target, attempt } => {
                    if !self.is_running() {
                        continue;
                    }
                    info!(host = %target.host, attempt, "reconnecting");
                    self.events.push_back(CompatEvent::ReconnectAttempt {
                        host: target.host.clone(),
                        attempt,
                    });
                    self.dial(target, Channel::Message, true);
                }
            }
        }
        self.flush_closed(now);
    }

    fn send_heartbeat(&mut self, id: SessionId) -> bool {
        let Some(des) = self.peer_of(id).map(|p| p.id) else {
            return false;
        };
        self.send_to(id, Packet::heartbeat(true, des));
        true
    }

    /// Pings the peer's clipboard sessions, reopening the channel when we
    /// dialed the peer and it has none.
    fn clipboard_keepalive(&mut self, id: SessionId) -> bool {
        let Some(entry) = self.registry.get(id) else {
            return false;
        };
        let Some(peer) = entry.session.peer().cloned() else {
            return false;
        };
        let target = entry.origin.dial_target().cloned();

        let clipboard = self.registry.peer_sessions(Channel::Clipboard, &peer, None);
        if clipboard.is_empty() {
            if let Some(target) = target {
                self.open_clipboard_channel(target);
            }
        }
        for clip in clipboard {
            self.send_to(clip, Packet::heartbeat(false, peer.id));
        }
        true
    }

    fn open_clipboard_channel(&mut self, target: DialTarget) {
        let already_dialing = self
            .pending_dials
            .values()
            .any(|p| p.channel == Channel::Clipboard && p.target.host == target.host);
        if !already_dialing {
            self.dial(target, Channel::Clipboard, false);
        }
    }

    fn schedule_reconnect(&mut self, target: DialTarget, now: Instant) {
        match self.reconnect.on_loss(&target.host) {
            ReconnectDecision::Retry { attempt, delay } => {
                debug!(host = %target.host, attempt, ?delay, "reconnect scheduled");
                self.timers.schedule(now + delay, TimerEvent::Reconnect { target, attempt });
            }
            ReconnectDecision::GiveUp { attempts } => {
                warn!(host = %target.host, attempts, "giving up on host");
                self.events.push_back(CompatEvent::ReconnectStopped { host: target.host });
            }
        }
    }

    // ── Session lifecycle ─────────────────────────────────────────────────────

    fn on_verified(&mut self, id: SessionId, peer: PeerIdentity, now: Instant) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        let channel = entry.session.channel();
        let origin = entry.origin.clone();

        for older in self.registry.peer_sessions(channel, &peer, Some(id)) {
            info!(%older, newer = %id, peer_id = peer.id, "closing duplicate session");
            self.close_session(older, CloseReason::Superseded);
            self.emit_log(format!("replaced duplicate session to {}", peer.name));
        }

        self.send_heartbeat(id);
        self.timers
            .schedule(now + self.config.heartbeat_interval, TimerEvent::Heartbeat(id));

        if channel != Channel::Message {
            return;
        }
        self.timers.schedule(
            now + self.config.clipboard_keepalive_interval,
            TimerEvent::ClipboardKeepAlive(id),
        );
        if let Some(target) = origin.reconnect_target() {
            self.reconnect.reset(&target.host);
        }
        self.events.push_back(CompatEvent::PeerConnected {
            id: peer.id,
            name: peer.name.clone(),
        });
        if let Some(target) = origin.dial_target() {
            if self.registry.peer_sessions(Channel::Clipboard, &peer, None).is_empty() {
                self.open_clipboard_channel(target.clone());
            }
        }
    }

    /// Removes a session, cancels its timers and asks the runtime to drop the
    /// connection. Peer bookkeeping and reconnection follow from `reason`.
    fn close_session(&mut self, id: SessionId, reason: CloseReason) {
        let Some(mut entry) = self.registry.remove(id) else {
            return;
        };
        let was_verified = entry.session.is_verified();
        let peer = entry.session.peer().cloned();
        let channel = entry.session.channel();

        entry.session.close();
        self.timers.cancel_where(|t| t.session() == Some(id));
        self.actions.push_back(NetAction::Close { id });
        debug!(%id, ?channel, ?reason, "session removed");

        if channel == Channel::Message && was_verified && reason != CloseReason::Superseded {
            if let Some(peer) = peer {
                if self.registry.peer_sessions(Channel::Message, &peer, None).is_empty() {
                    info!(peer_id = peer.id, peer_name = %peer.name, ?reason, "peer disconnected");
                    for clip in self.registry.peer_sessions(Channel::Clipboard, &peer, None) {
                        self.close_session(clip, CloseReason::MessageSessionLost);
                    }
                    self.events.push_back(CompatEvent::PeerDisconnected {
                        id: peer.id,
                        name: peer.name,
                    });
                }
            }
        }

        if reason.is_transport_loss() && self.is_running() {
            if let Some(target) = entry.origin.reconnect_target() {
                self.closed_for_reconnect.push(target.clone());
            }
        }
    }

    /// Schedules redials for sessions closed since the last call.
    fn flush_closed(&mut self, now: Instant) {
        for target in std::mem::take(&mut self.closed_for_reconnect) {
            self.schedule_reconnect(target, now);
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Routes one packet from a verified session.
    fn dispatch(&mut self, id: SessionId, packet: Packet) {
        let from = packet.src();
        let kind = packet.packet_type();
        trace!(%id, ?kind, from, "dispatch");

        match kind {
            PacketType::Mouse => self.events.push_back(CompatEvent::RemoteMouse {
                from,
                data: packet.mouse(),
            }),
            PacketType::Keyboard => self.events.push_back(CompatEvent::RemoteKey {
                from,
                data: packet.keyboard(),
            }),
            PacketType::ClipboardText | PacketType::ClipboardImage => {
                let is_image = kind == PacketType::ClipboardImage;
                if let Some(entry) = self.registry.get_mut(id) {
                    let reassembler = entry.session.reassembler_mut();
                    if let Err(e) = reassembler.push_clipboard(packet.chunk(), is_image) {
                        warn!(%id, "clipboard payload dropped: {e}");
                    }
                }
            }
            PacketType::ClipboardDataEnd => self.flush_clipboard(id, from, &packet),
            PacketType::ClipboardPush if self.drag_drop_open(id) => {
                if let Some(entry) = self.registry.get_mut(id) {
                    if let Err(e) = entry.session.reassembler_mut().push_drag_drop(packet.chunk()) {
                        warn!(%id, "drag/drop payload dropped: {e}");
                    }
                }
            }
            PacketType::ClipboardDragDropEnd => {
                let declared = packet.machine_words()[0];
                let flushed = self
                    .registry
                    .get_mut(id)
                    .map(|e| e.session.reassembler_mut().finish_drag_drop(declared))
                    .unwrap_or_default();
                let paths = decode_file_drop(&flushed);
                if !paths.is_empty() {
                    self.events.push_back(CompatEvent::ClipboardFiles { from, paths });
                }
                self.events.push_back(CompatEvent::DragDropEnd { from });
            }
            PacketType::ClipboardDragDrop => {
                if let Some(entry) = self.registry.get_mut(id) {
                    entry.session.reassembler_mut().begin_drag_drop();
                }
                self.events.push_back(CompatEvent::DragDropBegin { from })
            }
            PacketType::ClipboardDragDropOperation | PacketType::ExplorerDragDrop => {
                self.events.push_back(CompatEvent::DragDropOperation { from })
            }
            PacketType::Matrix => {
                if self.matrix.apply_packet(&packet) {
                    self.events.push_back(CompatEvent::MachineMatrixUpdated {
                        matrix: self.matrix.clone(),
                    });
                }
            }
            PacketType::NextMachine | PacketType::MachineSwitched => {
                self.events.push_back(CompatEvent::MachineSwitched {
                    from,
                    to: packet.des(),
                })
            }
            PacketType::HideMouse => self.events.push_back(CompatEvent::HideMouse { from }),
            PacketType::CaptureScreenCommand => {
                self.events.push_back(CompatEvent::CaptureScreenRequested { from })
            }
            PacketType::ByeBye => {
                info!(%id, from, "peer said goodbye");
                self.emit_log(format!("machine {from} said goodbye"));
                self.close_session(id, CloseReason::ByeBye);
            }
            PacketType::Hi
            | PacketType::Hello
            | PacketType::Awake
            | PacketType::Heartbeat
            | PacketType::HeartbeatEx
            | PacketType::HeartbeatExL2
            | PacketType::HeartbeatExL3
            | PacketType::Clipboard
            | PacketType::ClipboardAsk
            | PacketType::ClipboardPush
            | PacketType::ClipboardCapture => {
                if let (Some(name), Some(entry)) = (packet.machine_name(), self.registry.get_mut(id)) {
                    if entry.session.refresh_peer_name(&name) {
                        debug!(%id, %name, "peer renamed");
                    }
                }
            }
            PacketType::Handshake
            | PacketType::HandshakeAck
            | PacketType::Error
            | PacketType::Invalid => trace!(%id, ?kind, "ignored"),
        }
    }

    fn drag_drop_open(&self, id: SessionId) -> bool {
        self.registry
            .get(id)
            .is_some_and(|e| e.session.reassembler().is_drag_drop_open())
    }

    fn flush_clipboard(&mut self, id: SessionId, from: MachineId, packet: &Packet) {
        let declared = packet.machine_words()[0];
        let Some(payload) = self
            .registry
            .get_mut(id)
            .map(|e| e.session.reassembler_mut().finish_clipboard(declared))
        else {
            return;
        };

        if payload.is_image {
            self.events.push_back(CompatEvent::ClipboardImage {
                from,
                bytes: payload.bytes,
            });
            return;
        }
        match decode_clipboard_text(&payload.bytes) {
            Ok(text) => self.events.push_back(CompatEvent::ClipboardText { from, text }),
            Err(e) => warn!(%id, "clipboard text dropped: {e}"),
        }
    }

    fn emit_log(&mut self, message: String) {
        self.events.push_back(CompatEvent::Log { message });
    }

    fn emit_error(&mut self, message: String) {
        self.events.push_back(CompatEvent::Error { message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CompatService {
        CompatService::new(ServiceConfig::new(LocalMachine::new(4242, "bridge")))
    }

    #[test]
    fn test_service_config_defaults() {
        let cfg = ServiceConfig::new(LocalMachine::new(1, "m"));
        assert_eq!(cfg.ports, PortPair { message: 15101, clipboard: 15100 });
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.clipboard_keepalive_interval, Duration::from_secs(10));
        assert_eq!(cfg.reconnect_max_attempts, 3);
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_only_transport_losses_are_reconnectable() {
        assert!(CloseReason::PeerClosed.is_transport_loss());
        assert!(CloseReason::Transport("reset".into()).is_transport_loss());
        assert!(CloseReason::ConnectFailed("refused".into()).is_transport_loss());
        assert!(!CloseReason::ByeBye.is_transport_loss());
        assert!(!CloseReason::Superseded.is_transport_loss());
        assert!(!CloseReason::Stopped.is_transport_loss());
    }

    #[test]
    fn test_new_service_is_idle() {
        let mut svc = service();
        assert!(!svc.is_running());
        assert_eq!(svc.next_deadline(), None);
        assert_eq!(svc.poll_action(), None);
        assert_eq!(svc.poll_event(), None);
    }

    #[test]
    fn test_connect_while_stopped_is_refused() {
        let mut svc = service();
        let ports = PortPair { message: 1, clipboard: 2 };

        assert_eq!(svc.connect_to_host("10.0.0.1", ports), Err(ServiceError::NotRunning));
        assert!(matches!(svc.poll_event(), Some(CompatEvent::Error { .. })));
        assert_eq!(svc.poll_action(), None);
    }

    #[test]
    fn test_accept_while_stopped_is_rejected() {
        let mut svc = service();
        let remote = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(svc.on_accepted(Channel::Message, remote), None);
    }

    #[test]
    fn test_update_ports_while_stopped_only_stores_them() {
        let mut svc = service();
        let ports = PortPair { message: 2000, clipboard: 2001 };
        svc.update_ports(ports);
        assert_eq!(svc.config().ports, ports);
        assert_eq!(svc.poll_action(), None);
    }

    #[test]
    fn test_next_machine_sets_and_clears_active_machine() {
        let mut svc = service();
        svc.send_next_machine(7);
        assert_eq!(svc.active_machine(), Some(7));
        svc.send_next_machine(ID_NONE);
        assert_eq!(svc.active_machine(), None);
    }
}
