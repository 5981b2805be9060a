//! The collaborator-facing vocabulary: commands in, events out.
//!
//! A collaborator (UI, input hooks, clipboard monitor) never touches a
//! session directly. It sends [`Command`]s to the runtime and receives
//! [`CompatEvent`]s back, both over `tokio::sync::mpsc` channels.

use std::net::SocketAddr;

use mwb_core::protocol::{KeyboardData, MouseData};
use mwb_core::{MachineId, MachineMatrix};

use super::session_registry::PortPair;

/// Requests accepted by the compatibility service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Derive the key from `passphrase` and start listening.
    Start { passphrase: String },
    /// Close every session and stop listening.
    Stop,
    /// Restart with a new passphrase.
    UpdatePassphrase { passphrase: String },
    /// Change the listening ports; takes effect immediately when running.
    UpdatePorts { ports: PortPair },
    /// Dial a peer's message port; the clipboard port follows after the handshake.
    ConnectToHost { ip: String, ports: PortPair },
    /// Publish the machine matrix to every connected peer.
    SendMachineMatrix {
        names: Vec<String>,
        two_row: bool,
        swap: bool,
    },
    /// Hand input control to `target`.
    SendNextMachine { target: MachineId },
    SendMouseEvent(MouseData),
    SendKeyEvent(KeyboardData),
    SendHideMouse,
    SendFileDrop { paths: Vec<String> },
    SendClipboardText { text: String },
    SendClipboardImage { bytes: Vec<u8> },
}

/// Notifications emitted by the compatibility service.
///
/// `from` is the sending machine's id as carried in the packet's `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompatEvent {
    PeerConnected { id: MachineId, name: String },
    PeerDisconnected { id: MachineId, name: String },
    RemoteMouse { from: MachineId, data: MouseData },
    RemoteKey { from: MachineId, data: KeyboardData },
    MachineSwitched { from: MachineId, to: MachineId },
    MachineMatrixUpdated { matrix: MachineMatrix },
    ClipboardText { from: MachineId, text: String },
    ClipboardImage { from: MachineId, bytes: Vec<u8> },
    ClipboardFiles { from: MachineId, paths: Vec<String> },
    HideMouse { from: MachineId },
    DragDropBegin { from: MachineId },
    DragDropOperation { from: MachineId },
    DragDropEnd { from: MachineId },
    CaptureScreenRequested { from: MachineId },
    ReconnectAttempt { host: String, attempt: u32 },
    ReconnectStopped { host: String },
    /// Both listeners are bound.
    Listening {
        message: SocketAddr,
        clipboard: SocketAddr,
    },
    Log { message: String },
    Error { message: String },
}
