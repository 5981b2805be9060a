//! BridgeRuntime: the tokio event loop that owns the compatibility service.
//!
//! One task owns the [`CompatService`] and every connection handle. It waits
//! on three sources at once: collaborator commands, socket notifications from
//! the I/O tasks, and the service's next timer deadline. After each wake-up it
//! performs the queued [`NetAction`]s and forwards queued [`CompatEvent`]s.
//!
//! ```text
//!  BridgeHandle.commands ──▶ ┌──────────────┐ ──▶ BridgeHandle.events
//!  listener / conn tasks ──▶ │ CompatService│ ──▶ spawn_connection / dial
//!  sleep_until(deadline) ──▶ └──────────────┘
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{spawn_connection, ConnectionHandle};
use super::listener::{bind_listeners, ListenerPair};
use super::{NetEvent, NetworkError};
use crate::application::{Command, CompatEvent, CompatService, NetAction, SessionId};

/// Default limit on an outbound TCP connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const COMMAND_QUEUE_DEPTH: usize = 256;
const NET_QUEUE_DEPTH: usize = 1024;

/// The collaborator's side of a running bridge.
///
/// Dropping `commands` stops the runtime gracefully.
#[derive(Debug)]
pub struct BridgeHandle {
    pub commands: mpsc::Sender<Command>,
    pub events: mpsc::UnboundedReceiver<CompatEvent>,
}

pub struct BridgeRuntime {
    service: CompatService,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<CompatEvent>,
    net_tx: mpsc::Sender<NetEvent>,
    net_rx: mpsc::Receiver<NetEvent>,
    connections: HashMap<SessionId, ConnectionHandle>,
    listeners: Option<ListenerPair>,
    connect_timeout: Duration,
}

impl BridgeRuntime {
    pub fn new(service: CompatService, connect_timeout: Duration) -> (Self, BridgeHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::channel(NET_QUEUE_DEPTH);

        let runtime = Self {
            service,
            commands: command_rx,
            events: event_tx,
            net_tx,
            net_rx,
            connections: HashMap::new(),
            listeners: None,
            connect_timeout,
        };
        let handle = BridgeHandle {
            commands: command_tx,
            events: event_rx,
        };
        (runtime, handle)
    }

    /// Runs until every [`BridgeHandle::commands`] sender is dropped, then
    /// stops the service and releases every socket.
    pub async fn run(mut self) {
        info!("bridge runtime started");
        loop {
            let deadline = self.service.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        debug!(?command, "command");
                        self.service.handle_command(command, Instant::now());
                    }
                    None => break,
                },
                Some(event) = self.net_rx.recv() => self.on_net_event(event),
                () = wait_until(deadline) => self.service.tick(Instant::now()),
            }
            self.flush().await;
        }

        self.service.stop();
        self.flush().await;
        if let Some(listeners) = self.listeners.take() {
            listeners.shutdown();
        }
        for (_, connection) in self.connections.drain() {
            connection.close();
        }
        info!("bridge runtime stopped");
    }

    fn on_net_event(&mut self, event: NetEvent) {
        let now = Instant::now();
        match event {
            NetEvent::Accepted {
                channel,
                stream,
                remote,
            } => match self.service.on_accepted(channel, remote) {
                Some(id) => self.attach(id, stream),
                None => debug!(%remote, "service stopped, dropping connection"),
            },
            NetEvent::Connected { id, stream } => {
                self.attach(id, stream);
                self.service.on_connected(id);
            }
            NetEvent::ConnectFailed { id, error } => {
                self.service.on_connect_failed(id, &error, now);
            }
            NetEvent::Data { id, bytes } => self.service.on_data(id, &bytes, now),
            NetEvent::Closed { id, error } => {
                if let Some(connection) = self.connections.remove(&id) {
                    connection.close();
                }
                self.service.on_closed(id, error, now);
            }
        }
    }

    fn attach(&mut self, id: SessionId, stream: TcpStream) {
        let connection = spawn_connection(id, stream, self.net_tx.clone());
        self.connections.insert(id, connection);
    }

    /// Performs queued actions, then forwards queued events.
    async fn flush(&mut self) {
        while let Some(action) = self.service.poll_action() {
            self.perform(action).await;
        }
        while let Some(event) = self.service.poll_event() {
            // A collaborator that dropped its receiver no longer wants events.
            let _ = self.events.send(event);
        }
    }

    async fn perform(&mut self, action: NetAction) {
        match action {
            NetAction::Listen {
                bind_address,
                ports,
            } => {
                if let Some(previous) = self.listeners.take() {
                    previous.shutdown();
                }
                match bind_listeners(&bind_address, ports, self.net_tx.clone()).await {
                    Ok(pair) => {
                        self.service
                            .on_listening(pair.message_addr, pair.clipboard_addr);
                        self.listeners = Some(pair);
                    }
                    Err(e) => self.service.on_listen_failed(&e.to_string()),
                }
            }
            NetAction::StopListening => {
                if let Some(listeners) = self.listeners.take() {
                    listeners.shutdown();
                }
            }
            NetAction::Dial {
                id,
                host,
                port,
                channel,
            } => {
                debug!(%id, %host, port, ?channel, "dial");
                let events = self.net_tx.clone();
                let limit = self.connect_timeout;
                tokio::spawn(async move {
                    let event = match dial(&host, port, limit).await {
                        Ok(stream) => NetEvent::Connected { id, stream },
                        Err(e) => NetEvent::ConnectFailed {
                            id,
                            error: e.to_string(),
                        },
                    };
                    let _ = events.send(event).await;
                });
            }
            NetAction::Send { id, bytes } => {
                let delivered = self
                    .connections
                    .get(&id)
                    .is_some_and(|connection| connection.send(bytes));
                if !delivered {
                    debug!(%id, "send to unknown or closed connection dropped");
                }
            }
            NetAction::Close { id } => {
                if let Some(connection) = self.connections.remove(&id) {
                    connection.close();
                }
            }
        }
    }
}

async fn dial(host: &str, port: u16, limit: Duration) -> Result<TcpStream, NetworkError> {
    let addr = format!("{host}:{port}");
    match tokio::time::timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed: {e}");
            }
            Ok(stream)
        }
        Ok(Err(e)) => {
            warn!(%addr, "connect failed: {e}");
            Err(NetworkError::ConnectFailed {
                addr,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            warn!(%addr, ?limit, "connect timed out");
            Err(NetworkError::ConnectFailed {
                addr,
                reason: format!("timed out after {limit:?}"),
            })
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{PortPair, ServiceConfig};
    use mwb_core::LocalMachine;

    fn runtime() -> (BridgeRuntime, BridgeHandle) {
        let mut config = ServiceConfig::new(LocalMachine::new(9, "unit"));
        config.bind_address = "127.0.0.1".to_string();
        config.ports = PortPair {
            message: 0,
            clipboard: 0,
        };
        BridgeRuntime::new(CompatService::new(config), DEFAULT_CONNECT_TIMEOUT)
    }

    #[test]
    fn test_short_passphrase_surfaces_error_and_runtime_exits_on_drop() {
        tokio_test::block_on(async {
            // Arrange
            let (runtime, mut handle) = runtime();
            let task = tokio::spawn(runtime.run());

            // Act
            handle
                .commands
                .send(Command::Start {
                    passphrase: "short".to_string(),
                })
                .await
                .expect("send");
            let event = handle.events.recv().await;
            drop(handle.commands);

            // Assert
            assert!(matches!(event, Some(CompatEvent::Error { .. })));
            task.await.expect("runtime task joins");
        });
    }

    #[test]
    fn test_start_binds_ephemeral_listeners() {
        tokio_test::block_on(async {
            let (runtime, mut handle) = runtime();
            let task = tokio::spawn(runtime.run());

            handle
                .commands
                .send(Command::Start {
                    passphrase: "0123456789abcdef".to_string(),
                })
                .await
                .expect("send");
            let event = handle.events.recv().await;
            drop(handle.commands);

            match event {
                Some(CompatEvent::Listening { message, clipboard }) => {
                    assert_ne!(message.port(), 0);
                    assert_ne!(clipboard.port(), 0);
                }
                other => panic!("expected Listening, got {other:?}"),
            }
            task.await.expect("runtime task joins");
        });
    }
}
