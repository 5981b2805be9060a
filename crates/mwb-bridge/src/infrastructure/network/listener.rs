//! TCP listeners for the message and clipboard channels.

use std::net::SocketAddr;

use mwb_core::Channel;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{NetEvent, NetworkError};
use crate::application::PortPair;

/// Both accept loops. Dropping the pair does not stop them; call [`ListenerPair::shutdown`].
#[derive(Debug)]
pub struct ListenerPair {
    pub message_addr: SocketAddr,
    pub clipboard_addr: SocketAddr,
    tasks: [JoinHandle<()>; 2],
}

impl ListenerPair {
    /// Aborts both accept loops.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        info!(message = %self.message_addr, clipboard = %self.clipboard_addr, "listeners stopped");
    }
}

/// Binds both ports on `bind_address` and spawns their accept loops.
///
/// Port 0 picks an ephemeral port; the bound addresses are returned.
///
/// # Errors
///
/// Returns [`NetworkError::BindFailed`] if either port cannot be bound. Nothing
/// is left listening in that case.
pub async fn bind_listeners(
    bind_address: &str,
    ports: PortPair,
    events: mpsc::Sender<NetEvent>,
) -> Result<ListenerPair, NetworkError> {
    let message = bind(bind_address, ports.message).await?;
    let clipboard = bind(bind_address, ports.clipboard).await?;

    let message_addr = message.local_addr()?;
    let clipboard_addr = clipboard.local_addr()?;

    let tasks = [
        tokio::spawn(accept_loop(message, Channel::Message, events.clone())),
        tokio::spawn(accept_loop(clipboard, Channel::Clipboard, events)),
    ];

    info!(message = %message_addr, clipboard = %clipboard_addr, "listeners bound");
    Ok(ListenerPair {
        message_addr,
        clipboard_addr,
        tasks,
    })
}

async fn bind(bind_address: &str, port: u16) -> Result<TcpListener, NetworkError> {
    let addr = format!("{bind_address}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|source| NetworkError::BindFailed { addr, source })
}

async fn accept_loop(listener: TcpListener, channel: Channel, events: mpsc::Sender<NetEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(%remote, ?channel, "incoming connection");
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed: {e}");
                }
                let event = NetEvent::Accepted {
                    channel,
                    stream,
                    remote,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(?channel, "accept error: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
