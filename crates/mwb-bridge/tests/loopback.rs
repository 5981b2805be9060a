//! End-to-end test over real TCP sockets on the loopback interface.
//!
//! Two bridges run their own `BridgeRuntime`. One dials the other, both sides
//! verify, and input plus clipboard text travel across.

use std::time::Duration;

use mwb_bridge::application::{Command, CompatEvent, CompatService, PortPair, ServiceConfig};
use mwb_bridge::infrastructure::network::runtime::BridgeRuntime;
use mwb_bridge::infrastructure::network::BridgeHandle;
use mwb_core::protocol::MouseData;
use mwb_core::LocalMachine;
use tokio::time::timeout;

const PASSPHRASE: &str = "loopback passphrase 0123";
const WAIT: Duration = Duration::from_secs(20);

fn spawn_bridge(id: u32, name: &str) -> BridgeHandle {
    let mut config = ServiceConfig::new(LocalMachine::new(id, name));
    config.bind_address = "127.0.0.1".to_string();
    config.ports = PortPair {
        message: 0,
        clipboard: 0,
    };
    let (runtime, handle) = BridgeRuntime::new(CompatService::new(config), Duration::from_secs(2));
    tokio::spawn(runtime.run());
    handle
}

/// Waits for the first event matching `f`, discarding the rest.
async fn wait_for<T>(
    handle: &mut BridgeHandle,
    mut f: impl FnMut(CompatEvent) -> Option<T>,
) -> T {
    timeout(WAIT, async {
        loop {
            let event = handle.events.recv().await.expect("runtime alive");
            if let Some(found) = f(event) {
                return found;
            }
        }
    })
    .await
    .expect("event arrived in time")
}

async fn start(handle: &mut BridgeHandle) -> PortPair {
    handle
        .commands
        .send(Command::Start {
            passphrase: PASSPHRASE.to_string(),
        })
        .await
        .expect("send start");
    wait_for(handle, |e| match e {
        CompatEvent::Listening { message, clipboard } => Some(PortPair {
            message: message.port(),
            clipboard: clipboard.port(),
        }),
        _ => None,
    })
    .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_bridges_connect_and_exchange_input_and_clipboard() {
    // Arrange
    let mut desk = spawn_bridge(1001, "desk");
    let mut laptop = spawn_bridge(1002, "laptop");
    let _desk_ports = start(&mut desk).await;
    let laptop_ports = start(&mut laptop).await;

    // Act: desk dials laptop.
    desk.commands
        .send(Command::ConnectToHost {
            ip: "127.0.0.1".to_string(),
            ports: laptop_ports,
        })
        .await
        .expect("send connect");

    // Assert: both sides see each other.
    let seen_by_desk = wait_for(&mut desk, |e| match e {
        CompatEvent::PeerConnected { id, name } => Some((id, name)),
        _ => None,
    })
    .await;
    let seen_by_laptop = wait_for(&mut laptop, |e| match e {
        CompatEvent::PeerConnected { id, name } => Some((id, name)),
        _ => None,
    })
    .await;
    assert_eq!(seen_by_desk, (1002, "laptop".to_string()));
    assert_eq!(seen_by_laptop, (1001, "desk".to_string()));

    // Mouse input from desk reaches laptop.
    let mouse = MouseData {
        x: 640,
        y: 480,
        wheel_delta: 0,
        flags: 0x0200,
    };
    desk.commands
        .send(Command::SendMouseEvent(mouse))
        .await
        .expect("send mouse");
    let (from, data) = wait_for(&mut laptop, |e| match e {
        CompatEvent::RemoteMouse { from, data } => Some((from, data)),
        _ => None,
    })
    .await;
    assert_eq!(from, 1001);
    assert_eq!(data, mouse);

    // Clipboard text from laptop reaches desk. The clipboard channel may
    // still be handshaking, in which case the text rides the message channel.
    let text = "clipboard over loopback ✓".to_string();
    laptop
        .commands
        .send(Command::SendClipboardText { text: text.clone() })
        .await
        .expect("send clipboard");
    let received = wait_for(&mut desk, |e| match e {
        CompatEvent::ClipboardText { text, .. } => Some(text),
        _ => None,
    })
    .await;
    assert_eq!(received, text);

    // Stopping desk tells laptop.
    desk.commands.send(Command::Stop).await.expect("send stop");
    let gone = wait_for(&mut laptop, |e| match e {
        CompatEvent::PeerDisconnected { id, .. } => Some(id),
        _ => None,
    })
    .await;
    assert_eq!(gone, 1001);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_clipboard_image_arrives_intact() {
    // Arrange
    let mut desk = spawn_bridge(3001, "desk");
    let mut laptop = spawn_bridge(3002, "laptop");
    start(&mut desk).await;
    let laptop_ports = start(&mut laptop).await;
    desk.commands
        .send(Command::ConnectToHost {
            ip: "127.0.0.1".to_string(),
            ports: laptop_ports,
        })
        .await
        .expect("send connect");
    wait_for(&mut laptop, |e| match e {
        CompatEvent::PeerConnected { id, .. } => Some(id),
        _ => None,
    })
    .await;
    // Several thousand chunks, far more than a socket buffer holds at once.
    let image: Vec<u8> = (0..256 * 1024u32).map(|i| (i * 7 % 253) as u8).collect();

    // Act
    laptop
        .commands
        .send(Command::SendClipboardImage {
            bytes: image.clone(),
        })
        .await
        .expect("send image");

    // Assert
    let (from, received) = wait_for(&mut desk, |e| match e {
        CompatEvent::ClipboardImage { from, bytes } => Some((from, bytes)),
        _ => None,
    })
    .await;
    assert_eq!(from, 3002);
    assert_eq!(received.len(), image.len());
    assert!(received == image, "image bytes differ");
}

#[tokio::test]
async fn test_dial_to_closed_port_reports_connect_failure() {
    // Arrange
    let mut bridge = spawn_bridge(2001, "lonely");
    start(&mut bridge).await;
    let unused = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("pick unused port")
        .port();

    // Act
    bridge
        .commands
        .send(Command::ConnectToHost {
            ip: "127.0.0.1".to_string(),
            ports: PortPair {
                message: unused,
                clipboard: unused,
            },
        })
        .await
        .expect("send connect");

    // Assert: the failure is logged straight away.
    let message = wait_for(&mut bridge, |e| match e {
        CompatEvent::Log { message } => Some(message),
        _ => None,
    })
    .await;
    assert!(message.contains("127.0.0.1"));
}
