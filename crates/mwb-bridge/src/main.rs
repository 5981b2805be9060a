//! MWB-compat bridge entry point.
//!
//! Loads the configuration, starts the event loop and dials configured peers.
//! Remote input and clipboard events are logged; a real collaborator would
//! inject them into the local desktop.
//!
//! ```text
//! main()
//!  ├─ load_config()            -- $MWB_COMPAT_CONFIG or platform path
//!  ├─ BridgeRuntime::run()     -- owns CompatService and every socket
//!  ├─ event pump               -- logs CompatEvents
//!  └─ ctrl_c                   -- Stop, drop the handle, join
//! ```

use std::path::PathBuf;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mwb_bridge::application::{Command, CompatEvent, CompatService};
use mwb_bridge::infrastructure::network::runtime::BridgeRuntime;
use mwb_bridge::infrastructure::storage::config::{
    load_config, passphrase_from_env, CONFIG_PATH_ENV,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = load_config(config_path.as_deref()).context("loading configuration")?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.log_level)),
        )
        .init();

    let passphrase = passphrase_from_env()?;
    let service = CompatService::new(config.service_config());
    info!(
        machine_id = service.local().id(),
        machine_name = service.local().name(),
        "MWB-compat bridge starting"
    );

    let (runtime, handle) = BridgeRuntime::new(service, config.connect_timeout());
    let runtime_task = tokio::spawn(runtime.run());

    handle
        .commands
        .send(Command::Start { passphrase })
        .await
        .context("runtime exited before start")?;
    for peer in &config.peers {
        handle
            .commands
            .send(Command::ConnectToHost {
                ip: peer.host.clone(),
                ports: peer.ports(),
            })
            .await
            .context("runtime exited before dialing peers")?;
    }

    let mut events = handle.events;
    let event_pump = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    if handle.commands.send(Command::Stop).await.is_err() {
        warn!("runtime already stopped");
    }
    drop(handle.commands);
    if let Err(e) = runtime_task.await {
        error!("runtime task failed: {e}");
    }
    event_pump.abort();

    info!("MWB-compat bridge stopped");
    Ok(())
}

fn log_event(event: &CompatEvent) {
    match event {
        CompatEvent::PeerConnected { id, name } => info!(peer_id = id, %name, "peer connected"),
        CompatEvent::PeerDisconnected { id, name } => {
            info!(peer_id = id, %name, "peer disconnected")
        }
        CompatEvent::ClipboardText { from, text } => {
            info!(from, chars = text.chars().count(), "clipboard text received")
        }
        CompatEvent::ClipboardImage { from, bytes } => {
            info!(from, bytes = bytes.len(), "clipboard image received")
        }
        CompatEvent::ClipboardFiles { from, paths } => info!(from, ?paths, "files dropped"),
        CompatEvent::MachineMatrixUpdated { matrix } => {
            info!(names = ?matrix.names(), "machine matrix updated")
        }
        CompatEvent::ReconnectStopped { host } => warn!(%host, "gave up reconnecting"),
        CompatEvent::Error { message } => error!("{message}"),
        CompatEvent::Log { message } => info!("{message}"),
        other => tracing::debug!(?other, "event"),
    }
}
