//! Command handlers
//! This module implements the operations the command line exposes on top of the supervisor.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use log::info;

use crate::config::AppConfig;
use crate::core::bluetooth::DeviceHandle;
use crate::core::supervisor::{Lifecycle, LifecycleSnapshot};
use crate::state::AppState;

/// Scans for controllers, printing each one as it is found.
pub async fn scan_devices(app_state: &AppState, duration: Duration) -> Result<Vec<DeviceHandle>> {
    let mut devices = app_state.supervisor.request_scan(duration).await?;
    let mut found = Vec::new();

    while let Some(device) = devices.recv().await {
        println!("{}\t{}", device.id, device.name);
        found.push(device);
    }

    info!("Scan finished, {} controller(s) found", found.len());
    Ok(found)
}

/// Connects to a device found by a previous scan.
pub async fn connect_to_device(app_state: &AppState, device: DeviceHandle) -> Result<()> {
    app_state.supervisor.request_connect(device).await?;
    Ok(())
}

/// Disconnects from the currently connected device
pub async fn disconnect(app_state: &AppState) -> Result<()> {
    app_state.supervisor.request_disconnect().await?;
    Ok(())
}

/// Scans for a controller (the one with `device_id`, or the first one found), connects
/// and streams until Ctrl-C or until the session ends.
pub async fn run_bridge(
    app_state: &AppState,
    device_id: Option<&str>,
    scan_duration: Duration,
) -> Result<()> {
    let device = find_device(app_state, device_id, scan_duration).await?;
    println!("Connecting to {}", device);

    let mut updates = app_state.supervisor.subscribe();
    connect_to_device(app_state, device).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_printed = None;
    let mut streamed = false;
    let outcome = loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                info!("Interrupted, disconnecting...");
                break disconnect(app_state).await;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break Err(anyhow!("Supervisor stopped unexpectedly"));
                }
                let snapshot = updates.borrow_and_update().clone();
                if last_printed != Some(snapshot.lifecycle) {
                    print_lifecycle(&snapshot);
                    last_printed = Some(snapshot.lifecycle);
                }

                match snapshot.lifecycle {
                    Lifecycle::Streaming => streamed = true,
                    Lifecycle::Failed | Lifecycle::Idle => {
                        if let Some(reason) = snapshot.last_error {
                            break Err(anyhow!("Session failed: {}", reason));
                        }
                        if streamed {
                            println!("Controller disconnected");
                            break Ok(());
                        }
                    }
                    _ => {}
                }
            }
        }
    };

    app_state.supervisor.shutdown().await?;
    outcome
}

async fn find_device(
    app_state: &AppState,
    device_id: Option<&str>,
    duration: Duration,
) -> Result<DeviceHandle> {
    let mut devices = app_state.supervisor.request_scan(duration).await?;

    while let Some(device) = devices.recv().await {
        let wanted = match device_id {
            None => true,
            Some(id) => {
                device.id == id
                    || device
                        .mac_address()
                        .is_some_and(|mac| mac.eq_ignore_ascii_case(id))
            }
        };
        if wanted {
            return Ok(device);
        }
        info!("Skipping {}", device);
    }

    match device_id {
        Some(id) => bail!("Controller {} not found within {:?}", id, duration),
        None => bail!("No controller found within {:?}", duration),
    }
}

fn print_lifecycle(snapshot: &LifecycleSnapshot) {
    match (&snapshot.device, snapshot.battery_mv) {
        (Some(device), Some(mv)) => {
            println!("{:?}: {} (battery {} mV)", snapshot.lifecycle, device, mv)
        }
        (Some(device), None) => println!("{:?}: {}", snapshot.lifecycle, device),
        (None, _) => println!("{:?}", snapshot.lifecycle),
    }
}

/// Pretty JSON of the effective configuration, headed by the file it comes from.
pub fn show_config(config: &AppConfig, path: &Path) -> Result<String> {
    let json = serde_json::to_string_pretty(config)?;
    Ok(format!("# {}\n{}", path.display(), json))
}
