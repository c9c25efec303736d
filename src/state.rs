//! Application state management
//! Loads the configuration and starts the session supervisor on the real adapter.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::config::AppConfig;
use crate::core::bluetooth::BluestTransport;
use crate::core::supervisor::{SessionSupervisor, SupervisorHandle};
use crate::output::{LogSink, SharedSink, shared};

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    pub config_path: PathBuf,
    pub supervisor: SupervisorHandle,
}

impl AppState {
    /// Creates the state. `dry_run` swaps the virtual gamepad for a logging sink.
    pub async fn new(config_path: Option<PathBuf>, dry_run: bool) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => AppConfig::default_path()?,
        };
        let config = AppConfig::load_config(&config_path).await?;

        info!("Initializing Bluetooth transport...");
        let transport = BluestTransport::new()
            .await
            .context("Failed to initialize the Bluetooth adapter")?;

        let sink = output_sink(&config, dry_run);
        let supervisor = SessionSupervisor::spawn(Arc::new(transport), sink, config.clone());

        Ok(Self {
            config,
            config_path,
            supervisor,
        })
    }
}

#[cfg(target_os = "linux")]
fn output_sink(config: &AppConfig, dry_run: bool) -> SharedSink {
    if dry_run {
        return shared(LogSink::new());
    }
    shared(crate::output::uinput::UinputSink::new(
        config.virtual_device.clone(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn output_sink(_config: &AppConfig, dry_run: bool) -> SharedSink {
    if !dry_run {
        log::warn!("No virtual gamepad backend on this platform, frames will only be logged");
    }
    shared(LogSink::new())
}
