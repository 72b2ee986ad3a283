//! Application state management
//! This module wires the adapter, scanner, session task and event stream
//! together and holds the handles the command layer talks to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Result, anyhow};
use bluest::Adapter;
use log::info;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::core::bluetooth::{BluestTransport, DeviceScanner, EventBus, Session, SessionHandle};

/// Global application state
pub struct AppState {
    /// Handle to the session task owning the connection
    pub session: SessionHandle,
    /// The device scanner instance
    pub scanner: Mutex<DeviceScanner>,
    /// The event stream shared with the session
    pub events: EventBus,
}

impl AppState {
    /// Creates a new AppState instance
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");

        let devices = Arc::new(StdMutex::new(HashMap::new()));
        let events = EventBus::new(config.event_capacity);
        let scanner = DeviceScanner::new(adapter.clone(), devices.clone(), config.scan.clone());
        let transport = BluestTransport::new(adapter, devices);
        let session = Session::spawn(Box::new(transport), events.clone());

        Ok(Self {
            session,
            scanner: Mutex::new(scanner),
            events,
        })
    }
}
