//! gattscope library
//! Interactive BLE GATT debugging: device discovery, a single-connection
//! session state machine, and a timestamped event stream.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod state;
pub mod utils;

// Initialize logging
pub fn setup_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("Logging initialized");
}
