//! Core functionality for gattscope
//! This module contains the session engine used to talk to BLE peripherals

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{EventBus, SessionHandle};
