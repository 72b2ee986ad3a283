//! Bluetooth functionality for gattscope
//! This module handles all bluetooth operations including scanning,
//! connecting, exploring GATT services and routing notifications.

mod connection;
mod constants;
mod error;
mod events;
mod notification;
mod registry;
mod scanner;
mod session;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use connection::{BluestTransport, DiscoveredDevice, SharedDeviceMap};
pub use constants::*; // Re-export all constants
pub use error::{CommandError, TransportError};
pub use events::{Event, EventBus, EventKind};
pub use notification::NotificationRouter;
pub use registry::ServiceRegistry;
pub use scanner::{DeviceScanner, ScanFilter};
pub use session::{Session, SessionHandle, SessionState, SessionStatus};
pub use transport::{Link, LinkEvent, NotifyPayload, Transport, WriteMode};
pub use types::{
    CharProps, CharacteristicId, CharacteristicInfo, DeviceInfo, PayloadEncoding, ServiceInfo,
};
