//! Transport abstraction over the platform BLE stack.
//! The session drives a connected peripheral through these traits; the
//! bluest-backed implementation lives in `connection`, and tests script
//! a mock against the same seam.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::types::{CharacteristicId, DeviceInfo, ServiceInfo};

/// Write mode for a characteristic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Unsolicited link-level news from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peripheral dropped the connection (or went out of range).
    Lost,
}

/// One inbound notification payload, or the stream error that ended the
/// subscription.
pub type NotifyPayload = Result<Vec<u8>, TransportError>;

/// Connects to peripherals.
#[async_trait]
pub trait Transport: Send {
    /// Establishes a connection to `device`, returning the live link and
    /// the channel on which link events arrive.
    async fn connect(
        &mut self,
        device: &DeviceInfo,
    ) -> Result<(Box<dyn Link>, mpsc::Receiver<LinkEvent>), TransportError>;
}

/// An established connection to one peripheral.
///
/// All GATT traffic flows through a link owned by the session task, so
/// operations on it are naturally one at a time.
#[async_trait]
pub trait Link: Send {
    /// Walks the device's GATT tree.
    async fn discover_services(&mut self) -> Result<Vec<ServiceInfo>, TransportError>;

    async fn read(&mut self, id: &CharacteristicId) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &mut self,
        id: &CharacteristicId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    /// Starts notifications on `id` and returns its dedicated inbound
    /// queue. Values are never delivered any other way.
    async fn subscribe(
        &mut self,
        id: &CharacteristicId,
    ) -> Result<mpsc::Receiver<NotifyPayload>, TransportError>;

    async fn unsubscribe(&mut self, id: &CharacteristicId) -> Result<(), TransportError>;

    /// Tears the connection down at the adapter.
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
