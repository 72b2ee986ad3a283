//! Notification routing for subscribed characteristics
//! This module tracks which characteristics have live subscriptions and
//! pumps their inbound queues onto the event stream.

use std::collections::HashMap;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::bluetooth::error::CommandError;
use crate::core::bluetooth::events::{EventBus, EventKind};
use crate::core::bluetooth::transport::{Link, NotifyPayload};
use crate::core::bluetooth::types::{CharacteristicId, CharacteristicInfo};

/// Tracks active subscriptions and their pump tasks.
///
/// Notification values only ever arrive through the per-characteristic
/// queues handed out by the link; each queue gets one pump task that
/// forwards onto the event bus. Nothing here re-enters the session.
#[derive(Default)]
pub struct NotificationRouter {
    pumps: HashMap<CharacteristicId, JoinHandle<()>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self, id: &CharacteristicId) -> bool {
        self.pumps.contains_key(id)
    }

    /// Sorted list of currently subscribed characteristics.
    pub fn subscribed(&self) -> Vec<CharacteristicId> {
        let mut ids: Vec<CharacteristicId> = self.pumps.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Starts notifications for `info` on the given link.
    ///
    /// Subscribing twice is a no-op. A characteristic without notify or
    /// indicate support is rejected before the adapter is touched.
    pub async fn subscribe(
        &mut self,
        link: &mut dyn Link,
        info: &CharacteristicInfo,
        bus: &EventBus,
    ) -> Result<(), CommandError> {
        if self.is_subscribed(&info.id) {
            debug!("Already subscribed to {}, nothing to do", info.id);
            return Ok(());
        }
        if !info.properties.supports_notify() {
            return Err(CommandError::Capability("notify"));
        }

        let queue = link.subscribe(&info.id).await?;
        info!("Subscribed to notifications on {}", info.id);
        let pump = tokio::spawn(Self::pump(info.id, queue, bus.clone()));
        self.pumps.insert(info.id, pump);
        bus.emit(EventKind::NotifyStarted {
            characteristic: info.id,
        });
        Ok(())
    }

    /// Stops notifications for `id`.
    ///
    /// Unsubscribing something that was never subscribed is a no-op. An
    /// adapter refusal is logged but local tracking is dropped anyway, so
    /// the device can never pin a subscription open.
    pub async fn unsubscribe(
        &mut self,
        link: &mut dyn Link,
        id: &CharacteristicId,
        bus: &EventBus,
    ) -> Result<(), CommandError> {
        let Some(pump) = self.pumps.remove(id) else {
            debug!("Not subscribed to {id}, nothing to do");
            return Ok(());
        };
        pump.abort();
        if let Err(e) = link.unsubscribe(id).await {
            warn!("Unsubscribe from {id} failed at the adapter, local state cleared anyway: {e}");
        }
        info!("Unsubscribed from notifications on {id}");
        bus.emit(EventKind::NotifyStopped { characteristic: *id });
        Ok(())
    }

    /// Drops every subscription. Called on disconnect and on link loss;
    /// the link itself handles adapter-side teardown.
    pub fn clear(&mut self) {
        for (id, pump) in self.pumps.drain() {
            debug!("Dropping notification pump for {id}");
            pump.abort();
        }
    }

    /// Forwards one characteristic's inbound queue onto the event bus.
    async fn pump(id: CharacteristicId, mut queue: mpsc::Receiver<NotifyPayload>, bus: EventBus) {
        while let Some(payload) = queue.recv().await {
            match payload {
                Ok(value) => {
                    debug!("Notification from {id}: {} bytes", value.len());
                    bus.emit(EventKind::Notification {
                        characteristic: id,
                        value,
                    });
                }
                Err(e) => {
                    warn!("Notification stream for {id} failed: {e}");
                    bus.emit(EventKind::NotifyError {
                        characteristic: id,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        debug!("Notification pump for {id} ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE};
    use crate::core::bluetooth::error::TransportError;

    fn battery_id() -> CharacteristicId {
        CharacteristicId {
            service: UUID_BATTERY_SERVICE,
            characteristic: UUID_BATTERY_LEVEL,
        }
    }

    #[tokio::test]
    async fn pump_forwards_values_until_queue_closes() {
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let (tx, rx) = mpsc::channel(4);

        let pump = tokio::spawn(NotificationRouter::pump(battery_id(), rx, bus));
        tx.send(Ok(vec![0x64])).await.unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            EventKind::Notification { value, .. } if value == vec![0x64]
        ));

        drop(tx);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn pump_reports_stream_errors_and_stops() {
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let (tx, rx) = mpsc::channel(4);

        let pump = tokio::spawn(NotificationRouter::pump(battery_id(), rx, bus));
        tx.send(Err(TransportError::Adapter("link reset".into())))
            .await
            .unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.kind,
            EventKind::NotifyError { reason, .. } if reason.contains("link reset")
        ));
        pump.await.unwrap();
    }
}
