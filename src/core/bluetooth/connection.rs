//! Bluetooth connection handling backed by bluest
//! This module adapts the platform adapter, device and characteristic
//! objects to the session's transport traits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::constants::NOTIFY_QUEUE_DEPTH;
use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::{Link, LinkEvent, NotifyPayload, Transport, WriteMode};
use crate::core::bluetooth::types::{
    CharProps, CharacteristicId, CharacteristicInfo, DeviceInfo, ServiceInfo,
};

/// A device seen by the scanner: the live platform handle plus the
/// display record shown to the operator.
#[derive(Clone)]
pub struct DiscoveredDevice {
    pub handle: Device,
    pub info: DeviceInfo,
}

/// Map of discovered devices shared between the scanner and the
/// transport, keyed by platform device id.
pub type SharedDeviceMap = Arc<Mutex<HashMap<String, DiscoveredDevice>>>;

impl From<bluest::CharacteristicProperties> for CharProps {
    fn from(props: bluest::CharacteristicProperties) -> Self {
        Self {
            read: props.read,
            write: props.write,
            write_without_response: props.write_without_response,
            notify: props.notify,
            indicate: props.indicate,
        }
    }
}

/// Transport backed by the platform Bluetooth stack.
pub struct BluestTransport {
    adapter: Adapter,
    devices: SharedDeviceMap,
}

impl BluestTransport {
    pub fn new(adapter: Adapter, devices: SharedDeviceMap) -> Self {
        Self { adapter, devices }
    }
}

#[async_trait]
impl Transport for BluestTransport {
    async fn connect(
        &mut self,
        device: &DeviceInfo,
    ) -> Result<(Box<dyn Link>, mpsc::Receiver<LinkEvent>), TransportError> {
        let handle = self
            .devices
            .lock()
            .unwrap()
            .get(&device.id)
            .map(|d| d.handle.clone())
            .ok_or_else(|| TransportError::UnknownDevice(device.id.clone()))?;

        if handle.is_connected().await {
            info!("Device {} is already connected at the adapter", device.label());
        } else {
            info!("Initiating connection to {}", device.label());
            self.adapter
                .connect_device(&handle)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
        }

        let (event_tx, event_rx) = mpsc::channel(4);
        let watcher = spawn_link_watcher(self.adapter.clone(), handle.clone(), event_tx);

        let link = BluestLink {
            adapter: self.adapter.clone(),
            device: handle,
            characteristics: HashMap::new(),
            pumps: HashMap::new(),
            watcher,
        };
        Ok((Box::new(link), event_rx))
    }
}

/// Watches adapter connection events for one device and reports a lost
/// link exactly once.
fn spawn_link_watcher(
    adapter: Adapter,
    device: Device,
    events: mpsc::Sender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match adapter.device_connection_events(&device).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Connection events unavailable for {}: {e}", device.id());
                return;
            }
        };
        while let Some(event) = stream.next().await {
            if matches!(event, ConnectionEvent::Disconnected) {
                info!("Adapter reports {} disconnected", device.id());
                let _ = events.send(LinkEvent::Lost).await;
                break;
            }
        }
    })
}

/// A live connection. Holds the characteristic handles found during
/// discovery and one pump task per subscribed characteristic.
struct BluestLink {
    adapter: Adapter,
    device: Device,
    characteristics: HashMap<CharacteristicId, Characteristic>,
    pumps: HashMap<CharacteristicId, NotifyPump>,
    watcher: JoinHandle<()>,
}

struct NotifyPump {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BluestLink {
    fn characteristic(&self, id: &CharacteristicId) -> Result<&Characteristic, TransportError> {
        self.characteristics
            .get(id)
            .ok_or(TransportError::MissingCharacteristic)
    }
}

#[async_trait]
impl Link for BluestLink {
    async fn discover_services(&mut self) -> Result<Vec<ServiceInfo>, TransportError> {
        let services = self
            .device
            .services()
            .await
            .map_err(|e| TransportError::Discovery(e.to_string()))?;

        self.characteristics.clear();
        let mut snapshot = Vec::with_capacity(services.len());
        for service in services {
            let service_uuid = service.uuid();
            debug!("Discovered service {service_uuid}");
            let characteristics = service
                .characteristics()
                .await
                .map_err(|e| TransportError::Discovery(e.to_string()))?;
            let mut infos = Vec::with_capacity(characteristics.len());
            for characteristic in characteristics {
                let id = CharacteristicId {
                    service: service_uuid,
                    characteristic: characteristic.uuid(),
                };
                // Unreadable properties degrade to the empty set.
                let properties = match characteristic.properties().await {
                    Ok(props) => CharProps::from(props),
                    Err(e) => {
                        debug!("Properties unavailable for {id}: {e}");
                        CharProps::default()
                    }
                };
                self.characteristics.insert(id, characteristic);
                infos.push(CharacteristicInfo::new(id, properties));
            }
            snapshot.push(ServiceInfo::new(service_uuid, infos));
        }
        Ok(snapshot)
    }

    async fn read(&mut self, id: &CharacteristicId) -> Result<Vec<u8>, TransportError> {
        let characteristic = self.characteristic(id)?;
        characteristic
            .read()
            .await
            .map_err(|e| TransportError::Adapter(e.to_string()))
    }

    async fn write(
        &mut self,
        id: &CharacteristicId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError> {
        let characteristic = self.characteristic(id)?;
        let result = match mode {
            WriteMode::WithResponse => characteristic.write(payload).await,
            WriteMode::WithoutResponse => characteristic.write_without_response(payload).await,
        };
        result.map_err(|e| TransportError::Adapter(e.to_string()))
    }

    async fn subscribe(
        &mut self,
        id: &CharacteristicId,
    ) -> Result<mpsc::Receiver<NotifyPayload>, TransportError> {
        let characteristic = self.characteristic(id)?.clone();
        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump_notifications(
            *id,
            characteristic,
            tx,
            cancel.clone(),
            ready_tx,
        ));

        // The descriptor write happens inside the pump task; wait for its
        // verdict so a refused subscription fails here and now.
        match ready_rx.await {
            Ok(Ok(())) => {
                self.pumps.insert(*id, NotifyPump { cancel, task });
                Ok(rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Adapter(
                "notification task died before subscribing".into(),
            )),
        }
    }

    async fn unsubscribe(&mut self, id: &CharacteristicId) -> Result<(), TransportError> {
        match self.pumps.remove(id) {
            Some(pump) => {
                pump.cancel.cancel();
                // Dropping the notify stream inside the pump clears the
                // subscription at the adapter.
                let _ = pump.task.await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        // Deliberate teardown must not be reported as a lost link.
        self.watcher.abort();
        for (_, pump) in self.pumps.drain() {
            pump.cancel.cancel();
        }
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            self.adapter
                .disconnect_device(&self.device)
                .await
                .map_err(|e| TransportError::Disconnect(e.to_string()))?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", self.device.id());
        }
        Ok(())
    }
}

impl Drop for BluestLink {
    fn drop(&mut self) {
        self.watcher.abort();
        for pump in self.pumps.values() {
            pump.cancel.cancel();
        }
    }
}

/// Subscribes on the characteristic and forwards its notification stream
/// into the queue until cancelled or exhausted.
async fn pump_notifications(
    id: CharacteristicId,
    characteristic: Characteristic,
    queue: mpsc::Sender<NotifyPayload>,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<(), TransportError>>,
) {
    let mut stream = match characteristic.notify().await {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(TransportError::Adapter(e.to_string())));
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Notification stream for {id} cancelled");
                break;
            }
            item = stream.next() => match item {
                Some(Ok(value)) => {
                    if queue.send(Ok(value)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = queue
                        .send(Err(TransportError::Adapter(e.to_string())))
                        .await;
                    break;
                }
                None => {
                    debug!("Notification stream for {id} ended");
                    break;
                }
            },
        }
    }
}
