
use std::collections::hash_map::Entry;
use std::sync::Arc;

use anyhow::Result;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::connection::{DiscoveredDevice, SharedDeviceMap};
use crate::core::bluetooth::types::DeviceInfo;

/// Filter applied to each advertisement before the device is recorded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanFilter {
    /// Only record devices whose advertised name starts with this prefix.
    pub name_prefix: Option<String>,
    /// Drop devices that never advertised a name.
    pub named_only: bool,
    /// Drop devices weaker than this RSSI (dBm).
    pub min_rssi: Option<i16>,
}

impl ScanFilter {
    /// Unknown RSSI passes the signal check; connected devices report none.
    pub fn matches(&self, name: Option<&str>, rssi: Option<i16>) -> bool {
        if self.named_only && name.is_none() {
            return false;
        }
        if let Some(prefix) = &self.name_prefix {
            match name {
                Some(name) if name.starts_with(prefix.as_str()) => {}
                _ => return false,
            }
        }
        if let (Some(min), Some(rssi)) = (self.min_rssi, rssi)
            && rssi < min
        {
            return false;
        }
        true
    }
}

pub struct DeviceScanner {
    adapter: Adapter,
    devices: SharedDeviceMap,
    filter: ScanFilter,
    cancel_token: Arc<CancellationToken>,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl DeviceScanner {
    pub fn new(adapter: Adapter, devices: SharedDeviceMap, filter: ScanFilter) -> Self {
        Self {
            adapter,
            devices,
            filter,
            cancel_token: Arc::new(CancellationToken::new()),
            scan_task_handle: None,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Starts a fresh scan, discarding previously discovered devices.
    /// Starting while already scanning restarts.
    pub async fn start_scan(&mut self) -> Result<()> {
        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }
        self.devices.lock().unwrap().clear();

        self.cancel_token = Arc::new(CancellationToken::new());
        let cancel_token_for_task = self.cancel_token.clone();
        let adapter_for_task = self.adapter.clone();
        let devices_for_task = self.devices.clone();
        let filter_for_task = self.filter.clone();

        let handle = tokio::spawn(async move {
            Self::internal_scan_task(
                adapter_for_task,
                devices_for_task,
                filter_for_task,
                cancel_token_for_task,
            )
            .await;
        });
        self.scan_task_handle = Some(handle);
        info!("Device scan task started.");
        Ok(())
    }

    /// Scans for advertising devices and records everything that passes
    /// the filter, until cancelled or the stream ends.
    async fn internal_scan_task(
        adapter: Adapter,
        devices: SharedDeviceMap,
        filter: ScanFilter,
        cancel_token: Arc<CancellationToken>,
    ) {
        // Connected devices do not advertise; surface them first so an
        // already-attached peripheral can still be picked.
        match adapter.connected_devices().await {
            Ok(connected) => {
                for device in connected {
                    Self::record_device(&devices, &filter, device, None);
                }
            }
            Err(e) => debug!("Connected-device enumeration failed: {e}"),
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start scan: {e}");
                return;
            }
        };

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let rssi = discovered_device.rssi;
                            Self::record_device(&devices, &filter, discovered_device.device, rssi);
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        info!("Bluetooth scan stopped.");
    }

    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            match handle.await {
                Ok(()) => info!("Scan task finished after cancellation."),
                Err(e) => {
                    if e.is_cancelled() {
                        info!("Scan task was cancelled.");
                    } else {
                        error!("Scan task finished with an unexpected join error: {e:?}");
                    }
                }
            }
        } else {
            debug!("No active scan task to stop.");
        }
    }

    /// Devices discovered so far, strongest signal first.
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.lock().unwrap();
        let mut list: Vec<DeviceInfo> = devices.values().map(|d| d.info.clone()).collect();
        list.sort_by(|a, b| {
            b.rssi
                .unwrap_or(i16::MIN)
                .cmp(&a.rssi.unwrap_or(i16::MIN))
                .then_with(|| a.address.cmp(&b.address))
        });
        list
    }

    /// Records one sighting. Later advertisements refresh the name and
    /// RSSI of devices seen before.
    fn record_device(
        devices: &SharedDeviceMap,
        filter: &ScanFilter,
        device: Device,
        rssi: Option<i16>,
    ) {
        let name = device.name().ok().filter(|n| !n.is_empty());
        if !filter.matches(name.as_deref(), rssi) {
            return;
        }
        let id = device.id().to_string();
        let address = Self::extract_mac_address(&id).unwrap_or_else(|| id.clone());

        let mut devices = devices.lock().unwrap();
        match devices.entry(id.clone()) {
            Entry::Occupied(mut seen) => {
                let record = seen.get_mut();
                record.handle = device;
                if name.is_some() {
                    record.info.name = name;
                }
                if rssi.is_some() {
                    record.info.rssi = rssi;
                }
            }
            Entry::Vacant(slot) => {
                let info = DeviceInfo {
                    id,
                    name,
                    address,
                    rssi,
                };
                info!("Found device: {} (RSSI: {:?})", info.label(), rssi);
                slot.insert(DiscoveredDevice {
                    handle: device,
                    info,
                });
            }
        }
    }

    fn extract_mac_address(device_id_str: &str) -> Option<String> {
        let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
        re.find_iter(device_id_str)
            .last()
            .map(|m| m.as_str().to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_defaults_pass_everything() {
        let filter = ScanFilter::default();
        assert!(filter.matches(Some("HR Monitor"), Some(-80)));
        assert!(filter.matches(None, None));
    }

    #[test]
    fn named_only_drops_anonymous_devices() {
        let filter = ScanFilter {
            named_only: true,
            ..ScanFilter::default()
        };
        assert!(!filter.matches(None, Some(-40)));
        assert!(filter.matches(Some("Thermo"), Some(-40)));
    }

    #[test]
    fn prefix_filter_requires_a_matching_name() {
        let filter = ScanFilter {
            name_prefix: Some("Thermo".into()),
            ..ScanFilter::default()
        };
        assert!(filter.matches(Some("Thermo-7"), None));
        assert!(!filter.matches(Some("HR Monitor"), None));
        assert!(!filter.matches(None, None));
    }

    #[test]
    fn rssi_threshold_passes_unknown_signal() {
        let filter = ScanFilter {
            min_rssi: Some(-70),
            ..ScanFilter::default()
        };
        assert!(filter.matches(Some("Thermo"), Some(-60)));
        assert!(!filter.matches(Some("Thermo"), Some(-85)));
        assert!(filter.matches(Some("Thermo"), None));
    }

    #[test]
    fn mac_address_extraction_handles_platform_ids() {
        assert_eq!(
            DeviceScanner::extract_mac_address("/org/bluez/hci0/dev_C4_3A_BE_12_34_fe"),
            None
        );
        assert_eq!(
            DeviceScanner::extract_mac_address("C4:3A:BE:12:34:FE"),
            Some("C4:3A:BE:12:34:FE".to_string())
        );
        assert_eq!(
            DeviceScanner::extract_mac_address("prefix-c4:3a:be:12:34:fe"),
            Some("C4:3A:BE:12:34:FE".to_string())
        );
    }
}
