//! Characteristic registry.
//! Snapshot of the connected device's GATT tree, rebuilt wholesale at
//! connect time and emptied on disconnect.

use std::collections::HashMap;

use crate::core::bluetooth::types::{CharacteristicId, CharacteristicInfo, ServiceInfo};

/// Lookup table over the discovered services of the connected device.
///
/// Keys are `(service, characteristic)` pairs, so a characteristic UUID
/// repeated under several services resolves without ambiguity.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceInfo>,
    by_id: HashMap<CharacteristicId, CharacteristicInfo>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the previous snapshot wholesale.
    pub fn load(&mut self, services: Vec<ServiceInfo>) {
        self.by_id = services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .map(|characteristic| (characteristic.id, characteristic.clone()))
            .collect();
        self.services = services;
    }

    pub fn lookup(&self, id: &CharacteristicId) -> Option<&CharacteristicInfo> {
        self.by_id.get(id)
    }

    pub fn clear(&mut self) {
        self.services.clear();
        self.by_id.clear();
    }

    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn characteristic_count(&self) -> usize {
        self.by_id.len()
    }
}
