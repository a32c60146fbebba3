//! The canonical client-side collection of known devices.
//!
//! Keyed by `bus_info`, insertion-ordered, and structurally unable to hold
//! two devices with the same identity. The registry is plain storage; merge
//! policy and invariant fix-ups live in the reconciler and coordinators.

pub mod ports;

use crate::device::Device;

/// Mutable collection of known devices, unique by `bus_info`.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device, replacing any existing entry with the same
    /// `bus_info`. Entries without an identity are dropped with a warning;
    /// they must never corrupt the registry.
    ///
    /// Returns `true` if the device was stored.
    pub fn insert(&mut self, device: Device) -> bool {
        if device.bus_info.is_empty() {
            log::warn!("dropping device entry with missing bus_info");
            return false;
        }
        match self.position(&device.bus_info) {
            Some(idx) => self.devices[idx] = device,
            None => self.devices.push(device),
        }
        true
    }

    /// Remove a device by identity, returning it if present.
    pub fn remove(&mut self, bus_info: &str) -> Option<Device> {
        let idx = self.position(bus_info)?;
        Some(self.devices.remove(idx))
    }

    pub fn get(&self, bus_info: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.bus_info == bus_info)
    }

    pub fn get_mut(&mut self, bus_info: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.bus_info == bus_info)
    }

    pub fn contains(&self, bus_info: &str) -> bool {
        self.position(bus_info).is_some()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Drop every device. Used when the push channel disconnects and no
    /// device can be assumed present.
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Remove every device whose `bus_info` is not in `keep`. Returns the
    /// identities that were dropped.
    pub fn retain_ids(&mut self, keep: &[&str]) -> Vec<String> {
        let mut dropped = Vec::new();
        self.devices.retain(|d| {
            let stay = keep.contains(&d.bus_info.as_str());
            if !stay {
                dropped.push(d.bus_info.clone());
            }
            stay
        });
        dropped
    }

    fn position(&self, bus_info: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.bus_info == bus_info)
    }
}
