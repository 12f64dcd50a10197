//! Device registry (§4.6, §5 "Device registry: map of device_id -> Device
//! with per-entry locking; global read is lock-free via an immutable
//! snapshot swapped on change").
//!
//! Grounded in `skynet_core::types::ChannelOutbound`'s DashMap-of-senders
//! shape (`app::AppState::channel_senders`) for the registration bookkeeping,
//! generalized here to the snapshot-swap discipline §5 calls for explicitly
//! rather than a bare `DashMap<String, Device>` — a lock-free reader never
//! observes a torn update mid-registration.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use renfield_core::types::{Device, DeviceCapabilities, DeviceKind};

/// Tracks every Device that has ever sent a `register` frame. Updated only
/// by the owning connection's register/heartbeat handling; read by the
/// audio-output routing policy and the REST `GET /devices` surface.
#[derive(Default)]
pub struct DeviceRegistry {
    snapshot: RwLock<Arc<HashMap<String, Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self { snapshot: RwLock::new(Arc::new(HashMap::new())) }
    }

    /// Lock-free read of the current device set.
    pub fn snapshot(&self) -> Arc<HashMap<String, Device>> {
        Arc::clone(&self.snapshot.read().unwrap())
    }

    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.snapshot().get(device_id).cloned()
    }

    /// Upsert a device on `register` (§4.6): creates the record on first
    /// sight, otherwise refreshes capabilities/kind and applies invariant I4
    /// via `Device::assign_room`.
    pub fn register(
        &self,
        device_id: &str,
        kind: DeviceKind,
        capabilities: DeviceCapabilities,
        room_id: Option<String>,
        admin_room_id: Option<&str>,
    ) -> Device {
        let mut guard = self.snapshot.write().unwrap();
        let mut next = (**guard).clone();
        let device = next.entry(device_id.to_string()).or_insert_with(|| Device {
            device_id: device_id.to_string(),
            kind,
            capabilities,
            room_id: room_id.clone().unwrap_or_else(|| "unassigned".to_string()),
            room_admin_assigned: false,
            is_stationary: matches!(kind, DeviceKind::StationaryPanel | DeviceKind::Kiosk),
            last_heartbeat: Utc::now(),
            online: true,
        });
        device.kind = kind;
        device.capabilities = capabilities;
        device.online = true;
        device.last_heartbeat = Utc::now();
        if let Some(admin_room) = admin_room_id {
            device.assign_room(admin_room.to_string(), true);
        } else if let Some(declared_room) = room_id {
            device.assign_room(declared_room, false);
        }
        let result = device.clone();
        *guard = Arc::new(next);
        result
    }

    /// Refresh liveness on a `heartbeat` frame (§4.6: "never closes the
    /// socket unilaterally on a missed heartbeat — it only updates
    /// liveness").
    pub fn touch_heartbeat(&self, device_id: &str) {
        let mut guard = self.snapshot.write().unwrap();
        let Some(device) = (*guard).get(device_id) else { return };
        let mut next = (**guard).clone();
        if let Some(d) = next.get_mut(device_id) {
            d.last_heartbeat = Utc::now();
            d.online = true;
        }
        let _ = device;
        *guard = Arc::new(next);
    }

    pub fn mark_offline(&self, device_id: &str) {
        let mut guard = self.snapshot.write().unwrap();
        let mut next = (**guard).clone();
        if let Some(d) = next.get_mut(device_id) {
            d.online = false;
        }
        *guard = Arc::new(next);
    }

    /// Devices in `room_id`, excluding `exclude_device_id` (§4.6 audio-output
    /// routing step 2's "room siblings").
    pub fn room_siblings(&self, room_id: &str, exclude_device_id: &str) -> Vec<Device> {
        self.snapshot()
            .values()
            .filter(|d| d.room_id == room_id && d.device_id != exclude_device_id)
            .cloned()
            .collect()
    }

    /// Mark devices whose last heartbeat is older than `idle_tolerance`
    /// offline. Three missed 30s heartbeats is the spec's 90s default (§5).
    pub fn sweep_idle(&self, idle_tolerance: chrono::Duration) -> usize {
        let cutoff = Utc::now() - idle_tolerance;
        let mut guard = self.snapshot.write().unwrap();
        let mut next = (**guard).clone();
        let mut count = 0;
        for device in next.values_mut() {
            if device.online && device.last_heartbeat < cutoff {
                device.online = false;
                count += 1;
            }
        }
        *guard = Arc::new(next);
        count
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(speaker: bool) -> DeviceCapabilities {
        DeviceCapabilities { has_microphone: true, has_speaker: speaker, has_wakeword: false, has_display: false }
    }

    #[test]
    fn register_creates_then_updates_in_place() {
        let registry = DeviceRegistry::new();
        registry.register("sat-1", DeviceKind::Satellite, caps(true), Some("kitchen".to_string()), None);
        assert_eq!(registry.len(), 1);
        let device = registry.register("sat-1", DeviceKind::Satellite, caps(false), Some("kitchen".to_string()), None);
        assert_eq!(registry.len(), 1);
        assert!(!device.capabilities.has_speaker);
    }

    #[test]
    fn admin_assignment_overrides_later_client_declared_room() {
        let registry = DeviceRegistry::new();
        registry.register("panel-1", DeviceKind::StationaryPanel, caps(true), Some("kitchen".to_string()), Some("office"));
        let device = registry.register("panel-1", DeviceKind::StationaryPanel, caps(true), Some("kitchen".to_string()), None);
        assert_eq!(device.room_id, "office");
    }

    #[test]
    fn sweep_idle_marks_stale_devices_offline_without_removing_them() {
        let registry = DeviceRegistry::new();
        registry.register("sat-1", DeviceKind::Satellite, caps(true), None, None);
        let removed = registry.sweep_idle(chrono::Duration::seconds(-1));
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 1);
        assert!(!registry.get("sat-1").unwrap().online);
    }
}
