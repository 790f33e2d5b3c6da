//! Device registry
//!
//! The authoritative, in-memory view of every device that has ever identified
//! itself. Records are never removed; a disconnect only clears the owning
//! connection handle.
//!
//! Both the primary map (device id -> record) and the reverse index
//! (connection -> device id) live behind one lock, so every operation sees
//! and leaves them consistent.

mod device;

pub use device::{is_high, ClientView, ConnectionId, DeviceRecord, PinId, PinRecord, PinReport, HIGH};

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// How a device can currently be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLink {
    /// No device with that id ever identified itself
    Unknown,
    /// Known, but no live connection
    Offline,
    /// Known and reachable through this connection
    Online(ConnectionId),
}

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<String, DeviceRecord>,
    /// Ids in order of first registration
    order: Vec<String>,
    by_connection: HashMap<ConnectionId, String>,
}

impl RegistryInner {
    fn attach(&mut self, record: DeviceRecord, connection: ConnectionId) {
        let id = record.id().to_string();

        // A connection speaks for at most one device
        if let Some(previous) = self.by_connection.remove(&connection) {
            if previous != id {
                if let Some(old) = self.devices.get_mut(&previous) {
                    old.detach();
                }
                debug!(device_id = %previous, conn_id = %connection, "Connection re-identified, detaching previous device");
            }
        }

        match self.devices.insert(id.clone(), record) {
            Some(replaced) => {
                if let Some(old_conn) = replaced.connection() {
                    if old_conn != connection {
                        self.by_connection.remove(&old_conn);
                    }
                }
            }
            None => self.order.push(id.clone()),
        }

        self.by_connection.insert(connection, id);
    }
}

/// Shared registry of device records
#[derive(Default)]
pub struct DeviceRegistry {
    inner: Mutex<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the record for `id` wholesale and attach `connection` to it
    pub fn register(
        &self,
        id: &str,
        pins: Vec<PinReport>,
        capabilities: Option<Value>,
        connection: ConnectionId,
    ) {
        let record = DeviceRecord::new(id.to_string(), pins, capabilities, connection);
        self.inner.lock().attach(record, connection);
    }

    /// Set a pin's state. False if the device or pin is unknown.
    pub fn update_pin(&self, id: &str, pin_id: &PinId, state: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.devices.get_mut(id) {
            Some(device) => device.set_pin(pin_id, state),
            None => false,
        }
    }

    /// Store the latest reading for a sensor. False if the device is unknown.
    pub fn update_sensor(&self, id: &str, sensor: &str, value: Value) -> bool {
        let mut inner = self.inner.lock();
        match inner.devices.get_mut(id) {
            Some(device) => {
                device.record_sensor(sensor, value);
                true
            }
            None => false,
        }
    }

    /// Detach whichever device `connection` belonged to, returning its id
    pub fn mark_offline(&self, connection: ConnectionId) -> Option<String> {
        let mut inner = self.inner.lock();
        let id = inner.by_connection.remove(&connection)?;

        if let Some(device) = inner.devices.get_mut(&id) {
            if device.connection() == Some(connection) {
                device.detach();
            }
        }

        Some(id)
    }

    /// Observer views of all devices, in first-registration order
    pub fn snapshot(&self) -> Vec<ClientView> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.devices.get(id))
            .map(DeviceRecord::view)
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ClientView> {
        self.inner.lock().devices.get(id).map(DeviceRecord::view)
    }

    /// Latest sensor readings; empty for a device that never reported any
    pub fn status(&self, id: &str) -> Option<BTreeMap<String, Value>> {
        self.inner
            .lock()
            .devices
            .get(id)
            .map(|device| device.status().cloned().unwrap_or_default())
    }

    pub fn link(&self, id: &str) -> DeviceLink {
        match self.inner.lock().devices.get(id) {
            None => DeviceLink::Unknown,
            Some(device) => match device.connection() {
                Some(conn) => DeviceLink::Online(conn),
                None => DeviceLink::Offline,
            },
        }
    }

    /// Id of the device a connection speaks for, if any
    pub fn device_for(&self, connection: ConnectionId) -> Option<String> {
        self.inner.lock().by_connection.get(&connection).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().devices.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().by_connection.len()
    }
}
