//! Device and pin records, plus the projection sent to observers

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Pin state that reads as logical high
pub const HIGH: &str = "HIGH";

/// Whether a symbolic pin state counts as high
pub fn is_high(state: &str) -> bool {
    state == HIGH
}

/// Opaque handle of a live connection
///
/// Device records keep only this handle; the connection directory maps it
/// to the actual outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Pin identifier as reported by the device
///
/// Firmware reports either GPIO numbers or symbolic names. The two forms
/// never compare equal: pin `2` and pin `"2"` are different pins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PinId {
    Number(i64),
    Name(String),
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinId::Number(n) => write!(f, "{}", n),
            PinId::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for PinId {
    fn from(name: &str) -> Self {
        PinId::Name(name.to_string())
    }
}

impl From<i64> for PinId {
    fn from(n: i64) -> Self {
        PinId::Number(n)
    }
}

/// Command-line form: anything that parses as an integer is a GPIO number
impl FromStr for PinId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<i64>().map(PinId::Number).unwrap_or_else(|_| PinId::Name(s.to_string())))
    }
}

/// A pin as it arrives in a `device_info` payload
#[derive(Debug, Clone, Deserialize)]
pub struct PinReport {
    pub id: PinId,
    #[serde(default)]
    pub state: String,
    /// Anything else the firmware attached (name, mode, ...)
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl PinReport {
    pub fn new(id: impl Into<PinId>, state: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: state.into(),
            attributes: Map::new(),
        }
    }
}

/// Stored pin state. `value` is always derived from `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinRecord {
    id: PinId,
    state: String,
    value: bool,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl PinRecord {
    pub fn new(id: impl Into<PinId>, state: impl Into<String>) -> Self {
        let state = state.into();
        Self {
            id: id.into(),
            value: is_high(&state),
            state,
            attributes: Map::new(),
        }
    }

    /// Build from a device report, discarding any `value` the device claimed
    pub fn from_report(report: PinReport) -> Self {
        let PinReport { id, state, mut attributes } = report;
        attributes.remove("value");
        Self {
            id,
            value: is_high(&state),
            state,
            attributes,
        }
    }

    pub fn id(&self) -> &PinId {
        &self.id
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub(crate) fn set_state(&mut self, state: &str) {
        self.state = state.to_string();
        self.value = is_high(state);
    }
}

/// Everything the hub knows about one device
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    id: String,
    pins: Vec<PinRecord>,
    capabilities: Value,
    last_seen: DateTime<Utc>,
    status: Option<BTreeMap<String, Value>>,
    connection: Option<ConnectionId>,
}

impl DeviceRecord {
    pub(crate) fn new(
        id: String,
        pins: Vec<PinReport>,
        capabilities: Option<Value>,
        connection: ConnectionId,
    ) -> Self {
        Self {
            id,
            pins: pins.into_iter().map(PinRecord::from_report).collect(),
            capabilities: normalize_capabilities(capabilities),
            last_seen: Utc::now(),
            status: None,
            connection: Some(connection),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pins(&self) -> &[PinRecord] {
        &self.pins
    }

    pub fn capabilities(&self) -> &Value {
        &self.capabilities
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn status(&self) -> Option<&BTreeMap<String, Value>> {
        self.status.as_ref()
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn is_online(&self) -> bool {
        self.connection.is_some()
    }

    /// Project into the observer view (no connection handle, no status)
    pub fn view(&self) -> ClientView {
        ClientView {
            id: self.id.clone(),
            pins: self.pins.clone(),
            capabilities: self.capabilities.clone(),
            last_seen: self.last_seen,
            online: self.is_online(),
        }
    }

    /// Set the first pin matching `pin_id`. Returns false if there is none.
    pub(crate) fn set_pin(&mut self, pin_id: &PinId, state: &str) -> bool {
        match self.pins.iter_mut().find(|pin| &pin.id == pin_id) {
            Some(pin) => {
                pin.set_state(state);
                self.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub(crate) fn record_sensor(&mut self, sensor: &str, value: Value) {
        self.status
            .get_or_insert_with(BTreeMap::new)
            .insert(sensor.to_string(), value);
    }

    pub(crate) fn detach(&mut self) {
        self.connection = None;
    }
}

/// Falsy capabilities (absent, `null`, `false`, `0`, `""`) become `""`
fn normalize_capabilities(capabilities: Option<Value>) -> Value {
    match capabilities {
        Some(value) if !is_falsy(&value) => value,
        _ => Value::String(String::new()),
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// The only device representation that goes over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    pub id: String,
    pub pins: Vec<PinRecord>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(serialize_with = "serialize_timestamp")]
    pub last_seen: DateTime<Utc>,
    pub online: bool,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
