use serde::{Deserialize, Serialize};
use std::fmt;

/// Short-lived secret handed to the terminal backend for a single request
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

// Keep secrets out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<{} bytes>)", self.0.len())
    }
}

/// A merchant site a reader must be registered against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Location {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} ({})", self.id, name),
            None => f.write_str(&self.id),
        }
    }
}

/// A reader seen during discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderDescriptor {
    pub serial_number: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub software_version: Option<String>,
    #[serde(default)]
    pub battery_level: Option<f32>,
    #[serde(default)]
    pub simulated: bool,
}

impl ReaderDescriptor {
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            model: None,
            software_version: None,
            battery_level: None,
            simulated: false,
        }
    }
}

/// Terminal-side connection status, owned by the connection service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::NotConnected => "NOT CONNECTED",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Connected => "CONNECTED",
        })
    }
}

/// Phase of the discover/connect/disconnect cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleState {
    Idle,
    Discovering,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CycleState::Idle => "IDLE",
            CycleState::Discovering => "DISCOVERING",
            CycleState::Connecting => "CONNECTING",
            CycleState::Connected => "CONNECTED",
            CycleState::Disconnecting => "DISCONNECTING",
        })
    }
}

/// How the backend should scan for readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    BluetoothScan,
    BluetoothProximity,
    Internet,
}

impl DiscoveryMethod {
    pub fn is_bluetooth(&self) -> bool {
        matches!(
            self,
            DiscoveryMethod::BluetoothScan | DiscoveryMethod::BluetoothProximity
        )
    }
}

impl std::str::FromStr for DiscoveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bluetooth_scan" | "scan" => Ok(DiscoveryMethod::BluetoothScan),
            "bluetooth_proximity" | "proximity" => Ok(DiscoveryMethod::BluetoothProximity),
            "internet" => Ok(DiscoveryMethod::Internet),
            _ => Err(format!("Invalid discovery method: {s}")),
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscoveryMethod::BluetoothScan => "bluetooth-scan",
            DiscoveryMethod::BluetoothProximity => "bluetooth-proximity",
            DiscoveryMethod::Internet => "internet",
        })
    }
}

/// Scan parameters passed through to the discovery service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfiguration {
    pub method: DiscoveryMethod,
    pub simulated: bool,
}

impl Default for DiscoveryConfiguration {
    fn default() -> Self {
        Self {
            method: DiscoveryMethod::BluetoothScan,
            simulated: true,
        }
    }
}
