use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::core::error::{ServiceError, ServiceResult};
use crate::core::model::{
    ConnectionStatus, DiscoveryConfiguration, Location, ReaderDescriptor,
};
use crate::core::services::{
    ConnectionService, DiscoveryService, LocationDirectory, ReaderSink, TokenProvider,
};

/// Backend call that can be told to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePoint {
    ListLocations,
    Discover,
    Connect,
    Disconnect,
}

impl std::str::FromStr for FailurePoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "list-locations" | "locations" => Ok(FailurePoint::ListLocations),
            "discover" | "discovery" => Ok(FailurePoint::Discover),
            "connect" => Ok(FailurePoint::Connect),
            "disconnect" => Ok(FailurePoint::Disconnect),
            _ => Err(format!("Invalid failure point: {s}")),
        }
    }
}

/// Behaviour of the simulated terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorOptions {
    pub locations: Vec<Location>,
    pub readers: Vec<ReaderDescriptor>,
    pub scan_delay_ms: u64,
    pub connect_delay_ms: u64,
    pub disconnect_delay_ms: u64,
    /// Keep reporting CONNECTED after a successful disconnect, the way the
    /// vendor's simulated backend does.
    pub sticky_disconnect: bool,
    pub fail_at: Option<FailurePoint>,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            locations: vec![Location {
                id: "tml_simulated".to_string(),
                display_name: Some("Simulated location".to_string()),
            }],
            readers: vec![ReaderDescriptor {
                serial_number: "SIM-BT-0001".to_string(),
                model: Some("Bluetooth reader (simulated)".to_string()),
                software_version: Some("2.1.0.0".to_string()),
                battery_level: Some(0.85),
                simulated: true,
            }],
            scan_delay_ms: 200,
            connect_delay_ms: 300,
            disconnect_delay_ms: 100,
            sticky_disconnect: true,
            fail_at: None,
        }
    }
}

/// In-process terminal backend standing in for the vendor SDK.
///
/// Implements the directory, discovery and connection services. A fresh
/// credential is fetched for every location lookup and connect.
pub struct SimulatedTerminal {
    tokens: Arc<dyn TokenProvider>,
    options: SimulatorOptions,
    status: Mutex<ConnectionStatus>,
    connected_reader: Mutex<Option<ReaderDescriptor>>,
    pending_failure: Mutex<Option<FailurePoint>>,
    discovery_stop: Notify,
}

impl SimulatedTerminal {
    pub fn new(tokens: Arc<dyn TokenProvider>, options: SimulatorOptions) -> Self {
        let pending_failure = Mutex::new(options.fail_at);
        Self {
            tokens,
            options,
            status: Mutex::new(ConnectionStatus::NotConnected),
            connected_reader: Mutex::new(None),
            pending_failure,
            discovery_stop: Notify::new(),
        }
    }

    pub fn options(&self) -> &SimulatorOptions {
        &self.options
    }

    /// Reader the backend believes it is attached to
    pub fn connected_reader(&self) -> Option<ReaderDescriptor> {
        self.connected_reader.lock().clone()
    }

    fn take_failure(&self, point: FailurePoint) -> bool {
        let mut pending = self.pending_failure.lock();
        if *pending == Some(point) {
            *pending = None;
            true
        } else {
            false
        }
    }

    async fn authenticate(&self) -> ServiceResult<()> {
        let credential = self.tokens.fetch_token().await?;
        debug!("simulated terminal received {credential:?}");
        Ok(())
    }
}

#[async_trait]
impl LocationDirectory for SimulatedTerminal {
    async fn list_locations(&self) -> ServiceResult<Vec<Location>> {
        self.authenticate().await?;
        if self.take_failure(FailurePoint::ListLocations) {
            return Err(ServiceError::terminal("simulated location lookup failure"));
        }
        Ok(self.options.locations.clone())
    }
}

#[async_trait]
impl DiscoveryService for SimulatedTerminal {
    async fn discover(
        &self,
        config: DiscoveryConfiguration,
        sink: ReaderSink,
    ) -> ServiceResult<()> {
        if self.take_failure(FailurePoint::Discover) {
            return Err(ServiceError::terminal("simulated discovery failure"));
        }
        if !config.simulated {
            return Err(ServiceError::terminal(
                "no physical reader backend available; enable simulated discovery",
            ));
        }
        if !config.method.is_bluetooth() {
            return Err(ServiceError::terminal(format!(
                "discovery method {} is not supported for Bluetooth readers",
                config.method
            )));
        }

        tokio::time::sleep(Duration::from_millis(self.options.scan_delay_ms)).await;
        debug!(
            "simulated scan round {} found {} reader(s)",
            sink.round(),
            self.options.readers.len()
        );
        if !sink.readers_updated(self.options.readers.clone()) {
            return Ok(());
        }

        // The round ends once a connection attempt begins.
        self.discovery_stop.notified().await;
        Ok(())
    }
}

#[async_trait]
impl ConnectionService for SimulatedTerminal {
    async fn connect(&self, reader: ReaderDescriptor, location: Location) -> ServiceResult<()> {
        self.authenticate().await?;
        if self.take_failure(FailurePoint::Connect) {
            return Err(ServiceError::terminal("simulated connect failure"));
        }
        if !self.options.locations.iter().any(|l| l.id == location.id) {
            return Err(ServiceError::terminal(format!(
                "unknown location {}",
                location.id
            )));
        }

        {
            let mut status = self.status.lock();
            if *status != ConnectionStatus::NotConnected {
                return Err(ServiceError::terminal(format!(
                    "already connected to a reader (status {})",
                    *status
                )));
            }
            *status = ConnectionStatus::Connecting;
        }
        self.discovery_stop.notify_one();

        tokio::time::sleep(Duration::from_millis(self.options.connect_delay_ms)).await;

        *self.status.lock() = ConnectionStatus::Connected;
        info!("simulated terminal connected to {}", reader.serial_number);
        *self.connected_reader.lock() = Some(reader);
        Ok(())
    }

    async fn disconnect(&self) -> ServiceResult<()> {
        if self.take_failure(FailurePoint::Disconnect) {
            return Err(ServiceError::terminal("simulated disconnect failure"));
        }
        if *self.status.lock() != ConnectionStatus::Connected {
            return Err(ServiceError::terminal("no reader is connected"));
        }

        tokio::time::sleep(Duration::from_millis(self.options.disconnect_delay_ms)).await;

        if self.options.sticky_disconnect {
            debug!("simulated terminal keeps its connected state after disconnect");
        } else {
            *self.status.lock() = ConnectionStatus::NotConnected;
            *self.connected_reader.lock() = None;
        }
        Ok(())
    }

    fn current_status(&self) -> ConnectionStatus {
        *self.status.lock()
    }
}
