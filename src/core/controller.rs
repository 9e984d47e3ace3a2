use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::core::error::{CycleError, ServiceResult};
use crate::core::model::{
    ConnectionStatus, CycleState, DiscoveryConfiguration, Location, ReaderDescriptor,
};
use crate::core::services::{ConnectionService, DiscoveryService, LocationDirectory, ReaderSink};

/// Completions and notifications delivered to the controller
#[derive(Debug)]
pub enum CycleEvent {
    DiscoveryCompleted {
        round: u64,
        result: ServiceResult<()>,
    },
    ReadersUpdated {
        round: u64,
        readers: Vec<ReaderDescriptor>,
    },
    ConnectCompleted {
        result: ServiceResult<()>,
    },
    DisconnectCompleted {
        result: ServiceResult<()>,
    },
}

/// One completed discover/connect/disconnect cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub round: u64,
    pub reader: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status_after_disconnect: ConnectionStatus,
    pub discrepancy: bool,
}

/// Drives the discover -> connect -> disconnect -> rediscover cycle.
///
/// The controller owns its phase exclusively and is driven by completions
/// arriving on its event channel, so only one request of each kind is ever
/// outstanding. Every collaborator error is returned as a [`CycleError`]
/// and no further transition happens after one.
pub struct ReaderLifecycleController {
    discovery: Arc<dyn DiscoveryService>,
    connection: Arc<dyn ConnectionService>,
    location: Location,
    config: DiscoveryConfiguration,
    state: CycleState,
    target: Option<ReaderDescriptor>,
    round: u64,
    round_started: Option<(DateTime<Utc>, Instant)>,
    history: Vec<CycleRecord>,
    events_tx: mpsc::UnboundedSender<CycleEvent>,
    events_rx: mpsc::UnboundedReceiver<CycleEvent>,
}

impl ReaderLifecycleController {
    /// Create a controller for an already resolved location
    pub fn new(
        discovery: Arc<dyn DiscoveryService>,
        connection: Arc<dyn ConnectionService>,
        location: Location,
        config: DiscoveryConfiguration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            discovery,
            connection,
            location,
            config,
            state: CycleState::Idle,
            target: None,
            round: 0,
            round_started: None,
            history: Vec::new(),
            events_tx,
            events_rx,
        }
    }

    /// Resolve the location from `directory`, then create the controller
    pub async fn bootstrap(
        directory: &dyn LocationDirectory,
        discovery: Arc<dyn DiscoveryService>,
        connection: Arc<dyn ConnectionService>,
        config: DiscoveryConfiguration,
    ) -> Result<Self, CycleError> {
        let location = resolve_location(directory).await?;
        Ok(Self::new(discovery, connection, location, config))
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Reader targeted by the current round, if one was picked
    pub fn target(&self) -> Option<&ReaderDescriptor> {
        self.target.as_ref()
    }

    /// Number of discovery rounds issued so far
    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn history(&self) -> &[CycleRecord] {
        &self.history
    }

    /// Begin the first cycle. The terminal must be NOT CONNECTED.
    pub fn start(&mut self) -> Result<(), CycleError> {
        if self.state != CycleState::Idle {
            debug!("start ignored while {}", self.state);
            return Ok(());
        }

        let status = self.connection.current_status();
        info!("Terminal connection status = {status}");
        if status != ConnectionStatus::NotConnected {
            return Err(CycleError::NotIdleAtStart(status));
        }

        self.begin_discovery();
        Ok(())
    }

    pub fn on_discovery_completed(&mut self, result: ServiceResult<()>) -> Result<(), CycleError> {
        match result {
            Ok(()) => {
                debug!("discoverReaders -- SUCCESS (phase {})", self.state);
                Ok(())
            }
            Err(err) => Err(CycleError::from_service(err, CycleError::Discovery)),
        }
    }

    /// Pick the first reported reader and connect to it. Only acts while
    /// discovering; later reports are ignored.
    pub fn on_readers_updated(&mut self, readers: Vec<ReaderDescriptor>) {
        if self.state != CycleState::Discovering {
            debug!(
                "Ignoring {} reader(s) reported while {}",
                readers.len(),
                self.state
            );
            return;
        }

        // Single-reader assumption: whichever reader the backend lists first.
        let Some(reader) = readers.into_iter().next() else {
            debug!("Discovery update carried no readers");
            return;
        };

        info!("Found first reader: {}", reader.serial_number);
        info!("Connecting to {} at {}", reader.serial_number, self.location);
        self.target = Some(reader.clone());
        self.transition(CycleState::Connecting);

        let connection = Arc::clone(&self.connection);
        let location = self.location.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = connection.connect(reader, location).await;
            let _ = events.send(CycleEvent::ConnectCompleted { result });
        });
    }

    /// On success, disconnect straight away.
    pub fn on_connect_completed(&mut self, result: ServiceResult<()>) -> Result<(), CycleError> {
        if let Err(err) = result {
            return Err(CycleError::from_service(err, CycleError::Connect));
        }
        if self.state != CycleState::Connecting {
            debug!("Ignoring connect completion while {}", self.state);
            return Ok(());
        }

        info!("connectReader -- SUCCESS");
        self.transition(CycleState::Connected);
        info!("Disconnecting reader");
        self.disconnect()
    }

    /// Request a disconnect. Status is read now, never cached.
    pub fn disconnect(&mut self) -> Result<(), CycleError> {
        let status = self.connection.current_status();
        if status != ConnectionStatus::Connected || self.state != CycleState::Connected {
            return Err(CycleError::DisconnectPrecondition {
                status,
                phase: self.state,
            });
        }

        self.transition(CycleState::Disconnecting);

        let connection = Arc::clone(&self.connection);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = connection.disconnect().await;
            let _ = events.send(CycleEvent::DisconnectCompleted { result });
        });
        Ok(())
    }

    /// Record the cycle and start the next discovery round.
    pub fn on_disconnect_completed(
        &mut self,
        result: ServiceResult<()>,
    ) -> Result<(), CycleError> {
        if let Err(err) = result {
            return Err(CycleError::from_service(err, CycleError::Disconnect));
        }
        if self.state != CycleState::Disconnecting {
            debug!("Ignoring disconnect completion while {}", self.state);
            return Ok(());
        }

        info!("disconnectReader -- SUCCESS");
        let status = self.connection.current_status();
        info!("Terminal connection status = {status}");
        let discrepancy = status != ConnectionStatus::NotConnected;
        if discrepancy {
            warn!("Disconnect reported success but terminal still reports {status}");
        }
        self.record_cycle(status, discrepancy);

        self.transition(CycleState::Idle);
        info!("Discovering readers again");
        self.begin_discovery();
        Ok(())
    }

    /// Dispatch one event to its handler
    pub fn handle(&mut self, event: CycleEvent) -> Result<(), CycleError> {
        let result = match event {
            CycleEvent::DiscoveryCompleted { round, result } => {
                debug!("discovery round {round} completed");
                self.on_discovery_completed(result)
            }
            CycleEvent::ReadersUpdated { round, readers } => {
                if round == self.round {
                    self.on_readers_updated(readers);
                } else {
                    debug!("Dropping readers from stale discovery round {round}");
                }
                Ok(())
            }
            CycleEvent::ConnectCompleted { result } => self.on_connect_completed(result),
            CycleEvent::DisconnectCompleted { result } => self.on_disconnect_completed(result),
        };

        // The caller reports the failure; this only records the phase.
        if let Err(err) = &result {
            debug!("{} failed in phase {}: {err}", err.site(), self.state);
        }
        result
    }

    /// Wait for the next completion or notification
    pub async fn next_event(&mut self) -> Option<CycleEvent> {
        self.events_rx.recv().await
    }

    /// Wait for one event and handle it
    pub async fn step(&mut self) -> Result<(), CycleError> {
        match self.next_event().await {
            Some(event) => self.handle(event),
            None => Ok(()),
        }
    }

    /// Start and keep cycling. Returns only on a fatal error, or after
    /// `max_cycles` completed cycles when a limit is given.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> Result<(), CycleError> {
        if max_cycles == Some(0) {
            info!("Cycle limit is 0, not starting");
            return Ok(());
        }
        self.start()?;
        loop {
            if let Some(limit) = max_cycles {
                if self.history.len() as u64 >= limit {
                    info!("Stopping after {limit} cycle(s)");
                    return Ok(());
                }
            }
            self.step().await?;
        }
    }

    fn begin_discovery(&mut self) {
        if self.state != CycleState::Idle {
            warn!("Not starting discovery while {}", self.state);
            return;
        }

        self.round += 1;
        self.target = None;
        self.round_started = Some((Utc::now(), Instant::now()));
        self.transition(CycleState::Discovering);
        info!(
            "Discovering readers (round {}, {}, simulated={})",
            self.round, self.config.method, self.config.simulated
        );

        let round = self.round;
        let config = self.config;
        let discovery = Arc::clone(&self.discovery);
        let sink = ReaderSink::new(round, self.events_tx.clone());
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = discovery.discover(config, sink).await;
            let _ = events.send(CycleEvent::DiscoveryCompleted { round, result });
        });
    }

    fn record_cycle(&mut self, status: ConnectionStatus, discrepancy: bool) {
        let (started_at, duration_ms) = match self.round_started.take() {
            Some((at, clock)) => (at, clock.elapsed().as_millis() as u64),
            None => (Utc::now(), 0),
        };
        let reader = self
            .target
            .as_ref()
            .map(|r| r.serial_number.clone())
            .unwrap_or_default();

        info!("Cycle {} complete in {duration_ms}ms", self.round);
        self.history.push(CycleRecord {
            round: self.round,
            reader,
            started_at,
            duration_ms,
            status_after_disconnect: status,
            discrepancy,
        });
    }

    fn transition(&mut self, next: CycleState) {
        debug!("cycle state {} -> {}", self.state, next);
        self.state = next;
        info!("Cycle state = {next}");
    }
}

/// Pick the first location the directory returns
pub async fn resolve_location(directory: &dyn LocationDirectory) -> Result<Location, CycleError> {
    let locations = directory
        .list_locations()
        .await
        .map_err(|err| CycleError::from_service(err, CycleError::LocationLookup))?;

    let location = locations.into_iter().next().ok_or(CycleError::NoLocations)?;
    info!("Using location {location}");
    Ok(location)
}
