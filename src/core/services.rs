//! Seams between the reader cycle and the terminal backend.
//!
//! The controller never talks to a concrete SDK; it only sees these traits.
//! Every asynchronous request resolves to a `Result`, and reader updates
//! arrive through a [`ReaderSink`] that feeds the controller's event channel.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::controller::CycleEvent;
use crate::core::error::{ServiceResult, TokenError};
use crate::core::model::{
    ConnectionStatus, Credential, DiscoveryConfiguration, Location, ReaderDescriptor,
};

/// Supplies a fresh credential each time the backend needs one
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<Credential, TokenError>;
}

/// Lists the locations readers may be registered against
#[async_trait]
pub trait LocationDirectory: Send + Sync {
    async fn list_locations(&self) -> ServiceResult<Vec<Location>>;
}

/// Scans for readers
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// Runs one discovery round. Reader updates go to `sink` while the round
    /// is active; the future resolves when the backend ends the round.
    async fn discover(&self, config: DiscoveryConfiguration, sink: ReaderSink)
        -> ServiceResult<()>;
}

/// Connects and disconnects readers and owns the connection status
#[async_trait]
pub trait ConnectionService: Send + Sync {
    async fn connect(&self, reader: ReaderDescriptor, location: Location) -> ServiceResult<()>;

    async fn disconnect(&self) -> ServiceResult<()>;

    /// Synchronous read of the backend's current status
    fn current_status(&self) -> ConnectionStatus;
}

/// Delivery handle for discovered readers, tagged with its discovery round
#[derive(Debug, Clone)]
pub struct ReaderSink {
    round: u64,
    events: mpsc::UnboundedSender<CycleEvent>,
}

impl ReaderSink {
    pub(crate) fn new(round: u64, events: mpsc::UnboundedSender<CycleEvent>) -> Self {
        Self { round, events }
    }

    /// A sink whose updates land on a fresh receiver, for driving a
    /// discovery service outside a controller.
    pub fn channel(round: u64) -> (Self, mpsc::UnboundedReceiver<CycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(round, tx), rx)
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    /// Report the readers currently visible. Returns false once the
    /// receiving controller is gone.
    pub fn readers_updated(&self, readers: Vec<ReaderDescriptor>) -> bool {
        self.events
            .send(CycleEvent::ReadersUpdated {
                round: self.round,
                readers,
            })
            .is_ok()
    }
}
