/// Reader Cycler - reproduces card reader disconnect defects
///
/// Drives a terminal backend through endless discover, connect and
/// disconnect cycles, logging status at every step and stopping on the
/// first failure.
pub mod cli;
pub mod core;

// Re-export commonly used types
pub use crate::core::{
    controller::{CycleEvent, CycleRecord, ReaderLifecycleController},
    error::{CycleError, ServiceError, ServiceResult, TokenError},
    model::{
        ConnectionStatus, Credential, CycleState, DiscoveryConfiguration, DiscoveryMethod,
        Location, ReaderDescriptor,
    },
    services::{ConnectionService, DiscoveryService, LocationDirectory, ReaderSink, TokenProvider},
};

// Common error type
pub type Result<T> = anyhow::Result<T>;
