use thiserror::Error;

use crate::core::model::{ConnectionStatus, CycleState};

/// Failures while obtaining a connection credential
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token endpoint is not configured (got {0:?})")]
    Misconfigured(String),
    #[error("token request failed: {0}")]
    Request(String),
    #[error("token endpoint returned HTTP {0}")]
    Status(u16),
    #[error("token response has no `secret` field")]
    MalformedResponse,
}

/// Failures reported by an external terminal service
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("{0}")]
    Terminal(String),
}

impl ServiceError {
    pub fn terminal(message: impl Into<String>) -> Self {
        ServiceError::Terminal(message.into())
    }

    fn is_token_misconfigured(&self) -> bool {
        matches!(self, ServiceError::Token(TokenError::Misconfigured(_)))
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Fatal outcomes of the reader cycle; each maps to its own exit code
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("token provider misconfigured: {0}")]
    TokenMisconfigured(ServiceError),
    #[error("no locations available")]
    NoLocations,
    #[error("listing locations failed: {0}")]
    LocationLookup(ServiceError),
    #[error("terminal is {0}, expected NOT CONNECTED before the first cycle")]
    NotIdleAtStart(ConnectionStatus),
    #[error("discovery failed: {0}")]
    Discovery(ServiceError),
    #[error("connect failed: {0}")]
    Connect(ServiceError),
    #[error("terminal says no reader is connected (status {status}, phase {phase})")]
    DisconnectPrecondition {
        status: ConnectionStatus,
        phase: CycleState,
    },
    #[error("disconnect failed: {0}")]
    Disconnect(ServiceError),
}

impl CycleError {
    /// Process exit code for this failure site
    pub fn exit_code(&self) -> i32 {
        match self {
            CycleError::TokenMisconfigured(_) => 10,
            CycleError::NoLocations | CycleError::LocationLookup(_) => 11,
            CycleError::Connect(_) => 12,
            CycleError::Discovery(_) => 13,
            CycleError::DisconnectPrecondition { .. } => 14,
            CycleError::Disconnect(_) => 15,
            CycleError::NotIdleAtStart(_) => 16,
        }
    }

    /// Short name of the call site that failed
    pub fn site(&self) -> &'static str {
        match self {
            CycleError::TokenMisconfigured(_) => "fetchConnectionToken",
            CycleError::NoLocations | CycleError::LocationLookup(_) => "listLocations",
            CycleError::NotIdleAtStart(_) => "start",
            CycleError::Discovery(_) => "discoverReaders",
            CycleError::Connect(_) => "connectReader",
            CycleError::DisconnectPrecondition { .. } | CycleError::Disconnect(_) => {
                "disconnectReader"
            }
        }
    }

    /// Wrap a service failure for `site`, unless the real cause is a
    /// placeholder token endpoint, which always wins.
    pub(crate) fn from_service(
        err: ServiceError,
        site: fn(ServiceError) -> CycleError,
    ) -> CycleError {
        if err.is_token_misconfigured() {
            CycleError::TokenMisconfigured(err)
        } else {
            site(err)
        }
    }
}
