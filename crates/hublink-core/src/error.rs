//! Error taxonomy shared by the session, transport and client layers.

use serde_json::Value;
use thiserror::Error;

use crate::{ConnectionState, RemoteException};

/// Failure reported by a transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Connection closed: {0}")]
    Closed(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Connection not started")]
    NotStarted,
}

/// Realtime client error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    /// Requested a transition the current state does not accept.
    #[error("Can't transit state from {from} to {to}")]
    InvalidOperation {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Missing or invalid argument.
    #[error("Invalid argument: {0}")]
    Argument(&'static str),
    /// Handler already registered under the method name.
    #[error("Handler already registered for method '{0}'")]
    AlreadyExists(String),
    /// A single transport start failed; the retry policy is still running.
    #[error("Connection error {url}: {source}")]
    TransportIo {
        url: String,
        #[source]
        source: TransportError,
    },
    /// Retry budget exhausted or retrying vetoed.
    #[error("Unrecoverable connection error {url}: {source}")]
    UnrecoverableTimeout {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("Internal error: {0}")]
    Internal(String),
    /// The session was stopped while a connect was still in flight.
    #[error("Connect cancelled by stop")]
    Cancelled,
    /// Operation on the live transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The server answered an invocation with an encoded exception.
    #[error("Invocation of '{method}' failed: {exception}")]
    TargetInvocation {
        method: String,
        args: Vec<Value>,
        exception: RemoteException,
    },
    /// The response was withheld because the session is no longer authorized.
    #[error("Not authorized to invoke '{method}'")]
    Unauthorized { method: String },
}

impl ClientError {
    /// Exception carried by a `TargetInvocation` error.
    #[must_use]
    pub const fn remote_exception(&self) -> Option<&RemoteException> {
        match self {
            Self::TargetInvocation { exception, .. } => Some(exception),
            _ => None,
        }
    }

    /// True for caller contract violations that must never be retried.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidOperation { .. } | Self::Argument(_) | Self::AlreadyExists(_)
        )
    }
}
