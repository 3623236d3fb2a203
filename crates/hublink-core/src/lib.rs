//! Core abstractions for hub-style realtime connections.
//!
//! This crate provides the fundamental building blocks:
//! - `ConnectionState` - Lifecycle states of a realtime session
//! - `ConnectionOptions` - Retry, reconnect and transport settings
//! - `ClientError` / `TransportError` - Error taxonomy shared by all layers
//! - `TransportConnection`, `ConnectionBuilder` and `RealtimeClient` traits
//! - `ConnectionUrlBuilder` - Hub endpoint URL composition

pub mod error;
pub mod options;
pub mod remote;
pub mod state;
pub mod traits;
pub mod url;

pub use error::{ClientError, TransportError};
pub use options::{ConnectionOptions, ConnectionOptionsPatch, TransportKinds};
pub use remote::RemoteException;
pub use state::ConnectionState;
pub use traits::{
    CloseReceiver, ConnectionBuilder, Handler, RealtimeClient, TransportConnection, Unsubscribe,
};
pub use url::ConnectionUrlBuilder;
