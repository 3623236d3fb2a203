//! Table-driven connection lifecycle automaton.
//!
//! The transition table is the pure function [`transition`]. [`StateMachine`]
//! applies it to the current state and publishes the outcome:
//! - the current state on a watch channel (late subscribers see the last value)
//! - every state entry on a broadcast channel (no replay)
//! - the last error on a watch channel, plus every stored error on a broadcast

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use futures::{StreamExt, future, stream::BoxStream};
use hublink_core::{ClientError, ConnectionState};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

const EVENT_CAPACITY: usize = 64;

/// Log target of accepted transitions.
pub const STATE_TARGET: &str = "hublink::state";

/// A transition request.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Starting,
    Stopping,
    Stopped,
    Connecting,
    Reconnecting,
    Connected,
    Error(ClientError),
    RetryBackoff(ClientError),
}

impl Transition {
    /// State this request asks to enter.
    #[must_use]
    pub const fn target(&self) -> ConnectionState {
        match self {
            Self::Starting => ConnectionState::Starting,
            Self::Stopping => ConnectionState::Stopping,
            Self::Stopped => ConnectionState::Stopped,
            Self::Connecting => ConnectionState::Connecting,
            Self::Reconnecting => ConnectionState::Reconnecting,
            Self::Connected => ConnectionState::Connected,
            Self::Error(_) => ConnectionState::Error,
            Self::RetryBackoff(_) => ConnectionState::RetryBackoff,
        }
    }
}

/// What an accepted transition does to the held error.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorEffect {
    Keep,
    Store(ClientError),
    Clear,
}

/// Look up `request` in the transition table for `state`.
///
/// # Errors
/// Returns `ClientError::InvalidOperation` when `state` does not accept the request.
pub fn transition(
    state: ConnectionState,
    request: Transition,
) -> Result<(ConnectionState, ErrorEffect), ClientError> {
    use ConnectionState as S;
    use Transition as T;

    let to = request.target();
    let effect = match (state, request) {
        (S::Stopped | S::Error, T::Starting)
        | (S::Starting | S::Reconnecting, T::Connecting)
        | (S::Connecting, T::Connected)
        | (S::Connecting | S::Connected | S::Reconnecting, T::Stopping)
        | (S::Stopping, T::Stopped) => ErrorEffect::Keep,

        (S::Connecting | S::Connected | S::Reconnecting | S::RetryBackoff, T::Error(error))
        | (S::Connecting, T::RetryBackoff(error)) => ErrorEffect::Store(error),

        // Error -> RetryBackoff drops the incoming error and clears the held one.
        (S::Error, T::Connecting | T::Reconnecting | T::Stopping | T::RetryBackoff(_))
        | (S::RetryBackoff, T::Connecting | T::Reconnecting | T::Stopping) => ErrorEffect::Clear,

        (from, _) => return Err(ClientError::InvalidOperation { from, to }),
    };
    Ok((to, effect))
}

/// Connection state holder and notifier.
pub struct StateMachine {
    // Serializes transitions so the three channels stay consistent.
    guard: Mutex<()>,
    state_tx: watch::Sender<ConnectionState>,
    entered_tx: broadcast::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<ClientError>>,
    raised_tx: broadcast::Sender<ClientError>,
    tracing: AtomicBool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a machine in the `Stopped` state.
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Stopped);
        let (entered_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (error_tx, _) = watch::channel(None);
        let (raised_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            guard: Mutex::new(()),
            state_tx,
            entered_tx,
            error_tx,
            raised_tx,
            tracing: AtomicBool::new(false),
        }
    }

    /// Trace accepted transitions under [`STATE_TARGET`].
    pub fn set_tracing(&self, enabled: bool) {
        self.tracing.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<ClientError> {
        self.error_tx.borrow().clone()
    }

    /// Apply a transition request. Returns the state that was left.
    ///
    /// # Errors
    /// Returns `ClientError::InvalidOperation` if the current state does not
    /// accept the request; nothing is published in that case.
    pub fn request(&self, request: Transition) -> Result<ConnectionState, ClientError> {
        let _guard = self.lock();
        let from = self.state();
        let (to, effect) = transition(from, request)?;
        if self.tracing.load(Ordering::Relaxed) {
            tracing::trace!(target: STATE_TARGET, "{from} -> {to}");
        }

        self.state_tx.send_replace(to);
        match effect {
            ErrorEffect::Keep => {}
            ErrorEffect::Store(error) => {
                self.error_tx.send_replace(Some(error.clone()));
                let _ = self.raised_tx.send(error);
            }
            ErrorEffect::Clear => {
                self.error_tx.send_replace(None);
            }
        }
        let _ = self.entered_tx.send(to);

        Ok(from)
    }

    /// Drop the held error without changing state.
    pub fn clear_error(&self) {
        let _guard = self.lock();
        self.error_tx.send_if_modified(|error| error.take().is_some());
    }

    /// Receiver for the current state; starts with the current value.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Receiver for state entries from now on.
    #[must_use]
    pub fn subscribe_entries(&self) -> broadcast::Receiver<ConnectionState> {
        self.entered_tx.subscribe()
    }

    /// State changes, replaying the current state first.
    #[must_use]
    pub fn state_changes(&self) -> BoxStream<'static, ConnectionState> {
        WatchStream::new(self.subscribe_state()).boxed()
    }

    /// Emits every time `state` is entered.
    #[must_use]
    pub fn entered(&self, state: ConnectionState) -> BoxStream<'static, ConnectionState> {
        BroadcastStream::new(self.subscribe_entries())
            .filter_map(move |entry| future::ready(entry.ok().filter(|s| *s == state)))
            .boxed()
    }

    /// Held error (if any), then every error stored from now on.
    #[must_use]
    pub fn errors(&self) -> BoxStream<'static, ClientError> {
        let live = BroadcastStream::new(self.raised_tx.subscribe())
            .filter_map(|error| future::ready(error.ok()));
        let held = futures::stream::iter(self.last_error());
        held.chain(live).boxed()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
