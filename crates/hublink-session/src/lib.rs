//! Connection state machine and session orchestration.
//!
//! Provides:
//! - `StateMachine` - Table-driven connection lifecycle automaton
//! - `RetryPolicy` - Bounded fixed-delay retry for transport starts
//! - `SubscriptionRegistry` - Event handlers replayed onto every connection
//! - `ConnectionOrchestrator` - Drives a session through connect, retry and auto-reconnect

pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod state_machine;

pub use orchestrator::ConnectionOrchestrator;
pub use registry::SubscriptionRegistry;
pub use retry::RetryPolicy;
pub use state_machine::{ErrorEffect, StateMachine, Transition};
