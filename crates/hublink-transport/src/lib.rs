//! Transport connections for hublink.
//!
//! Provides:
//! - `MemoryHub` - In-process hub with fault injection, for tests and demos

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::{Call, MemoryConnection, MemoryHub};
