//! High-level hublink clients.
//!
//! Provides:
//! - `interceptors` - Layers wrapped around a `RealtimeClient` (logging,
//!   authorization, exception unwrapping, user-facing errors)
//! - `ClientFactory` - Builds an orchestrator wrapped in the standard chain
//! - `SimpleClient` - Starts its session lazily on first use
//! - `LogTracer` - Streams remote log entries into `tracing`

pub mod factory;
pub mod interceptors;
pub mod simple;
pub mod tracer;

pub use factory::ClientFactory;
pub use interceptors::{
    AuthorizationInterceptor, ExceptionUnwrapInterceptor, Intercepted, Interceptor,
    InterceptorChain, Localizer, LoggingInterceptor, Notifier, SessionExpiry,
    UserFriendlyInterceptor,
};
pub use simple::SimpleClient;
pub use tracer::{LogTracer, MemoryOffsetStore, OffsetStore, TracerError};
