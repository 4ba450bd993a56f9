//! Query transport core for the tributary query service.
//!
//! The daemon accepts query requests over HTTP, validates and normalises
//! their parameters, schedules them onto bounded admission queues, and
//! streams the executor's rows back as one JSON envelope. The pieces are:
//!
//! - [`query`]: parameter extraction, the request lifecycle, the buffered
//!   response writer, and the envelope framer.
//! - [`service`]: the service context, admission queues, dispatcher and the
//!   collaborator seams (executor, throttler, audit, metrics).
//! - the transport (private): socket listener, HTTP framing and routes.
//!
//! The bootstrap sequence loads configuration through [`ConfigLoader`],
//! installs structured telemetry, and builds the [`service::ServiceContext`]
//! once; [`run_daemon`] then serves until a termination signal arrives and
//! drains active requests before exiting.
//!
//! ## Streaming and finalisation
//!
//! Rows are encoded into a pooled buffer that flushes on overflow or after
//! the configured interval. The first flush commits the HTTP status, so
//! failures after that point are reported inside the envelope. Exactly one
//! of the servicing worker and the request's own thread finalises the
//! response; the other backs off.

mod bootstrap;
mod health;
mod process;
pub mod query;
pub mod service;
pub mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Service, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
