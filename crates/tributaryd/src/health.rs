//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use tributary_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener accepts connections.
    fn service_ready(&self, endpoint: &SocketEndpoint);

    /// Invoked when a shutdown signal arrives.
    fn shutdown_started(&self);

    /// Invoked after the listener and workers stopped. `drained` is false
    /// when requests were still active at the end of the grace period.
    fn shutdown_completed(&self, drained: bool);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn service_ready(&self, endpoint: &SocketEndpoint) {
        (**self).service_ready(endpoint);
    }

    fn shutdown_started(&self) {
        (**self).shutdown_started();
    }

    fn shutdown_completed(&self, drained: bool) {
        (**self).shutdown_completed(drained);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting query service bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            servicers = config.servicers,
            plus_servicers = config.plus_servicers,
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "query service bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "query service bootstrap failed"
        );
    }

    fn service_ready(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_ready",
            endpoint = %endpoint,
            "query service accepting requests"
        );
    }

    fn shutdown_started(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            "query service shutting down"
        );
    }

    fn shutdown_completed(&self, drained: bool) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            drained,
            "query service stopped"
        );
    }
}
