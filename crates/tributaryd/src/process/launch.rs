//! Supervises service launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::{debug, info};

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::HealthReporter;
use crate::service::Dispatcher;
use crate::transport::{QueryConnectionHandler, SocketListener};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Service dependencies required to construct the runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
}

/// Collaborators required to launch the service runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) services: ServiceDeps<L>,
    pub(crate) shutdown: S,
}

/// Runs the service using the production collaborators until a
/// termination signal arrives.
///
/// # Errors
///
/// Returns a [`LaunchError`] when bootstrap, binding the listener, or
/// installing the signal handlers fails.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
        },
        shutdown: SystemShutdownSignal::new(),
    };
    run_daemon_with(plan)
}

/// Runs the service with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan { services, shutdown } = plan;
    let ServiceDeps { loader, reporter } = services;

    info!(target: PROCESS_TARGET, "starting query service runtime");
    let service = bootstrap_with(&loader, Arc::clone(&reporter))?;
    let context = Arc::clone(service.context());

    let listener = match SocketListener::bind(service.config().listen()) {
        Ok(listener) => listener,
        Err(error) => {
            context.shutdown();
            return Err(error.into());
        }
    };
    let handler = Arc::new(QueryConnectionHandler::new(Dispatcher::new(Arc::clone(
        &context,
    ))));
    let listener_handle = match listener.start(handler) {
        Ok(handle) => handle,
        Err(error) => {
            context.shutdown();
            return Err(error.into());
        }
    };
    reporter.service_ready(service.config().listen());

    let waited = shutdown.wait();
    reporter.shutdown_started();
    let drained = context.drain();
    listener_handle.shutdown();
    debug!(
        target: PROCESS_TARGET,
        open_connections = listener_handle.open_connections(),
        "listener stopping"
    );
    let joined = listener_handle.join();
    context.shutdown();
    reporter.shutdown_completed(drained);
    waited?;
    joined?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
