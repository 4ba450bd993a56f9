//! The explicitly constructed service context.
//!
//! Everything a request needs beyond its own state lives here and is built
//! once during bootstrap: pools, the registry, the admission queues and the
//! pluggable collaborators.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tributary_config::Config;

use crate::query::{
    BufferPool, CasMismatchPolicy, PreparedCache, PreparedStatements, RequestPool,
    ResponseDefaults, RetryPolicy,
};

use super::SERVICE_TARGET;
use super::admission::{AdmissionQueues, Lifecycle};
use super::audit::{AuditSink, TracingAuditSink};
use super::executor::Executor;
use super::literal::LiteralExecutor;
use super::metrics::{MetricsRecorder, RequestCounters};
use super::registry::{ActiveRequests, RequestRegistry};
use super::servicer::Servicer;
use super::throttle::Throttler;

const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Tunables derived from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Flush threshold of the buffered writer, in bytes.
    pub buffer_capacity: usize,
    /// Time-based flush threshold.
    pub flush_interval: Duration,
    /// Workers of the unbounded queue.
    pub servicers: usize,
    /// Workers of the plus queue.
    pub plus_servicers: usize,
    /// Backlog of each queue.
    pub queue_capacity: usize,
    /// Timeout applied when a request sets none.
    pub request_timeout: Option<Duration>,
    /// Cap on request bodies.
    pub max_request_bytes: usize,
    /// Drain window granted on shutdown.
    pub shutdown_grace: Duration,
    /// Defaults for the response toggles.
    pub defaults: ResponseDefaults,
}

impl Settings {
    /// Extracts the service tunables from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            buffer_capacity: config.buffer_capacity,
            flush_interval: config.flush_interval(),
            servicers: config.servicers,
            plus_servicers: config.plus_servicers,
            queue_capacity: config.queue_capacity,
            request_timeout: config.request_timeout(),
            max_request_bytes: config.max_request_bytes,
            shutdown_grace: config.shutdown_grace(),
            defaults: ResponseDefaults {
                metrics: config.metrics,
                signature: config.signature,
                pretty: config.pretty,
                controls: false,
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shared state and collaborators of the query service.
pub struct ServiceContext {
    settings: Settings,
    buffers: Arc<BufferPool>,
    requests: RequestPool,
    registry: Arc<dyn RequestRegistry>,
    queues: AdmissionQueues,
    servicer: Arc<Servicer>,
    prepareds: Arc<dyn PreparedCache>,
    throttler: Option<Arc<dyn Throttler>>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsRecorder>,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ServiceContext")
            .field("settings", &self.settings)
            .field("phase", &self.lifecycle.phase())
            .field("active", &self.registry.count())
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    /// Starts building a context with `settings`.
    #[must_use]
    pub fn builder(settings: Settings) -> ServiceContextBuilder {
        ServiceContextBuilder {
            settings,
            executor: None,
            prepareds: None,
            throttler: None,
            audit: None,
            metrics: None,
            registry: None,
            policy: None,
        }
    }

    /// Service tunables.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Active-request registry.
    #[must_use]
    pub fn registry(&self) -> &dyn RequestRegistry {
        self.registry.as_ref()
    }

    /// Metrics recorder.
    #[must_use]
    pub fn metrics(&self) -> &dyn MetricsRecorder {
        self.metrics.as_ref()
    }

    /// Prepared-statement cache.
    #[must_use]
    pub fn prepareds(&self) -> &dyn PreparedCache {
        self.prepareds.as_ref()
    }

    /// Service lifecycle flag.
    #[must_use]
    pub const fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Process-wide response buffer pool.
    #[must_use]
    pub const fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffers
    }

    pub(crate) const fn request_pool(&self) -> &RequestPool {
        &self.requests
    }

    pub(crate) const fn queues(&self) -> &AdmissionQueues {
        &self.queues
    }

    pub(crate) const fn servicer(&self) -> &Arc<Servicer> {
        &self.servicer
    }

    pub(crate) fn throttler(&self) -> Option<&dyn Throttler> {
        self.throttler.as_deref()
    }

    pub(crate) fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    pub(crate) fn retry_policy(&self) -> &dyn RetryPolicy {
        self.servicer.policy()
    }

    /// Stops admitting new work and waits up to the configured grace period
    /// for active requests to finish. Returns true when the registry
    /// drained in time.
    pub fn drain(&self) -> bool {
        self.lifecycle.begin_shutdown();
        let deadline = Instant::now() + self.settings.shutdown_grace;
        let drained = loop {
            let active = self.registry.count();
            if active == 0 {
                break true;
            }
            if Instant::now() >= deadline {
                warn!(target: SERVICE_TARGET, active, "shutdown grace period elapsed");
                break false;
            }
            thread::sleep(DRAIN_POLL);
        };
        self.lifecycle.finish_shutdown();
        info!(target: SERVICE_TARGET, drained, "service stopped admitting requests");
        drained
    }

    /// Joins the admission workers after letting queued jobs finish.
    pub fn shutdown(&self) {
        self.lifecycle.finish_shutdown();
        self.queues.shutdown();
    }
}

/// Builder for [`ServiceContext`]; unset collaborators get the in-process
/// defaults.
pub struct ServiceContextBuilder {
    settings: Settings,
    executor: Option<Arc<dyn Executor>>,
    prepareds: Option<Arc<dyn PreparedCache>>,
    throttler: Option<Arc<dyn Throttler>>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    registry: Option<Arc<dyn RequestRegistry>>,
    policy: Option<Arc<dyn RetryPolicy>>,
}

impl ServiceContextBuilder {
    /// Replaces the built-in [`LiteralExecutor`].
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replaces the in-memory prepared-statement cache.
    #[must_use]
    pub fn prepared_cache(mut self, prepareds: Arc<dyn PreparedCache>) -> Self {
        self.prepareds = Some(prepareds);
        self
    }

    /// Enables tenant throttling.
    #[must_use]
    pub fn throttler(mut self, throttler: Arc<dyn Throttler>) -> Self {
        self.throttler = Some(throttler);
        self
    }

    /// Replaces the `tracing` audit sink.
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Replaces the atomic request counters.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replaces the in-memory registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn RequestRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the CAS-mismatch retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Spawns the worker pools and assembles the context.
    ///
    /// # Errors
    ///
    /// Returns the spawn error when a worker thread cannot be started.
    pub fn build(self) -> io::Result<ServiceContext> {
        let settings = self.settings;
        let executor: Arc<dyn Executor> = match self.executor {
            Some(executor) => executor,
            None => Arc::new(LiteralExecutor::new(
                settings.servicers + settings.plus_servicers,
                settings.queue_capacity,
            )?),
        };
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(CasMismatchPolicy));
        let queues = AdmissionQueues::new(
            settings.servicers,
            settings.plus_servicers,
            settings.queue_capacity,
        )?;
        Ok(ServiceContext {
            buffers: Arc::new(BufferPool::new(settings.buffer_capacity)),
            requests: RequestPool::new(settings.servicers + settings.plus_servicers),
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(ActiveRequests::new())),
            queues,
            servicer: Arc::new(Servicer::new(executor, policy, settings.flush_interval)),
            prepareds: self
                .prepareds
                .unwrap_or_else(|| Arc::new(PreparedStatements::new())),
            throttler: self.throttler,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(RequestCounters::new())),
            lifecycle: Lifecycle::default(),
            settings,
        })
    }
}
