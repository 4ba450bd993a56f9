//! The query service: admission, execution and teardown around the query
//! transport core.
//!
//! A [`Dispatcher`] owns nothing itself. Everything shared across requests
//! lives in the [`ServiceContext`] built at startup, including the pluggable
//! collaborators ([`Executor`], [`Throttler`], [`AuditSink`],
//! [`MetricsRecorder`], [`RequestRegistry`]).

pub mod admin;
mod admission;
mod audit;
mod context;
mod dispatcher;
mod executor;
mod literal;
mod metrics;
mod pool;
mod registry;
mod servicer;
mod throttle;

pub(crate) const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

pub use self::admission::{Lane, Lifecycle, Phase};
pub use self::audit::{AuditRecord, AuditSink, TracingAuditSink};
pub use self::context::{ServiceContext, ServiceContextBuilder, Settings};
pub(crate) use self::dispatcher::Submission;
pub use self::dispatcher::Dispatcher;
pub use self::executor::{Execution, ExecutionContext, ExecutionOutput, Executor};
pub use self::literal::LiteralExecutor;
pub use self::metrics::{MetricsRecorder, RequestCounters, RequestSummary};
pub use self::pool::{SubmitError, WorkerPool};
pub use self::registry::{ActiveRequests, RequestRegistry};
pub use self::throttle::Throttler;

#[cfg(test)]
pub(crate) use self::executor::MockExecutor;
#[cfg(test)]
pub(crate) use self::throttle::MockThrottler;
#[cfg(test)]
pub(crate) use self::audit::MockAuditSink;
