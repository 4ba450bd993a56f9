//! Request counters behind `/admin/vitals`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::query::duration::format_duration;
use crate::query::{Request, State};

/// Per-request figures handed to the metrics recorder at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSummary {
    /// Final state.
    pub state: State,
    /// Whether any error was recorded.
    pub has_errors: bool,
    /// Wall time from arrival to teardown.
    pub elapsed: Duration,
    /// Time spent waiting on the throttler.
    pub throttle_wait: Duration,
    /// Rows streamed.
    pub result_count: u64,
    /// Encoded row bytes streamed.
    pub result_size: u64,
    /// Mutations applied.
    pub mutation_count: u64,
}

impl RequestSummary {
    /// Summarises `request` as it stands now.
    #[must_use]
    pub fn of(request: &Request) -> Self {
        Self {
            state: request.state(),
            has_errors: request.error_count() > 0,
            elapsed: request.elapsed_time(),
            throttle_wait: request.throttle_wait(),
            result_count: request.result_count(),
            result_size: request.result_size(),
            mutation_count: request.mutation_count(),
        }
    }
}

/// Sink for per-request metrics.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsRecorder: Send + Sync {
    /// Accounts for one finished request.
    fn record(&self, summary: &RequestSummary);

    /// Current counters as a JSON object.
    fn vitals(&self) -> Value;
}

/// Lock-free counters; the default [`MetricsRecorder`].
#[derive(Debug)]
pub struct RequestCounters {
    started: Instant,
    requests: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    fatal: AtomicU64,
    timeouts: AtomicU64,
    stopped: AtomicU64,
    closed: AtomicU64,
    results: AtomicU64,
    result_bytes: AtomicU64,
    mutations: AtomicU64,
    elapsed_nanos: AtomicU64,
    throttle_nanos: AtomicU64,
}

impl Default for RequestCounters {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            fatal: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            stopped: AtomicU64::new(0),
            closed: AtomicU64::new(0),
            results: AtomicU64::new(0),
            result_bytes: AtomicU64::new(0),
            mutations: AtomicU64::new(0),
            elapsed_nanos: AtomicU64::new(0),
            throttle_nanos: AtomicU64::new(0),
        }
    }
}

impl RequestCounters {
    /// Counters starting at zero, with uptime measured from now.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn outcome(&self, summary: &RequestSummary) -> Option<&AtomicU64> {
        match summary.state {
            State::Completed if summary.has_errors => Some(&self.errors),
            State::Completed => Some(&self.successes),
            State::Fatal => Some(&self.fatal),
            State::Timeout => Some(&self.timeouts),
            State::Stopped => Some(&self.stopped),
            State::Closed => Some(&self.closed),
            State::Submitted | State::Running => None,
        }
    }
}

impl MetricsRecorder for RequestCounters {
    fn record(&self, summary: &RequestSummary) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if let Some(counter) = self.outcome(summary) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.results.fetch_add(summary.result_count, Ordering::Relaxed);
        self.result_bytes
            .fetch_add(summary.result_size, Ordering::Relaxed);
        self.mutations
            .fetch_add(summary.mutation_count, Ordering::Relaxed);
        self.elapsed_nanos
            .fetch_add(nanos(summary.elapsed), Ordering::Relaxed);
        self.throttle_nanos
            .fetch_add(nanos(summary.throttle_wait), Ordering::Relaxed);
    }

    fn vitals(&self) -> Value {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        json!({
            "uptime": format_duration(self.started.elapsed()),
            "requests.count": load(&self.requests),
            "requests.success": load(&self.successes),
            "requests.errors": load(&self.errors),
            "requests.fatal": load(&self.fatal),
            "requests.timeout": load(&self.timeouts),
            "requests.stopped": load(&self.stopped),
            "requests.closed": load(&self.closed),
            "result.count": load(&self.results),
            "result.size": load(&self.result_bytes),
            "mutation.count": load(&self.mutations),
            "request.time": format_duration(Duration::from_nanos(load(&self.elapsed_nanos))),
            "throttle.time": format_duration(Duration::from_nanos(load(&self.throttle_nanos))),
        })
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
