use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port of the query service.
pub const DEFAULT_PORT: u16 = 8093;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default flush threshold of the buffered response writer, in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// Default time-based flush threshold, in milliseconds.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;

/// Default worker count for each admission queue.
pub const DEFAULT_SERVICERS: usize = 16;

/// Default backlog of each admission queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default cap on request bodies.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1 << 20;

/// Default time shutdown waits for active requests to drain, in milliseconds.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 30_000;

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Loopback listener on the default query port.
#[must_use]
pub fn default_listen_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", DEFAULT_PORT)
}

/// See [`DEFAULT_BUFFER_CAPACITY`].
#[must_use]
pub fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

/// See [`DEFAULT_FLUSH_INTERVAL_MS`].
#[must_use]
pub fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

/// See [`DEFAULT_SERVICERS`].
#[must_use]
pub fn default_servicers() -> usize {
    DEFAULT_SERVICERS
}

/// See [`DEFAULT_QUEUE_CAPACITY`].
#[must_use]
pub fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// See [`DEFAULT_MAX_REQUEST_BYTES`].
#[must_use]
pub fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

/// See [`DEFAULT_SHUTDOWN_GRACE_MS`].
#[must_use]
pub fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

pub(crate) fn default_true() -> bool {
    true
}
