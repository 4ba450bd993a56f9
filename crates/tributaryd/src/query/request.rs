//! The per-submission request object and its pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use serde_json::Value;
use uuid::Uuid;

use super::args::{Profile, QueryParams};
use super::errors::QueryError;
use super::media::MediaType;
use super::state::State;
use super::writer::BufferedWriter;

/// Server-side defaults for the response toggles a client may leave unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseDefaults {
    /// Emit `metrics`.
    pub metrics: bool,
    /// Emit `signature`.
    pub signature: bool,
    /// Indent the envelope.
    pub pretty: bool,
    /// Emit `controls`.
    pub controls: bool,
}

impl Default for ResponseDefaults {
    fn default() -> Self {
        Self {
            metrics: true,
            signature: true,
            pretty: false,
            controls: false,
        }
    }
}

/// Response toggles after resolving the request against the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseOptions {
    /// Emit `metrics`.
    pub metrics: bool,
    /// Emit `signature`.
    pub signature: bool,
    /// Indent the envelope.
    pub pretty: bool,
    /// Emit `controls`.
    pub controls: bool,
    /// Emit `profile`.
    pub profile: Profile,
}

impl ResponseOptions {
    fn resolve(params: &QueryParams, defaults: ResponseDefaults) -> Self {
        Self {
            metrics: params.metrics.resolve(defaults.metrics),
            signature: params.signature.resolve(defaults.signature),
            pretty: params.pretty.resolve(defaults.pretty),
            controls: params.controls.resolve(defaults.controls),
            profile: params.profile,
        }
    }
}

/// Values the executor reports alongside rows.
#[derive(Debug, Default)]
struct Reported {
    profile: Option<Value>,
    billing_units: Option<Value>,
    refunded_units: Option<Value>,
    transaction_start: Option<Instant>,
}

/// One query submission.
///
/// Fields that change while the request is shared between the connection
/// worker, the servicer and the executor use interior mutability; the rest
/// is fixed before the request is shared.
pub struct Request {
    id: String,
    params: QueryParams,
    options: ResponseOptions,
    media: MediaType,
    tenant: Option<String>,
    throttle_wait: Duration,
    timeout: Option<Duration>,
    writer: Option<Arc<BufferedWriter>>,
    request_time: Instant,
    service_time: Mutex<Option<Instant>>,
    state: Mutex<State>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    torn_down: AtomicBool,
    result_count: AtomicU64,
    result_size: AtomicU64,
    mutation_count: AtomicU64,
    errors: Mutex<Vec<QueryError>>,
    warnings: Mutex<Vec<QueryError>>,
    reported: Mutex<Reported>,
}

impl Default for Request {
    fn default() -> Self {
        let (stop_tx, stop_rx) = channel::bounded(0);
        Self {
            id: Uuid::new_v4().to_string(),
            params: QueryParams::default(),
            options: ResponseOptions::default(),
            media: MediaType::default(),
            tenant: None,
            throttle_wait: Duration::ZERO,
            timeout: None,
            writer: None,
            request_time: Instant::now(),
            service_time: Mutex::new(None),
            state: Mutex::new(State::Submitted),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            torn_down: AtomicBool::new(false),
            result_count: AtomicU64::new(0),
            result_size: AtomicU64::new(0),
            mutation_count: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
            reported: Mutex::new(Reported::default()),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Request")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("result_count", &self.result_count())
            .finish_non_exhaustive()
    }
}

impl Request {
    /// Clears every field so the object can serve a new submission.
    ///
    /// Accumulated lists keep their allocation but lose their contents.
    pub(crate) fn reset(&mut self) {
        let (stop_tx, stop_rx) = channel::bounded(0);
        self.id = Uuid::new_v4().to_string();
        self.params = QueryParams::default();
        self.options = ResponseOptions::default();
        self.media = MediaType::default();
        self.tenant = None;
        self.throttle_wait = Duration::ZERO;
        self.timeout = None;
        self.writer = None;
        self.request_time = Instant::now();
        *self.service_time.get_mut().unwrap_or_else(PoisonError::into_inner) = None;
        *self.state.get_mut().unwrap_or_else(PoisonError::into_inner) = State::Submitted;
        *self.stop_tx.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(stop_tx);
        self.stop_rx = stop_rx;
        *self.torn_down.get_mut() = false;
        *self.result_count.get_mut() = 0;
        *self.result_size.get_mut() = 0;
        *self.mutation_count.get_mut() = 0;
        self.errors.get_mut().unwrap_or_else(PoisonError::into_inner).clear();
        self.warnings.get_mut().unwrap_or_else(PoisonError::into_inner).clear();
        *self.reported.get_mut().unwrap_or_else(PoisonError::into_inner) = Reported::default();
    }

    /// Attaches the response writer and negotiated media type.
    pub(crate) fn attach(&mut self, writer: Arc<BufferedWriter>, media: MediaType) {
        self.writer = Some(writer);
        self.media = media;
    }

    /// Installs extracted parameters and resolves the response toggles.
    ///
    /// `server_timeout` applies when the client supplied none.
    pub(crate) fn set_params(
        &mut self,
        params: QueryParams,
        defaults: ResponseDefaults,
        server_timeout: Option<Duration>,
    ) {
        self.options = ResponseOptions::resolve(&params, defaults);
        self.timeout = params.timeout.or(server_timeout);
        self.tenant = params
            .credentials
            .first()
            .map(|credential| credential.user().to_owned());
        self.params = params;
    }

    pub(crate) fn set_throttle_wait(&mut self, wait: Duration) {
        self.throttle_wait = wait;
    }

    /// Unique request id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Extracted parameters.
    #[must_use]
    pub const fn params(&self) -> &QueryParams {
        &self.params
    }

    /// Resolved response toggles.
    #[must_use]
    pub const fn options(&self) -> ResponseOptions {
        self.options
    }

    /// Negotiated response media type.
    #[must_use]
    pub const fn media(&self) -> MediaType {
        self.media
    }

    /// Tenant the request is accounted to.
    #[must_use]
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    /// Time spent waiting on the throttler.
    #[must_use]
    pub const fn throttle_wait(&self) -> Duration {
        self.throttle_wait
    }

    /// Effective timeout: the client's, else the server default.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The response writer, once attached.
    #[must_use]
    pub fn writer(&self) -> Option<&Arc<BufferedWriter>> {
        self.writer.as_ref()
    }

    /// When the request arrived.
    #[must_use]
    pub const fn request_time(&self) -> Instant {
        self.request_time
    }

    /// When a servicer picked the request up.
    #[must_use]
    pub fn service_time(&self) -> Option<Instant> {
        *lock(&self.service_time)
    }

    /// Time since arrival.
    #[must_use]
    pub fn elapsed_time(&self) -> Duration {
        self.request_time.elapsed()
    }

    /// Time since a servicer picked the request up.
    #[must_use]
    pub fn execution_time(&self) -> Duration {
        self.service_time()
            .map_or(Duration::ZERO, |started| started.elapsed())
    }

    /// Time since the enclosing transaction started, when reported.
    #[must_use]
    pub fn transaction_elapsed_time(&self) -> Option<Duration> {
        lock(&self.reported)
            .transaction_start
            .map(|started| started.elapsed())
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        *lock(&self.state)
    }

    /// True once the request reached a terminal state.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.state().is_terminal()
    }

    /// Label for the `status` field.
    #[must_use]
    pub fn status_label(&self) -> &'static str {
        self.state().label(self.error_count() > 0)
    }

    /// Moves a submitted request to running and stamps its service time.
    /// Returns false when the request was already halted.
    pub fn start(&self) -> bool {
        let mut state = lock(&self.state);
        if *state != State::Submitted {
            return false;
        }
        *state = State::Running;
        *lock(&self.service_time) = Some(Instant::now());
        true
    }

    /// Records a terminal state. Only the first caller succeeds; it also
    /// broadcasts the stop signal to everything watching
    /// [`Self::stop_signal`].
    pub fn stop(&self, terminal: State) -> bool {
        self.stop_with(terminal, None)
    }

    /// Records a terminal state together with the error that caused it.
    ///
    /// The error lands in the error list before the stop signal fires, so
    /// anything woken by [`Self::stop_signal`] already sees it.
    pub fn stop_with(&self, terminal: State, cause: Option<QueryError>) -> bool {
        debug_assert!(terminal.is_terminal(), "{terminal} is not terminal");
        let mut state = lock(&self.state);
        if state.is_terminal() {
            return false;
        }
        *state = terminal;
        if let Some(error) = cause {
            let status = error.http_status();
            let mut errors = lock(&self.errors);
            errors.push(error);
            if errors.len() == 1 {
                self.set_status(status);
            }
        }
        drop(lock(&self.stop_tx).take());
        true
    }

    /// Receiver that disconnects once the request stops.
    #[must_use]
    pub fn stop_signal(&self) -> Receiver<()> {
        self.stop_rx.clone()
    }

    /// Records an execution error. The first error decides the HTTP status
    /// unless the request already failed fatally.
    pub fn error(&self, error: QueryError) {
        let status = error.http_status();
        let fatal = self.state() == State::Fatal;
        let mut errors = lock(&self.errors);
        errors.push(error);
        if errors.len() == 1 && !fatal {
            self.set_status(status);
        }
    }

    /// Records an unrecoverable error and stops the request as fatal.
    pub fn fail(&self, error: QueryError) {
        let status = error.http_status();
        lock(&self.errors).push(error);
        if self.stop(State::Fatal) {
            self.set_status(status);
        }
    }

    /// Stops the request on deadline and records the timeout error.
    pub fn expire(&self, limit: Duration) -> bool {
        self.stop_with(State::Timeout, Some(QueryError::timeout(limit)))
    }

    /// Records a warning.
    pub fn warning(&self, warning: QueryError) {
        lock(&self.warnings).push(warning);
    }

    /// Snapshot of the recorded errors.
    #[must_use]
    pub fn errors(&self) -> Vec<QueryError> {
        lock(&self.errors).clone()
    }

    /// Snapshot of the recorded warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<QueryError> {
        lock(&self.warnings).clone()
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn error_count(&self) -> usize {
        lock(&self.errors).len()
    }

    /// Number of recorded warnings.
    #[must_use]
    pub fn warning_count(&self) -> usize {
        lock(&self.warnings).len()
    }

    pub(crate) fn add_result(&self, size: usize) {
        self.result_count.fetch_add(1, Ordering::Relaxed);
        self.result_size
            .fetch_add(u64::try_from(size).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Rows written so far.
    #[must_use]
    pub fn result_count(&self) -> u64 {
        self.result_count.load(Ordering::Relaxed)
    }

    /// Encoded bytes of the rows written so far.
    #[must_use]
    pub fn result_size(&self) -> u64 {
        self.result_size.load(Ordering::Relaxed)
    }

    /// Adds to the mutation counter.
    pub fn add_mutations(&self, count: u64) {
        self.mutation_count.fetch_add(count, Ordering::Relaxed);
    }

    /// Mutations performed.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.mutation_count.load(Ordering::Relaxed)
    }

    /// Stores the executor's profile.
    pub fn set_profile(&self, profile: Value) {
        lock(&self.reported).profile = Some(profile);
    }

    /// The executor's profile, if reported.
    #[must_use]
    pub fn profile(&self) -> Option<Value> {
        lock(&self.reported).profile.clone()
    }

    /// Stores billed and refunded units.
    pub fn set_units(&self, billing: Option<Value>, refunded: Option<Value>) {
        let mut reported = lock(&self.reported);
        reported.billing_units = billing;
        reported.refunded_units = refunded;
    }

    /// Billed and refunded units, if reported.
    #[must_use]
    pub fn units(&self) -> (Option<Value>, Option<Value>) {
        let reported = lock(&self.reported);
        (reported.billing_units.clone(), reported.refunded_units.clone())
    }

    /// Records when the enclosing transaction started.
    pub fn set_transaction_start(&self, started: Instant) {
        lock(&self.reported).transaction_start = Some(started);
    }

    /// Claims end-of-request bookkeeping. Only the first caller gets true.
    pub(crate) fn claim_teardown(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    fn set_status(&self, status: u16) {
        if let Some(writer) = &self.writer {
            writer.set_status(status);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Free-list of request objects.
#[derive(Debug)]
pub struct RequestPool {
    free: Mutex<Vec<Request>>,
    limit: usize,
}

impl RequestPool {
    /// Creates a pool that parks at most `limit` idle requests.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            limit,
        }
    }

    /// Takes a freshly reset request.
    pub fn take(&self) -> Request {
        let pooled = lock(&self.free).pop();
        pooled.map_or_else(Request::default, |mut request| {
            request.reset();
            request
        })
    }

    /// Returns a request once no other holder remains. Requests still shared
    /// elsewhere are dropped by their last holder instead. Returned requests
    /// are reset at once so they stop pinning their writer and connection.
    pub fn give_back(&self, request: Arc<Request>) {
        let Ok(mut request) = Arc::try_unwrap(request) else {
            return;
        };
        request.reset();
        let mut free = lock(&self.free);
        if free.len() < self.limit {
            free.push(request);
        }
    }

    /// Idle requests parked in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        lock(&self.free).len()
    }
}
