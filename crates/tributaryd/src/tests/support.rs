//! Test harness utilities for the query service behavioural suite.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use serde_json::{Value, json};

use crate::query::args::{self, Payload};
use crate::query::test_utils::{NEVER, RecordingSink};
use crate::query::{PreparedStatements, QueryError, QueryParams};
use crate::service::{
    AuditRecord, Dispatcher, Execution, ExecutionContext, ExecutionOutput, Executor,
    ServiceContext, Settings, Submission,
};

/// How long a test executor waits for cancellation before giving up.
const CANCELLATION_WAIT: Duration = Duration::from_secs(5);

/// Executor that answers after a fixed delay unless cancelled first.
pub struct SleepingExecutor {
    delay: Duration,
}

impl SleepingExecutor {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Executor for SleepingExecutor {
    fn execute(
        &self,
        context: ExecutionContext,
        output: ExecutionOutput,
    ) -> Result<Execution, QueryError> {
        let delay = self.delay;
        thread::spawn(move || {
            let stop = context.stop_signal();
            if matches!(stop.recv_timeout(delay), Err(RecvTimeoutError::Timeout)) {
                output.send(Box::new(json!({ "$1": 1 })));
            }
            drop(context);
            drop(output);
        });
        Ok(Execution::default())
    }
}

/// Executor that streams a burst of rows, then holds the request open until
/// it is cancelled.
pub struct StreamingExecutor {
    burst: usize,
    streamed: Sender<()>,
    cancelled: Arc<AtomicBool>,
}

impl StreamingExecutor {
    /// Returns the executor with the receiver that fires once the burst was
    /// handed over.
    pub fn new(burst: usize) -> (Arc<Self>, Receiver<()>) {
        let (streamed, notified) = channel::bounded(1);
        let executor = Arc::new(Self {
            burst,
            streamed,
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        (executor, notified)
    }

    /// Waits until the executor saw the cancellation.
    pub fn wait_for_cancellation(&self) -> bool {
        let deadline = Instant::now() + CANCELLATION_WAIT;
        while Instant::now() < deadline {
            if self.cancelled.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl Executor for StreamingExecutor {
    fn execute(
        &self,
        context: ExecutionContext,
        output: ExecutionOutput,
    ) -> Result<Execution, QueryError> {
        let burst = self.burst;
        let streamed = self.streamed.clone();
        let cancelled = Arc::clone(&self.cancelled);
        thread::spawn(move || {
            for index in 0..burst {
                if !output.send(Box::new(json!({ "n": index }))) {
                    break;
                }
            }
            let _ = streamed.try_send(());
            let stop = context.stop_signal();
            if !matches!(stop.recv_timeout(CANCELLATION_WAIT), Err(RecvTimeoutError::Timeout)) {
                cancelled.store(true, Ordering::SeqCst);
            }
            drop(context);
            drop(output);
        });
        Ok(Execution {
            signature: Some(json!({ "n": "number" })),
        })
    }
}

/// Scenario world shared across BDD steps.
#[derive(Default)]
pub struct QueryWorld {
    dispatcher: Option<Dispatcher>,
    streaming: Option<(Arc<StreamingExecutor>, Receiver<()>)>,
    sink: RecordingSink,
    record: Option<AuditRecord>,
    extracted: Option<Result<QueryParams, QueryError>>,
}

impl QueryWorld {
    fn settings() -> Settings {
        Settings {
            servicers: 2,
            plus_servicers: 1,
            queue_capacity: 8,
            flush_interval: NEVER,
            ..Settings::default()
        }
    }

    /// Starts a service backed by `executor`, or the literal executor.
    pub fn start_service(&mut self, executor: Option<Arc<dyn Executor>>) {
        let mut builder = ServiceContext::builder(Self::settings());
        if let Some(executor) = executor {
            builder = builder.executor(executor);
        }
        let context = builder.build().expect("build service context");
        self.dispatcher = Some(Dispatcher::new(Arc::new(context)));
    }

    /// Starts a service whose executor streams `burst` rows.
    pub fn start_streaming_service(&mut self, burst: usize) {
        let (executor, notified) = StreamingExecutor::new(burst);
        self.start_service(Some(executor.clone()));
        self.streaming = Some((executor, notified));
    }

    fn dispatcher(&self) -> &Dispatcher {
        self.dispatcher
            .as_ref()
            .expect("a service should be started first")
    }

    fn serve(&mut self, payload: Payload<'_>, closed: &Receiver<()>) {
        let submission = Submission::new(payload, None);
        let record =
            self.dispatcher()
                .serve(&submission, Box::new(self.sink.clone()), closed);
        self.record = Some(record);
    }

    /// Serves a GET request with `query` as its URL query string.
    pub fn submit_form(&mut self, query: &str) {
        let query = encode_query(query);
        let payload = Payload {
            method: "GET",
            query: Some(&query),
            content_type: None,
            body: &[],
            authorization: None,
        };
        self.serve(payload, &channel::never());
    }

    /// Serves a POST request with a JSON body.
    pub fn post_json(&mut self, body: &str) {
        let payload = json_payload(body);
        self.serve(payload, &channel::never());
    }

    /// Serves a streaming request and disconnects once the executor handed
    /// over its burst of rows.
    pub fn disconnect_after_burst(&mut self) {
        let notified = self
            .streaming
            .as_ref()
            .map(|(_, notified)| notified.clone())
            .expect("a streaming service should be started first");
        let (closed_tx, closed_rx) = channel::bounded(1);
        let watcher = thread::spawn(move || {
            if notified.recv_timeout(CANCELLATION_WAIT).is_ok() {
                let _ = closed_tx.send(());
            }
        });
        self.serve(json_payload(r#"{"statement":"select stream"}"#), &closed_rx);
        watcher.join().expect("disconnect thread");
    }

    /// Runs parameter extraction alone.
    pub fn extract(&mut self, query: &str) {
        let query = encode_query(query);
        let payload = Payload {
            method: "GET",
            query: Some(&query),
            content_type: None,
            body: &[],
            authorization: None,
        };
        self.extracted = Some(args::extract(&payload, &PreparedStatements::default()));
    }

    pub fn record(&self) -> &AuditRecord {
        self.record.as_ref().expect("a request should have been served")
    }

    pub fn http_status(&self) -> Option<u16> {
        self.sink.snapshot(|recorded| recorded.head.map(|(status, _)| status))
    }

    pub fn body(&self) -> Value {
        self.sink.body_json()
    }

    pub fn extracted(&self) -> &QueryParams {
        match self.extracted.as_ref() {
            Some(Ok(params)) => params,
            Some(Err(error)) => panic!("extraction failed: {error}"),
            None => panic!("parameters were not extracted"),
        }
    }

    pub fn streaming_executor(&self) -> &StreamingExecutor {
        self.streaming
            .as_ref()
            .map(|(executor, _)| executor.as_ref())
            .expect("a streaming service should be started first")
    }
}

impl Drop for QueryWorld {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.context().shutdown();
        }
    }
}

fn json_payload(body: &str) -> Payload<'_> {
    Payload {
        method: "POST",
        query: None,
        content_type: Some("application/json"),
        body: body.as_bytes(),
        authorization: None,
    }
}

/// URL-encodes the values of a readable `a=b&c=d` query.
fn encode_query(raw: &str) -> String {
    let mut encoder = url::form_urlencoded::Serializer::new(String::new());
    for pair in raw.split('&') {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        encoder.append_pair(name, value);
    }
    encoder.finish()
}
