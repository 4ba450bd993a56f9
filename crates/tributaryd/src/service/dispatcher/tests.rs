//! Unit tests for request dispatch.

use std::sync::Mutex;
use std::time::Duration;

use crossbeam::channel;
use mockall::predicate::always;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;
use crate::query::test_utils::{NEVER, RecordingSink};
use crate::query::{ErrorCode, Prepared};
use crate::service::context::{ServiceContextBuilder, Settings};
use crate::service::{ActiveRequests, RequestRegistry};
use crate::service::{Execution, MockAuditSink, MockExecutor, MockThrottler};

#[fixture]
fn settings() -> Settings {
    Settings {
        servicers: 2,
        plus_servicers: 1,
        queue_capacity: 8,
        flush_interval: NEVER,
        ..Settings::default()
    }
}

fn dispatcher(builder: ServiceContextBuilder) -> Dispatcher {
    Dispatcher::new(Arc::new(builder.build().expect("build context")))
}

fn post_json(body: &str) -> Submission<'_> {
    Submission::new(
        Payload {
            method: "POST",
            query: None,
            content_type: Some("application/json"),
            body: body.as_bytes(),
            authorization: None,
        },
        None,
    )
}

fn serve(dispatcher: &Dispatcher, submission: &Submission<'_>) -> (AuditRecord, RecordingSink) {
    let sink = RecordingSink::default();
    let record = dispatcher.serve(submission, Box::new(sink.clone()), &channel::never());
    (record, sink)
}

fn error_codes(body: &Value) -> Vec<u64> {
    body["errors"]
        .as_array()
        .map(|errors| errors.iter().filter_map(|error| error["code"].as_u64()).collect())
        .unwrap_or_default()
}

#[rstest]
fn literal_select_completes_with_one_row(settings: Settings) {
    let dispatcher = dispatcher(ServiceContext::builder(settings));
    let (record, sink) = serve(&dispatcher, &post_json(r#"{"statement":"select 1"}"#));

    let body = sink.body_json();
    assert_eq!(body["results"], json!([{"$1": 1}]));
    assert_eq!(body["status"], json!("success"));
    assert_eq!(body["signature"], json!({"$1": "number"}));
    assert_eq!(body["metrics"]["resultCount"], json!(1));
    assert_eq!(sink.snapshot(|r| r.head.map(|(status, _)| status)), Some(200));
    assert_eq!(record.status, "success");
    assert_eq!(record.result_count, 1);
}

#[rstest]
fn unknown_prepared_fails_without_results(settings: Settings) {
    let dispatcher = dispatcher(ServiceContext::builder(settings));
    let (record, sink) = serve(&dispatcher, &post_json(r#"{"prepared":"p1"}"#));

    let body = sink.body_json();
    assert_eq!(error_codes(&body), vec![4040]);
    assert!(body.get("results").is_none());
    assert_eq!(sink.snapshot(|r| r.head.map(|(status, _)| status)), Some(404));
    assert_eq!(record.result_count, 0);
}

#[rstest]
fn cached_prepared_statement_executes_its_text(settings: Settings) {
    let dispatcher = dispatcher(ServiceContext::builder(settings));
    dispatcher
        .context()
        .prepareds()
        .add(Arc::new(Prepared::new("p1", "select \"cached\"")));

    let (_, sink) = serve(&dispatcher, &post_json(r#"{"prepared":"p1"}"#));
    let body = sink.body_json();
    assert_eq!(body["prepared"], json!("p1"));
    assert_eq!(body["results"], json!([{"$1": "cached"}]));
}

#[rstest]
fn deadline_times_out_a_slow_query(settings: Settings) {
    let dispatcher = dispatcher(ServiceContext::builder(settings));
    let (record, sink) = serve(
        &dispatcher,
        &post_json(r#"{"statement":"select sleep(1000)","timeout":"100ms"}"#),
    );

    let body = sink.body_json();
    assert_eq!(body["status"], json!("timeout"));
    assert_eq!(error_codes(&body), vec![1080]);
    assert_eq!(body["metrics"]["errorCount"], json!(1));
    assert_eq!(body["results"], json!([]));
    assert!(record.elapsed_time < Duration::from_millis(900));
}

#[rstest]
fn client_disconnect_closes_the_request(settings: Settings) {
    let dispatcher = dispatcher(ServiceContext::builder(settings));
    let (closed_tx, closed_rx) = channel::bounded(1);
    closed_tx.send(()).expect("queue disconnect");
    let sink = RecordingSink::default();

    let record = dispatcher.serve(
        &post_json(r#"{"statement":"select range(100000000)"}"#),
        Box::new(sink.clone()),
        &closed_rx,
    );

    assert_eq!(record.status, "closed");
    assert_eq!(sink.body_json()["status"], json!("closed"));
}

#[rstest]
fn executor_refusal_is_fatal(settings: Settings) {
    let mut executor = MockExecutor::new();
    executor
        .expect_execute()
        .times(1)
        .returning(|_, _| Err(QueryError::new(ErrorCode::PLAN, "no plan")));
    let dispatcher = dispatcher(ServiceContext::builder(settings).executor(Arc::new(executor)));

    let (record, sink) = serve(&dispatcher, &post_json(r#"{"statement":"select 1"}"#));
    let body = sink.body_json();
    assert_eq!(body["status"], json!("fatal"));
    assert_eq!(error_codes(&body), vec![4000]);
    assert_eq!(record.error_codes, vec![4000]);
}

#[rstest]
fn execution_errors_accompany_partial_results(settings: Settings) {
    let mut executor = MockExecutor::new();
    executor.expect_execute().returning(|context, output| {
        output.send(Box::new(json!({"id": 1})));
        context.error(
            QueryError::new(ErrorCode::DML, "update failed")
                .caused_by(QueryError::new(ErrorCode::CAS_MISMATCH, "cas mismatch")),
        );
        Ok(Execution::default())
    });
    let dispatcher = dispatcher(ServiceContext::builder(settings).executor(Arc::new(executor)));

    let (_, sink) = serve(&dispatcher, &post_json(r#"{"statement":"update x"}"#));
    let body = sink.body_json();
    assert_eq!(body["results"], json!([{"id": 1}]));
    assert_eq!(body["status"], json!("errors"));
    assert_eq!(body["errors"][0]["retry"], json!(true));
    assert!(body.get("signature").is_none());
}

#[rstest]
fn malformed_requests_never_reach_the_executor(settings: Settings) {
    let mut executor = MockExecutor::new();
    executor.expect_execute().never();
    let dispatcher = dispatcher(ServiceContext::builder(settings).executor(Arc::new(executor)));

    let (_, sink) = serve(
        &dispatcher,
        &post_json(r#"{"statement":"select 1","prepared":"p1"}"#),
    );
    assert_eq!(error_codes(&sink.body_json()), vec![1060]);
    assert_eq!(sink.snapshot(|r| r.head.map(|(status, _)| status)), Some(400));
}

#[rstest]
fn unsupported_accept_is_not_acceptable(settings: Settings) {
    let dispatcher = dispatcher(ServiceContext::builder(settings));
    let submission = Submission {
        media: media::negotiate(Some("text/html")),
        ..post_json(r#"{"statement":"select 1"}"#)
    };
    let (_, sink) = serve(&dispatcher, &submission);
    assert_eq!(error_codes(&sink.body_json()), vec![1120]);
    assert_eq!(sink.snapshot(|r| r.head.map(|(status, _)| status)), Some(406));
}

#[rstest]
#[case(None, Some(1180))]
#[case(Some("tx-1"), None)]
fn draining_service_admits_only_transactions(
    settings: Settings,
    #[case] txid: Option<&str>,
    #[case] rejected: Option<u64>,
) {
    let dispatcher = dispatcher(ServiceContext::builder(settings));
    dispatcher.context().lifecycle().begin_shutdown();
    let body = match txid {
        Some(txid) => format!(r#"{{"statement":"select 1","txid":"{txid}"}}"#),
        None => r#"{"statement":"select 1"}"#.to_owned(),
    };

    let (_, sink) = serve(&dispatcher, &post_json(&body));
    let codes = error_codes(&sink.body_json());
    assert_eq!(codes.first().copied(), rejected);
}

#[rstest]
fn throttler_rejection_and_wait_are_reported(settings: Settings) {
    let mut throttler = MockThrottler::new();
    throttler
        .expect_admit()
        .withf(|tenant| *tenant == Some("alice"))
        .returning(|_| Err(QueryError::new(ErrorCode::TENANT_THROTTLED, "tenant throttled")));
    let dispatcher = dispatcher(ServiceContext::builder(settings).throttler(Arc::new(throttler)));

    let (record, sink) = serve(
        &dispatcher,
        &post_json(r#"{"statement":"select 1","creds":[{"user":"alice","pass":"pw"}]}"#),
    );
    assert_eq!(error_codes(&sink.body_json()), vec![1196]);
    assert_eq!(sink.snapshot(|r| r.head.map(|(status, _)| status)), Some(429));
    assert_eq!(record.tenant.as_deref(), Some("alice"));
}

#[rstest]
fn teardown_runs_once_and_recycles_the_request(settings: Settings) {
    let mut audit = MockAuditSink::new();
    audit.expect_submit().with(always()).times(1).return_const(());
    let dispatcher = dispatcher(ServiceContext::builder(settings).audit(Arc::new(audit)));

    let (record, _) = serve(&dispatcher, &post_json(r#"{"statement":"select 1"}"#));

    let context = dispatcher.context();
    assert!(context.registry().get(&record.request_id).is_none());
    assert_eq!(context.registry().count(), 0);
    assert_eq!(context.metrics().vitals()["requests.count"], json!(1));
    assert_eq!(context.request_pool().idle(), 1);
}

/// Registry that remembers every put and delete.
#[derive(Default)]
struct JournalRegistry {
    inner: ActiveRequests,
    journal: Mutex<Vec<String>>,
}

impl JournalRegistry {
    fn entries(&self) -> Vec<String> {
        self.journal.lock().expect("journal lock").clone()
    }
}

impl RequestRegistry for JournalRegistry {
    fn put(&self, request: Arc<Request>) {
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("put {}", request.id()));
        self.inner.put(request);
    }

    fn get(&self, id: &str) -> Option<Arc<Request>> {
        self.inner.get(id)
    }

    fn delete(&self, id: &str) -> bool {
        self.journal
            .lock()
            .expect("journal lock")
            .push(format!("delete {id}"));
        self.inner.delete(id)
    }

    fn foreach(&self, visit: &mut dyn FnMut(&Arc<Request>) -> bool) {
        self.inner.foreach(visit);
    }

    fn count(&self) -> usize {
        self.inner.count()
    }
}

#[rstest]
fn unparseable_requests_are_registered_then_evicted(settings: Settings) {
    let registry = Arc::new(JournalRegistry::default());
    let dispatcher = dispatcher(
        ServiceContext::builder(settings).registry(Arc::clone(&registry) as Arc<dyn RequestRegistry>),
    );

    let (record, sink) = serve(&dispatcher, &post_json(r#"{"timeout":"1s"}"#));

    assert_eq!(error_codes(&sink.body_json()), vec![1050]);
    assert_eq!(
        registry.entries(),
        vec![
            format!("put {}", record.request_id),
            format!("delete {}", record.request_id),
        ]
    );
    assert_eq!(registry.count(), 0);
}
