//! Behavioural tests for the query request lifecycle.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;

use super::support::{QueryWorld, SleepingExecutor};

#[fixture]
fn world() -> RefCell<QueryWorld> {
    RefCell::new(QueryWorld::default())
}

fn result_rows(body: &Value) -> usize {
    body.get("results")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

#[given("a query service with the literal executor")]
fn given_literal_service(world: &RefCell<QueryWorld>) {
    world.borrow_mut().start_service(None);
}

#[given("a query service whose executor sleeps for {millis} milliseconds")]
fn given_sleeping_service(world: &RefCell<QueryWorld>, millis: u64) {
    let executor = Arc::new(SleepingExecutor::new(Duration::from_millis(millis)));
    world.borrow_mut().start_service(Some(executor));
}

#[given("a query service whose executor streams rows until cancelled")]
fn given_streaming_service(world: &RefCell<QueryWorld>) {
    world.borrow_mut().start_streaming_service(3);
}

#[when("the client submits the form \"{query}\"")]
fn when_form_submitted(world: &RefCell<QueryWorld>, query: String) {
    world.borrow_mut().submit_form(&query);
}

#[when("the client posts the JSON body '{body}'")]
fn when_json_posted(world: &RefCell<QueryWorld>, body: String) {
    world.borrow_mut().post_json(&body);
}

#[when("the client disconnects after {rows} rows")]
fn when_client_disconnects(world: &RefCell<QueryWorld>, rows: usize) {
    assert_eq!(rows, 3, "the streaming executor sends a burst of three rows");
    world.borrow_mut().disconnect_after_burst();
}

#[when("the parameters \"{query}\" are extracted")]
fn when_parameters_extracted(world: &RefCell<QueryWorld>, query: String) {
    world.borrow_mut().extract(&query);
}

#[then("the request finishes with status \"{status}\"")]
fn then_request_status(world: &RefCell<QueryWorld>, status: String) {
    let world = world.borrow();
    assert_eq!(world.record().status, status);
    assert_eq!(world.body()["status"], Value::String(status));
}

#[then("the response has HTTP status {status}")]
fn then_http_status(world: &RefCell<QueryWorld>, status: u16) {
    assert_eq!(world.borrow().http_status(), Some(status));
}

#[then("the response carries {count} result row")]
fn then_result_row(world: &RefCell<QueryWorld>, count: usize) {
    assert_eq!(result_rows(&world.borrow().body()), count);
}

#[then("the response carries {count} result rows")]
fn then_result_rows(world: &RefCell<QueryWorld>, count: usize) {
    let world = world.borrow();
    assert_eq!(result_rows(&world.body()), count);
    assert_eq!(world.record().result_count, count as u64);
}

#[then("the response reports exactly one error with code {code}")]
fn then_single_error(world: &RefCell<QueryWorld>, code: u64) {
    let body = world.borrow().body();
    let errors = body["errors"].as_array().cloned().unwrap_or_default();
    assert_eq!(errors.len(), 1, "errors: {errors:?}");
    assert_eq!(errors[0]["code"].as_u64(), Some(code));
}

#[then("the response document is well formed")]
fn then_document_well_formed(world: &RefCell<QueryWorld>) {
    let body = world.borrow().body();
    assert!(body.get("requestID").is_some());
    assert!(body.get("status").is_some());
}

#[then("the executor observes the cancellation")]
fn then_executor_cancelled(world: &RefCell<QueryWorld>) {
    assert!(world.borrow().streaming_executor().wait_for_cancellation());
}

#[then("the scan vector has {count} entry")]
fn then_scan_vector_len(world: &RefCell<QueryWorld>, count: usize) {
    let world = world.borrow();
    let vector = world.extracted().scan.vectors().scan_vector("default", "any");
    assert_eq!(vector.len(), count);
}

#[then("scan vector entry {index} has position {position}, sequence {sequence} and guard \"{guard}\"")]
fn then_scan_vector_entry(
    world: &RefCell<QueryWorld>,
    index: usize,
    position: u32,
    sequence: u64,
    guard: String,
) {
    let world = world.borrow();
    let vector = world.extracted().scan.vectors().scan_vector("default", "any");
    let entry = &vector.entries()[index];
    assert_eq!(entry.position(), position);
    assert_eq!(entry.sequence(), sequence);
    assert_eq!(entry.guard(), guard);
}

#[scenario(
    path = "tests/features/query_service.feature",
    name = "A literal select completes with one row"
)]
fn literal_select(world: RefCell<QueryWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_service.feature",
    name = "An unknown prepared statement fails without results"
)]
fn unknown_prepared(world: RefCell<QueryWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_service.feature",
    name = "A slow query runs past its timeout"
)]
fn slow_query_timeout(world: RefCell<QueryWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_service.feature",
    name = "A sparse scan vector resolves to its entries"
)]
fn sparse_scan_vector(world: RefCell<QueryWorld>) {
    drop(world);
}

#[scenario(
    path = "tests/features/query_service.feature",
    name = "A client disconnect closes a streaming request"
)]
fn client_disconnect(world: RefCell<QueryWorld>) {
    drop(world);
}
