//! Read-mostly views for the administrative endpoints.

use serde_json::{Map, Value, json};
use tracing::info;

use crate::query::duration::format_duration;
use crate::query::{Request, State};

use super::SERVICE_TARGET;
use super::admission::Phase;
use super::context::ServiceContext;

/// Every active request, in no particular order.
#[must_use]
pub fn active_requests(context: &ServiceContext) -> Value {
    let mut entries = Vec::new();
    context.registry().foreach(&mut |request| {
        entries.push(describe(request));
        true
    });
    Value::Array(entries)
}

/// One active request, if registered.
#[must_use]
pub fn active_request(context: &ServiceContext, id: &str) -> Option<Value> {
    context.registry().get(id).map(|request| describe(&request))
}

/// Cancels an active request. Returns false when no such request exists.
pub fn stop_request(context: &ServiceContext, id: &str) -> bool {
    let Some(request) = context.registry().get(id) else {
        return false;
    };
    let stopped = request.stop(State::Stopped);
    info!(target: SERVICE_TARGET, request_id = id, stopped, "stop requested");
    true
}

/// Service-wide counters plus the live request count.
#[must_use]
pub fn vitals(context: &ServiceContext) -> Value {
    let mut vitals = match context.metrics().vitals() {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("recorder".to_owned(), other);
            map
        }
    };
    vitals.insert("request.active.count".to_owned(), json!(context.registry().count()));
    let phase = match context.lifecycle().phase() {
        Phase::Running => "running",
        Phase::ShuttingDown => "shutting_down",
        Phase::ShutDown => "shut_down",
    };
    vitals.insert("phase".to_owned(), json!(phase));
    Value::Object(vitals)
}

fn describe(request: &Request) -> Value {
    let params = request.params();
    let mut entry = Map::new();
    entry.insert("requestID".to_owned(), json!(request.id()));
    if let Some(id) = &params.client_context_id {
        entry.insert("clientContextID".to_owned(), json!(id));
    }
    match params.statement.prepared_name() {
        Some(name) => entry.insert("preparedName".to_owned(), json!(name)),
        None => entry.insert("statement".to_owned(), json!(params.statement.text())),
    };
    if let Some(tenant) = request.tenant() {
        entry.insert("users".to_owned(), json!(tenant));
    }
    entry.insert("state".to_owned(), json!(request.status_label()));
    entry.insert(
        "elapsedTime".to_owned(),
        json!(format_duration(request.elapsed_time())),
    );
    entry.insert(
        "executionTime".to_owned(),
        json!(format_duration(request.execution_time())),
    );
    entry.insert("resultCount".to_owned(), json!(request.result_count()));
    entry.insert("errorCount".to_owned(), json!(request.error_count()));
    Value::Object(entry)
}
