//! One audit record per finished request.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::query::Request;
use crate::query::duration::format_duration;

pub(crate) const AUDIT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::audit");

/// What the audit trail keeps about a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Server-assigned id.
    #[serde(rename = "requestID")]
    pub request_id: String,
    /// Client-supplied correlation id.
    #[serde(rename = "clientContextID", skip_serializing_if = "Option::is_none")]
    pub client_context_id: Option<String>,
    /// Statement text, or the prepared name when executing a prepared
    /// statement.
    pub statement: String,
    /// Authenticated user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Final status label.
    pub status: &'static str,
    /// Wall time from arrival to teardown.
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed_time: Duration,
    /// Wall time spent executing.
    #[serde(serialize_with = "serialize_duration")]
    pub execution_time: Duration,
    /// Rows streamed.
    pub result_count: u64,
    /// Encoded row bytes streamed.
    pub result_size: u64,
    /// Mutations applied.
    pub mutation_count: u64,
    /// Codes of the recorded errors, in order.
    pub error_codes: Vec<u32>,
}

impl AuditRecord {
    /// Captures `request` as it stands at teardown.
    #[must_use]
    pub fn of(request: &Request) -> Self {
        let params = request.params();
        let statement = params
            .statement
            .prepared_name()
            .unwrap_or_else(|| params.statement.text())
            .to_owned();
        Self {
            request_id: request.id().to_owned(),
            client_context_id: params.client_context_id.clone(),
            statement,
            tenant: request.tenant().map(str::to_owned),
            status: request.status_label(),
            elapsed_time: request.elapsed_time(),
            execution_time: request.execution_time(),
            result_count: request.result_count(),
            result_size: request.result_size(),
            mutation_count: request.mutation_count(),
            error_codes: request
                .errors()
                .iter()
                .map(|error| error.code().number())
                .collect(),
        }
    }
}

fn serialize_duration<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_duration(*duration))
}

/// Fire-and-forget destination for audit records.
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send + Sync {
    /// Hands over one record. Must not block the caller.
    fn submit(&self, record: AuditRecord);
}

/// Writes audit records as structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn submit(&self, record: AuditRecord) {
        info!(
            target: AUDIT_TARGET,
            request_id = %record.request_id,
            client_context_id = record.client_context_id.as_deref(),
            tenant = record.tenant.as_deref(),
            statement = %record.statement,
            status = record.status,
            elapsed = %format_duration(record.elapsed_time),
            execution = %format_duration(record.execution_time),
            result_count = record.result_count,
            result_size = record.result_size,
            mutation_count = record.mutation_count,
            error_codes = ?record.error_codes,
            "request audited"
        );
    }
}
