//! User-visible error taxonomy of the query service.
//!
//! Every failure that reaches a client is a [`QueryError`] carrying a numeric
//! [`ErrorCode`]. Codes map onto HTTP statuses through
//! [`ErrorCode::http_status`]; that mapping only matters until the response
//! header has been flushed.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;

use super::duration::format_duration;

/// Numeric error code reported in the `errors` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ErrorCode(u32);

impl ErrorCode {
    /// `readonly=false` on a GET request.
    pub const READONLY: Self = Self(1000);
    /// Unsupported HTTP method.
    pub const HTTP_METHOD: Self = Self(1010);
    /// Recognised but unsupported option value.
    pub const NOT_IMPLEMENTED: Self = Self(1020);
    /// Option value outside the accepted set.
    pub const UNRECOGNIZED_VALUE: Self = Self(1030);
    /// Malformed option value.
    pub const BAD_VALUE: Self = Self(1040);
    /// Required value absent.
    pub const MISSING_VALUE: Self = Self(1050);
    /// More than one value for a scalar field.
    pub const MULTIPLE_VALUES: Self = Self(1060);
    /// Parameter name outside the recognised set.
    pub const UNRECOGNIZED_PARAMETER: Self = Self(1065);
    /// Value of the wrong JSON type.
    pub const TYPE_MISMATCH: Self = Self(1070);
    /// Request deadline exceeded.
    pub const TIMEOUT: Self = Self(1080);
    /// A result item could not be encoded.
    pub const RESULT_ENCODING: Self = Self(1100);
    /// Forbidden character in `client_context_id`.
    pub const CLIENT_ID: Self = Self(1110);
    /// `Accept` header names no supported media type.
    pub const MEDIA_TYPE: Self = Self(1120);
    /// Scan-vector entry is not a two-element array.
    pub const SCAN_VECTOR_LENGTH: Self = Self(1140);
    /// Scan-vector sequence number is not a non-negative integer.
    pub const SCAN_VECTOR_SEQUENCE: Self = Self(1150);
    /// Scan-vector guard is not a string.
    pub const SCAN_VECTOR_GUARD: Self = Self(1155);
    /// Service is draining.
    pub const SHUTTING_DOWN: Self = Self(1180);
    /// Service has stopped accepting work.
    pub const SHUT_DOWN: Self = Self(1181);
    /// Per-user request rate exceeded.
    pub const USER_REQUEST_RATE: Self = Self(1191);
    /// Request rate exceeded.
    pub const REQUEST_RATE: Self = Self(1192);
    /// Request body too large.
    pub const REQUEST_SIZE: Self = Self(1193);
    /// Result set too large.
    pub const RESULT_SIZE: Self = Self(1194);
    /// Tenant budget exhausted; retry later.
    pub const TENANT_THROTTLED: Self = Self(1196);
    /// Tenant not admitted.
    pub const TENANT_REJECTED: Self = Self(1199);
    /// Admission queue full.
    pub const QUEUE_FULL: Self = Self(1201);
    /// Statement failed to parse.
    pub const PARSE_SYNTAX: Self = Self(3000);
    /// Plan could not be produced.
    pub const PLAN: Self = Self(4000);
    /// Prepared statement not found.
    pub const NO_SUCH_PREPARED: Self = Self(4040);
    /// Encoded plan could not be decoded.
    pub const PREPARED_DECODING: Self = Self(4070);
    /// Index already exists.
    pub const INDEX_EXISTS: Self = Self(4300);
    /// Unexpected internal failure.
    pub const INTERNAL: Self = Self(5000);
    /// Subquery could not be built.
    pub const SUBQUERY_BUILD: Self = Self(5370);
    /// Datastore refused the credentials.
    pub const AUTHORIZATION: Self = Self(10000);
    /// DML statement failed.
    pub const DML: Self = Self(12009);
    /// Document changed underneath a mutation.
    pub const CAS_MISMATCH: Self = Self(12033);

    /// Wraps an arbitrary code reported by a collaborator.
    #[must_use]
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Numeric value.
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    /// HTTP status used when this error is the first one observed before
    /// the response header is sent.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self.0 {
            1000 => 403,
            1010 => 405,
            1020..=1070 | 1110 | 1140..=1155 | 3000..=3999 | 4070 => 400,
            1120 => 406,
            1180 | 1181 | 1201 => 503,
            1191 | 1192 | 1196 | 1199 => 429,
            1193 | 1194 => 413,
            4000 | 4040 => 404,
            4300 => 409,
            5370 => 422,
            10000..=10999 => 401,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// One entry of the `errors` or `warnings` array.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} (code {code})")]
pub struct QueryError {
    code: ErrorCode,
    message: String,
    reason: Option<Map<String, Value>>,
    #[source]
    cause: Option<Box<QueryError>>,
    retry: bool,
}

impl QueryError {
    /// Builds an error with an explicit code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reason: None,
            cause: None,
            retry: false,
        }
    }

    /// Attaches a structured reason object.
    #[must_use]
    pub fn with_reason(mut self, reason: Map<String, Value>) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Attaches the error this one wraps.
    #[must_use]
    pub fn caused_by(mut self, cause: Self) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Sets the error's own retry hint.
    #[must_use]
    pub const fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Numeric code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Wrapped error, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        self.cause.as_deref()
    }

    /// The error's own retry hint, before any [`RetryPolicy`] is applied.
    #[must_use]
    pub const fn retry(&self) -> bool {
        self.retry
    }

    /// HTTP status for this error; see [`ErrorCode::http_status`].
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Renders the wire object with the effective retry flag.
    #[must_use]
    pub fn to_json(&self, retry: bool) -> Value {
        let mut object = Map::new();
        object.insert("code".to_owned(), json!(self.code));
        object.insert("msg".to_owned(), Value::String(self.message.clone()));
        if let Some(reason) = &self.reason {
            object.insert("reason".to_owned(), Value::Object(reason.clone()));
        }
        if let Some(cause) = &self.cause {
            object.insert("cause".to_owned(), cause.to_json(cause.retry));
        }
        object.insert("retry".to_owned(), Value::Bool(retry));
        Value::Object(object)
    }

    /// Unsupported HTTP method.
    pub fn http_method(method: &str) -> Self {
        Self::new(
            ErrorCode::HTTP_METHOD,
            format!("Unsupported http method: {method}"),
        )
    }

    /// `readonly=false` supplied with GET.
    #[must_use]
    pub fn readonly() -> Self {
        Self::new(
            ErrorCode::READONLY,
            "readonly=false cannot be used with HTTP GET method.",
        )
    }

    /// Known option value without an implementation.
    pub fn not_implemented(parameter: &str, value: &str) -> Self {
        Self::new(
            ErrorCode::NOT_IMPLEMENTED,
            format!("{parameter} value {value} is not yet implemented"),
        )
    }

    /// Option value outside the accepted set.
    pub fn unrecognized_value(parameter: &str, value: &str) -> Self {
        Self::new(
            ErrorCode::UNRECOGNIZED_VALUE,
            format!("Unknown {parameter} value: {value}"),
        )
    }

    /// Malformed option value.
    pub fn bad_value(parameter: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::BAD_VALUE,
            format!("Bad value for {parameter}: {detail}"),
        )
    }

    /// Required value absent.
    pub fn missing_value(what: &str) -> Self {
        Self::new(ErrorCode::MISSING_VALUE, format!("No value for {what}."))
    }

    /// More than one value where exactly one is allowed.
    pub fn multiple_values(what: &str) -> Self {
        Self::new(
            ErrorCode::MULTIPLE_VALUES,
            format!("Multiple values for {what}."),
        )
    }

    /// Unknown parameter name.
    pub fn unrecognized_parameter(name: &str) -> Self {
        Self::new(
            ErrorCode::UNRECOGNIZED_PARAMETER,
            format!("Unrecognized parameter in request: {name}"),
        )
    }

    /// Value of the wrong JSON type.
    pub fn type_mismatch(parameter: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::TYPE_MISMATCH,
            format!("{parameter} has to be of type {expected}"),
        )
    }

    /// Deadline exceeded.
    #[must_use]
    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            ErrorCode::TIMEOUT,
            format!("Timeout {} exceeded", format_duration(limit)),
        )
    }

    /// A result item failed to encode.
    pub fn result_encoding(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::RESULT_ENCODING,
            format!("Invalid JSON in results: {detail}"),
        )
    }

    /// Forbidden character in the client context id.
    #[must_use]
    pub fn client_id() -> Self {
        Self::new(
            ErrorCode::CLIENT_ID,
            "forbidden character (\\ or \") in client_context_id",
        )
    }

    /// No acceptable response media type.
    pub fn media_type(accept: &str) -> Self {
        Self::new(
            ErrorCode::MEDIA_TYPE,
            format!("Unsupported media type: {accept}"),
        )
    }

    /// Request arrived while the service drains.
    #[must_use]
    pub fn shutting_down() -> Self {
        Self::new(ErrorCode::SHUTTING_DOWN, "Query service is shutting down")
    }

    /// Request arrived after the service stopped.
    #[must_use]
    pub fn shut_down() -> Self {
        Self::new(ErrorCode::SHUT_DOWN, "Query service has shut down")
    }

    /// Request body over the configured cap.
    #[must_use]
    pub fn request_size(limit: usize) -> Self {
        Self::new(
            ErrorCode::REQUEST_SIZE,
            format!("Request size exceeds {limit} bytes"),
        )
    }

    /// Admission queue full.
    #[must_use]
    pub fn queue_full() -> Self {
        Self::new(ErrorCode::QUEUE_FULL, "Request queue is full").with_retry(true)
    }

    /// Statement failed to parse.
    pub fn parse_syntax(detail: impl fmt::Display) -> Self {
        Self::new(ErrorCode::PARSE_SYNTAX, format!("syntax error - {detail}"))
    }

    /// Prepared statement not found.
    pub fn no_such_prepared(name: &str) -> Self {
        Self::new(
            ErrorCode::NO_SUCH_PREPARED,
            format!("No such prepared statement: {name}"),
        )
    }

    /// Encoded plan could not be decoded.
    pub fn prepared_decoding(detail: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::PREPARED_DECODING,
            format!("Unable to decode prepared statement: {detail}"),
        )
    }

    /// Unexpected internal failure.
    pub fn internal(detail: impl fmt::Display) -> Self {
        Self::new(ErrorCode::INTERNAL, format!("Internal error: {detail}"))
    }
}

/// Decides the `retry` flag rendered for an error.
pub trait RetryPolicy: Send + Sync {
    /// Returns the effective retry flag for `error` given how many mutations
    /// the request performed.
    fn retry(&self, error: &QueryError, mutations: u64) -> bool;
}

/// Forces `retry=true` on CAS mismatches that happened before any mutation
/// was applied, since re-running such a statement cannot double-apply work.
#[derive(Debug, Default, Clone, Copy)]
pub struct CasMismatchPolicy;

impl RetryPolicy for CasMismatchPolicy {
    fn retry(&self, error: &QueryError, mutations: u64) -> bool {
        if mutations == 0 && is_cas_mismatch(error) {
            return true;
        }
        error.retry()
    }
}

fn is_cas_mismatch(error: &QueryError) -> bool {
    match error.code() {
        ErrorCode::CAS_MISMATCH => true,
        ErrorCode::DML => error.cause().is_some_and(is_cas_mismatch),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ErrorCode::READONLY, 403)]
    #[case(ErrorCode::HTTP_METHOD, 405)]
    #[case(ErrorCode::BAD_VALUE, 400)]
    #[case(ErrorCode::UNRECOGNIZED_PARAMETER, 400)]
    #[case(ErrorCode::TYPE_MISMATCH, 400)]
    #[case(ErrorCode::MEDIA_TYPE, 406)]
    #[case(ErrorCode::SHUTTING_DOWN, 503)]
    #[case(ErrorCode::SHUT_DOWN, 503)]
    #[case(ErrorCode::REQUEST_RATE, 429)]
    #[case(ErrorCode::REQUEST_SIZE, 413)]
    #[case(ErrorCode::AUTHORIZATION, 401)]
    #[case(ErrorCode::PARSE_SYNTAX, 400)]
    #[case(ErrorCode::NO_SUCH_PREPARED, 404)]
    #[case(ErrorCode::INDEX_EXISTS, 409)]
    #[case(ErrorCode::INTERNAL, 500)]
    #[case(ErrorCode::SUBQUERY_BUILD, 422)]
    #[case(ErrorCode::new(424_242), 500)]
    fn maps_codes_to_http_statuses(#[case] code: ErrorCode, #[case] status: u16) {
        assert_eq!(code.http_status(), status);
    }

    #[test]
    fn timeout_message_uses_go_style_duration() {
        let error = QueryError::timeout(Duration::from_millis(100));
        assert_eq!(error.message(), "Timeout 100ms exceeded");
        assert_eq!(error.code(), ErrorCode::TIMEOUT);
    }

    #[test]
    fn wire_object_carries_optional_fields() {
        let mut reason = Map::new();
        reason.insert("keyspace".to_owned(), json!("orders"));
        let error = QueryError::new(ErrorCode::DML, "update failed")
            .with_reason(reason)
            .caused_by(QueryError::new(ErrorCode::CAS_MISMATCH, "cas mismatch"));

        let rendered = error.to_json(true);
        assert_eq!(rendered["code"], json!(12009));
        assert_eq!(rendered["reason"]["keyspace"], json!("orders"));
        assert_eq!(rendered["cause"]["code"], json!(12033));
        assert_eq!(rendered["retry"], json!(true));
    }

    #[rstest]
    #[case(QueryError::new(ErrorCode::CAS_MISMATCH, "cas"), 0, true)]
    #[case(QueryError::new(ErrorCode::CAS_MISMATCH, "cas"), 3, false)]
    #[case(
        QueryError::new(ErrorCode::DML, "dml")
            .caused_by(QueryError::new(ErrorCode::CAS_MISMATCH, "cas")),
        0,
        true
    )]
    #[case(QueryError::new(ErrorCode::DML, "dml"), 0, false)]
    #[case(QueryError::queue_full(), 5, true)]
    fn cas_policy_overrides_retry_only_without_mutations(
        #[case] error: QueryError,
        #[case] mutations: u64,
        #[case] expected: bool,
    ) {
        assert_eq!(CasMismatchPolicy.retry(&error, mutations), expected);
    }
}
