//! Builds the streamed JSON response envelope.
//!
//! The envelope is produced in three parts: a prefix that opens the
//! `results` array, the rows themselves (written one at a time through the
//! [`BufferedWriter`]), and a suffix that closes the array and appends the
//! trailing fields. Failures before streaming use
//! [`failure_document`] instead, which never opens `results`.

use std::collections::BTreeMap;
use std::io;

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::Value;
use tracing::debug;

use super::args::Profile;
use super::duration::format_duration;
use super::errors::{QueryError, RetryPolicy};
use super::request::Request;
use super::scan_vector::ScanConsistency;
use super::writer::{BufferedWriter, WRITER_TARGET};

const FIELD_INDENT: &[u8] = b"    ";
const ROW_INDENT: &[u8] = b"        ";

/// One result item the executor hands to the framer.
pub trait ResultRow: Send {
    /// Appends the item's JSON encoding to `out`.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; the framer rolls back whatever was
    /// appended.
    fn encode(&self, out: &mut Vec<u8>, pretty: bool) -> serde_json::Result<()>;
}

impl<T: Serialize + Send> ResultRow for T {
    fn encode(&self, out: &mut Vec<u8>, pretty: bool) -> serde_json::Result<()> {
        encode_value(out, self, pretty.then_some(ROW_INDENT))
    }
}

/// Boxed row as carried on the executor's row channel.
pub type Row = Box<dyn ResultRow>;

/// Writes one row, comma-joined with the previous ones.
///
/// # Errors
///
/// Returns a result-encoding error when the row cannot be encoded; the
/// buffer is left as it was before the row began.
pub fn write_row(
    request: &Request,
    writer: &BufferedWriter,
    row: &dyn ResultRow,
) -> Result<(), QueryError> {
    let pretty = request.options().pretty;
    let first = request.result_count() == 0;
    let mut size = 0;
    let written = writer
        .write_item(|out| {
            if !first {
                out.push(b',');
            }
            if pretty {
                out.push(b'\n');
                out.extend_from_slice(ROW_INDENT);
            }
            let start = out.len();
            row.encode(out, pretty)?;
            size = out.len() - start;
            Ok::<(), serde_json::Error>(())
        })
        .map_err(QueryError::result_encoding)?;
    if written > 0 {
        request.add_result(size);
    }
    Ok(())
}

/// Opening of the envelope up to and including `"results": [`.
#[must_use]
pub fn prefix(request: &Request, signature: Option<&Value>) -> Vec<u8> {
    let mut envelope = Envelope::open(request.options().pretty);
    envelope.field("requestID", request.id());
    if let Some(id) = &request.params().client_context_id {
        envelope.field("clientContextID", id);
    }
    if let Some(name) = request.params().statement.prepared_name() {
        envelope.field("prepared", name);
    }
    if request.options().signature
        && let Some(signature) = signature
    {
        envelope.field("signature", signature);
    }
    envelope.key("results");
    envelope.out.push(b'[');
    envelope.out
}

/// Closing of the envelope from the end of `results` onwards.
#[must_use]
pub fn suffix(request: &Request, policy: &dyn RetryPolicy) -> Vec<u8> {
    let pretty = request.options().pretty;
    let mut envelope = Envelope::resume(pretty);
    if pretty && request.result_count() > 0 {
        envelope.out.push(b'\n');
        envelope.out.extend_from_slice(FIELD_INDENT);
    }
    envelope.out.push(b']');
    trailer(&mut envelope, request, policy);
    envelope.close()
}

/// Complete document for a request that failed before any row was
/// streamed: ids, errors, status and metrics only.
#[must_use]
pub fn failure_document(request: &Request, policy: &dyn RetryPolicy) -> Vec<u8> {
    let mut envelope = Envelope::open(request.options().pretty);
    envelope.field("requestID", request.id());
    if let Some(id) = &request.params().client_context_id {
        envelope.field("clientContextID", id);
    }
    errors_and_status(&mut envelope, request, policy);
    if request.options().metrics {
        envelope.field("metrics", &Metrics::of(request));
    }
    envelope.close()
}

fn trailer(envelope: &mut Envelope, request: &Request, policy: &dyn RetryPolicy) {
    let options = request.options();
    errors_and_status(envelope, request, policy);
    if options.metrics {
        envelope.field("metrics", &Metrics::of(request));
    }
    let (billing, refunded) = request.units();
    if let Some(units) = billing {
        envelope.field("billingUnits", &units);
    }
    if let Some(units) = refunded {
        envelope.field("refundedUnits", &units);
    }
    if options.profile != Profile::Off
        && let Some(profile) = request.profile()
    {
        envelope.field("profile", &profile);
    }
    if options.controls {
        envelope.field("controls", &Controls::of(request));
    }
}

fn errors_and_status(envelope: &mut Envelope, request: &Request, policy: &dyn RetryPolicy) {
    let errors = request.errors();
    if !errors.is_empty() {
        let mutations = request.mutation_count();
        let rendered: Vec<Value> = errors
            .iter()
            .map(|error| error.to_json(policy.retry(error, mutations)))
            .collect();
        envelope.field("errors", &rendered);
    }
    let warnings = request.warnings();
    if !warnings.is_empty() {
        let rendered: Vec<Value> = warnings
            .iter()
            .map(|warning| warning.to_json(warning.retry()))
            .collect();
        envelope.field("warnings", &rendered);
    }
    envelope.field("status", request.status_label());
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Metrics {
    elapsed_time: String,
    execution_time: String,
    result_count: u64,
    result_size: u64,
    #[serde(skip_serializing_if = "is_zero")]
    mutation_count: u64,
    #[serde(skip_serializing_if = "is_zero")]
    error_count: u64,
    #[serde(skip_serializing_if = "is_zero")]
    warning_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_elapsed_time: Option<String>,
}

impl Metrics {
    fn of(request: &Request) -> Self {
        Self {
            elapsed_time: format_duration(request.elapsed_time()),
            execution_time: format_duration(request.execution_time()),
            result_count: request.result_count(),
            result_size: request.result_size(),
            mutation_count: request.mutation_count(),
            error_count: count(request.error_count()),
            warning_count: count(request.warning_count()),
            transaction_elapsed_time: request.transaction_elapsed_time().map(format_duration),
        }
    }
}

const fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn count(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[derive(Serialize)]
struct Controls<'a> {
    scan_consistency: ScanConsistency,
    #[serde(rename = "namedArgs", skip_serializing_if = "is_empty_map")]
    named_args: &'a BTreeMap<String, Value>,
    #[serde(rename = "positionalArgs", skip_serializing_if = "is_empty_slice")]
    positional_args: &'a [Value],
}

impl<'a> Controls<'a> {
    fn of(request: &'a Request) -> Self {
        let params = request.params();
        Self {
            scan_consistency: params.scan.consistency(),
            named_args: &params.named_args,
            positional_args: &params.positional_args,
        }
    }
}

fn is_empty_map(values: &&BTreeMap<String, Value>) -> bool {
    values.is_empty()
}

fn is_empty_slice(values: &&[Value]) -> bool {
    values.is_empty()
}

/// Accumulates top-level envelope fields.
struct Envelope {
    out: Vec<u8>,
    pretty: bool,
    fields: usize,
}

impl Envelope {
    fn open(pretty: bool) -> Self {
        Self {
            out: vec![b'{'],
            pretty,
            fields: 0,
        }
    }

    /// Continues an envelope whose opening was already sent.
    fn resume(pretty: bool) -> Self {
        Self {
            out: Vec::new(),
            pretty,
            fields: 1,
        }
    }

    fn key(&mut self, name: &str) {
        if self.fields > 0 {
            self.out.push(b',');
        }
        if self.pretty {
            self.out.push(b'\n');
            self.out.extend_from_slice(FIELD_INDENT);
        }
        self.fields += 1;
        self.out.push(b'"');
        self.out.extend_from_slice(name.as_bytes());
        self.out.extend_from_slice(if self.pretty { b"\": " } else { b"\":" });
    }

    /// Appends one field; a value that cannot be encoded is left out.
    fn field<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) {
        let mark = self.out.len();
        let fields = self.fields;
        self.key(name);
        let indent = self.pretty.then_some(FIELD_INDENT);
        if let Err(error) = encode_value(&mut self.out, value, indent) {
            debug!(target: WRITER_TARGET, field = name, %error, "dropping unencodable field");
            self.out.truncate(mark);
            self.fields = fields;
        }
    }

    fn close(mut self) -> Vec<u8> {
        if self.pretty {
            self.out.push(b'\n');
        }
        self.out.push(b'}');
        self.out
    }
}

/// Encodes `value`, indenting continuation lines by `indent` when pretty.
fn encode_value<T: Serialize + ?Sized>(
    out: &mut Vec<u8>,
    value: &T,
    indent: Option<&'static [u8]>,
) -> serde_json::Result<()> {
    match indent {
        None => serde_json::to_writer(out, value),
        Some(indent) => {
            let mut serializer = Serializer::with_formatter(
                Indented { out, indent },
                PrettyFormatter::with_indent(FIELD_INDENT),
            );
            value.serialize(&mut serializer)
        }
    }
}

/// Writer that indents every line after the first.
struct Indented<'a> {
    out: &'a mut Vec<u8>,
    indent: &'static [u8],
}

impl io::Write for Indented<'_> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        for line in bytes.split_inclusive(|byte| *byte == b'\n') {
            self.out.extend_from_slice(line);
            if line.ends_with(b"\n") {
                self.out.extend_from_slice(self.indent);
            }
        }
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
