//! The seam between the transport core and whatever evaluates statements.
//!
//! An [`Executor`] receives the request through an [`ExecutionContext`] and
//! streams rows through an [`ExecutionOutput`]. `execute` itself must return
//! promptly: the heavy lifting happens elsewhere, and completion is
//! signalled by dropping the output.

use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender, select};
use serde_json::Value;

use crate::query::{QueryError, QueryParams, Request, Row, Statement};

/// What an executor reports synchronously when it accepts a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    /// Result signature, when known up front.
    pub signature: Option<Value>,
}

/// The executor's view of a request.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    request: Arc<Request>,
}

impl ExecutionContext {
    pub(crate) const fn new(request: Arc<Request>) -> Self {
        Self { request }
    }

    /// Server-assigned request id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.request.id()
    }

    /// Validated parameters.
    #[must_use]
    pub fn params(&self) -> &QueryParams {
        self.request.params()
    }

    /// Statement text to evaluate; for prepared statements, the text the
    /// plan was built from.
    #[must_use]
    pub fn statement_text(&self) -> &str {
        match &self.request.params().statement {
            Statement::Prepared(prepared) => prepared.statement(),
            Statement::Text(text) => text.as_str(),
        }
    }

    /// Receiver that disconnects when the request is cancelled or ends.
    #[must_use]
    pub fn stop_signal(&self) -> Receiver<()> {
        self.request.stop_signal()
    }

    /// True once the request has stopped.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.request.is_halted()
    }

    /// Records a non-fatal error; streaming continues.
    pub fn error(&self, error: QueryError) {
        self.request.error(error);
    }

    /// Records an error and stops the request.
    pub fn fail(&self, error: QueryError) {
        self.request.fail(error);
    }

    /// Records a warning.
    pub fn warning(&self, warning: QueryError) {
        self.request.warning(warning);
    }

    /// Adds applied mutations.
    pub fn add_mutations(&self, count: u64) {
        self.request.add_mutations(count);
    }

    /// Reports the execution profile.
    pub fn set_profile(&self, profile: Value) {
        self.request.set_profile(profile);
    }

    /// Reports billed and refunded units.
    pub fn set_units(&self, billing: Option<Value>, refunded: Option<Value>) {
        self.request.set_units(billing, refunded);
    }

    /// Reports when the enclosing transaction started.
    pub fn set_transaction_start(&self, started: Instant) {
        self.request.set_transaction_start(started);
    }
}

/// Producer half of the row channel.
///
/// Dropping the last clone tells the servicer that no more rows follow.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    rows: Sender<Row>,
    stop: Receiver<()>,
}

impl ExecutionOutput {
    pub(crate) const fn new(rows: Sender<Row>, stop: Receiver<()>) -> Self {
        Self { rows, stop }
    }

    /// Hands one row to the servicer, blocking while the channel is full.
    ///
    /// Returns false when the request stopped or the servicer stopped
    /// listening; the row is discarded and the producer should wind down.
    pub fn send(&self, row: Row) -> bool {
        select! {
            send(self.rows, row) -> sent => sent.is_ok(),
            recv(self.stop) -> _ => false,
        }
    }
}

/// Evaluates requests.
#[cfg_attr(test, mockall::automock)]
pub trait Executor: Send + Sync {
    /// Starts evaluating the request.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be started (for example a
    /// syntax error); no rows are produced in that case.
    fn execute(
        &self,
        context: ExecutionContext,
        output: ExecutionOutput,
    ) -> Result<Execution, QueryError>;
}
