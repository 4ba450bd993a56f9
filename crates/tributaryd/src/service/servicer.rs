//! Drives one admitted request from start to the end of its response.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, select};
use tracing::debug;

use crate::query::framer::{failure_document, prefix, suffix, write_row};
use crate::query::{BufferedWriter, Handoff, Request, RetryPolicy, Row, State, Statement};

use super::SERVICE_TARGET;
use super::executor::{ExecutionContext, ExecutionOutput, Executor};

/// Rows the executor may run ahead of the writer.
const ROW_CHANNEL_CAPACITY: usize = 64;

/// The internal actor: runs the executor and streams its rows.
pub struct Servicer {
    executor: Arc<dyn Executor>,
    policy: Arc<dyn RetryPolicy>,
    flush_interval: Duration,
}

impl Servicer {
    pub(crate) fn new(
        executor: Arc<dyn Executor>,
        policy: Arc<dyn RetryPolicy>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            executor,
            policy,
            flush_interval,
        }
    }

    pub(crate) fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }

    /// Services `request` on the calling thread.
    pub(crate) fn run(&self, request: &Arc<Request>) {
        let Some(writer) = request.writer() else {
            return;
        };
        if !request.start() {
            debug!(
                target: SERVICE_TARGET,
                request_id = request.id(),
                state = %request.state(),
                "request halted before it started"
            );
            self.finish_failed(request, writer);
            return;
        }

        let (rows_tx, rows_rx) = channel::bounded::<Row>(ROW_CHANNEL_CAPACITY);
        let output = ExecutionOutput::new(rows_tx, request.stop_signal());
        let execution = match self
            .executor
            .execute(ExecutionContext::new(Arc::clone(request)), output)
        {
            Ok(execution) => execution,
            Err(error) => {
                debug!(target: SERVICE_TARGET, request_id = request.id(), %error, "execution refused");
                request.fail(error);
                self.finish_failed(request, writer);
                return;
            }
        };

        let prepared_signature = match &request.params().statement {
            Statement::Prepared(prepared) => prepared.signature().cloned(),
            Statement::Text(_) => None,
        };
        let signature = execution.signature.or(prepared_signature);
        writer.write_bytes(&prefix(request, signature.as_ref()));
        writer.release_external();

        self.drain(request, writer, &rows_rx);
        drop(rows_rx);

        if let Handoff::Acquired(lease) = writer.get_internal() {
            lease.write_bytes(&suffix(request, self.policy()));
            lease.finish();
        }
    }

    /// Streams rows until the executor closes the channel or the request
    /// stops.
    fn drain(&self, request: &Request, writer: &BufferedWriter, rows: &channel::Receiver<Row>) {
        let stop = request.stop_signal();
        loop {
            select! {
                recv(rows) -> row => match row {
                    Ok(_) if request.is_halted() => break,
                    Ok(row) => {
                        if let Err(error) = write_row(request, writer, row.as_ref()) {
                            request.fail(error);
                            break;
                        }
                    }
                    Err(_) => {
                        request.stop(State::Completed);
                        break;
                    }
                },
                recv(stop) -> _ => break,
                default(self.flush_interval) => writer.flush_if_due(),
            }
        }
    }

    /// Writes the minimal document for a request that never streamed.
    fn finish_failed(&self, request: &Request, writer: &BufferedWriter) {
        if let Handoff::Acquired(lease) = writer.get_internal() {
            lease.write_bytes(&failure_document(request, self.policy()));
            lease.finish();
        }
    }
}
