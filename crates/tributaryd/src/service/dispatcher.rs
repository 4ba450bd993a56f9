//! Per-request orchestration: extraction, admission, execution and
//! teardown.

use std::sync::Arc;

use crossbeam::channel::{self, Receiver, select};
use tracing::debug;

use crate::query::args::{self, Payload};
use crate::query::framer::{failure_document, suffix};
use crate::query::media;
use crate::query::{
    BufferedWriter, Handoff, MediaType, QueryError, QueryParams, Request, ResponseSink, State,
};

use super::SERVICE_TARGET;
use super::admission::Lane;
use super::audit::AuditRecord;
use super::context::ServiceContext;
use super::metrics::RequestSummary;

/// A query submission as delivered by the transport.
#[derive(Debug, Clone)]
pub(crate) struct Submission<'a> {
    pub(crate) payload: Payload<'a>,
    /// Outcome of `Accept` negotiation, done by the transport so it can
    /// label the response.
    pub(crate) media: Result<MediaType, QueryError>,
}

impl<'a> Submission<'a> {
    /// Negotiates `accept` for `payload`.
    pub(crate) fn new(payload: Payload<'a>, accept: Option<&str>) -> Self {
        Self {
            payload,
            media: media::negotiate(accept),
        }
    }
}

/// Entry point of the query service.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    context: Arc<ServiceContext>,
}

impl Dispatcher {
    /// Creates a dispatcher over `context`.
    #[must_use]
    pub const fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    /// The injected service context.
    #[must_use]
    pub const fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    /// Serves one submission, writing the response to `sink`.
    ///
    /// `closed` fires (or disconnects) when the client goes away. Returns
    /// the audit record of the finished request.
    pub(crate) fn serve(
        &self,
        submission: &Submission<'_>,
        sink: Box<dyn ResponseSink>,
        closed: &Receiver<()>,
    ) -> AuditRecord {
        let context = self.context.as_ref();
        let settings = context.settings();
        let negotiated = submission.media.clone();
        let writer = Arc::new(BufferedWriter::new(
            sink,
            Arc::clone(context.buffer_pool()),
            settings.flush_interval,
        ));

        let mut request = context.request_pool().take();
        request.attach(
            Arc::clone(&writer),
            negotiated.as_ref().copied().unwrap_or_default(),
        );
        // Early failures still render with the server's toggles.
        request.set_params(QueryParams::default(), settings.defaults, None);
        let admitted = negotiated.and_then(|_| self.admit(&mut request, &submission.payload));

        let request = Arc::new(request);
        let teardown = Teardown {
            context,
            request: Some(Arc::clone(&request)),
        };
        // Rejected requests are registered too; teardown evicts them.
        context.registry().put(Arc::clone(&request));
        match admitted {
            Ok(lane) => {
                debug!(target: SERVICE_TARGET, request_id = request.id(), ?lane, "request admitted");
                self.execute(&request, &writer, lane, closed);
            }
            Err(error) => {
                debug!(target: SERVICE_TARGET, request_id = request.id(), %error, "request rejected");
                self.reject(&request, &writer, error);
            }
        }

        let record = AuditRecord::of(&request);
        debug!(
            target: SERVICE_TARGET,
            request_id = request.id(),
            state = %request.state(),
            result_count = request.result_count(),
            "request finished"
        );
        drop(request);
        teardown.complete(record.clone());
        record
    }

    fn admit(&self, request: &mut Request, payload: &Payload<'_>) -> Result<Lane, QueryError> {
        let context = self.context.as_ref();
        let settings = context.settings();
        let params = args::extract(payload, context.prepareds())?;
        let lane = Lane::of(&params);
        request.set_params(params, settings.defaults, settings.request_timeout);
        if let Some(throttler) = context.throttler() {
            let wait = throttler.admit(request.tenant())?;
            request.set_throttle_wait(wait);
        }
        context.lifecycle().check(request.params())?;
        Ok(lane)
    }

    /// Queues the request and waits for exactly one of: the servicer
    /// finishing, the request stopping, the client leaving, the deadline.
    fn execute(
        &self,
        request: &Arc<Request>,
        writer: &BufferedWriter,
        lane: Lane,
        closed: &Receiver<()>,
    ) {
        let context = self.context.as_ref();
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let servicer = Arc::clone(context.servicer());
        let job_request = Arc::clone(request);
        let submitted = context.queues().submit(lane, move || {
            servicer.run(&job_request);
            drop(job_request);
            drop(done_tx);
        });
        if let Err(error) = submitted {
            self.reject(request, writer, error);
            return;
        }

        let stop = request.stop_signal();
        let deadline = request
            .timeout()
            .and_then(|limit| request.request_time().checked_add(limit))
            .map_or_else(channel::never, channel::at);
        select! {
            recv(done_rx) -> _ => return,
            recv(stop) -> _ => {}
            recv(closed) -> _ => {
                request.stop(State::Closed);
            }
            recv(deadline) -> _ => {
                if let Some(limit) = request.timeout() {
                    request.expire(limit);
                }
            }
        }

        if let Handoff::Acquired(lease) = writer.get_external() {
            lease.write_bytes(&suffix(request, context.retry_policy()));
            lease.finish();
        }
        // The servicer winds down on the stop signal; wait so it releases
        // its hold on the request before teardown.
        let _ = done_rx.recv();
    }

    fn reject(&self, request: &Request, writer: &BufferedWriter, error: QueryError) {
        request.fail(error);
        if let Handoff::Acquired(lease) = writer.get_internal() {
            lease.write_bytes(&failure_document(request, self.context.retry_policy()));
            lease.finish();
        }
    }
}

/// End-of-request bookkeeping, run exactly once on every exit path.
struct Teardown<'a> {
    context: &'a ServiceContext,
    request: Option<Arc<Request>>,
}

impl Teardown<'_> {
    fn complete(mut self, record: AuditRecord) {
        self.finish(Some(record));
    }

    fn finish(&mut self, record: Option<AuditRecord>) {
        let Some(request) = self.request.take() else {
            return;
        };
        if request.claim_teardown() {
            self.context.registry().delete(request.id());
            self.context.metrics().record(&RequestSummary::of(&request));
            let record = record.unwrap_or_else(|| AuditRecord::of(&request));
            self.context.audit().submit(record);
        }
        self.context.request_pool().give_back(request);
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.finish(None);
    }
}

#[cfg(test)]
mod tests;
