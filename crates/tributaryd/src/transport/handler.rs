//! HTTP connection handler for the query service and its admin endpoints.

use std::io::{self, BufReader, Read};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::query::args::Payload;
use crate::query::QueryError;
use crate::service::{Dispatcher, Submission, admin};

use super::http::{HttpRequest, HttpSink, read_request};
use super::routes::Route;
use super::{ConnectionHandler, ConnectionStream, HttpError, LISTENER_TARGET};

const JSON: &str = "application/json";

/// Serves one HTTP request per connection.
#[derive(Debug)]
pub(crate) struct QueryConnectionHandler {
    dispatcher: Dispatcher,
}

impl QueryConnectionHandler {
    pub(crate) const fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    fn serve(&self, stream: &ConnectionStream) -> io::Result<()> {
        let limit = self.dispatcher.context().settings().max_request_bytes;
        let parsed = {
            let mut reader = BufReader::new(stream.try_clone()?);
            read_request(&mut reader, limit)
        };
        let request = match parsed {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(HttpError::Io(error)) => return Err(error),
            Err(error) => {
                warn!(target: LISTENER_TARGET, %error, "rejecting unreadable request");
                return respond(stream, error.status(), &failure_body(&error));
            }
        };
        debug!(
            target: LISTENER_TARGET,
            method = request.method(),
            path = request.path(),
            "request received"
        );

        let context = self.dispatcher.context();
        match Route::resolve(request.method(), request.path()) {
            Route::Query => self.query(stream, &request),
            Route::ListActive => respond(stream, 200, &admin::active_requests(context)),
            Route::GetActive(id) => match admin::active_request(context, id) {
                Some(entry) => respond(stream, 200, &entry),
                None => not_found(stream),
            },
            Route::StopActive(id) => {
                if admin::stop_request(context, id) {
                    respond(stream, 200, &json!({}))
                } else {
                    not_found(stream)
                }
            }
            Route::Vitals => respond(stream, 200, &admin::vitals(context)),
            Route::NotFound => not_found(stream),
        }
    }

    fn query(&self, stream: &ConnectionStream, request: &HttpRequest) -> io::Result<()> {
        let submission = Submission::new(
            Payload {
                method: request.method(),
                query: request.query(),
                content_type: request.header("content-type"),
                body: request.body(),
                authorization: request.header("authorization"),
            },
            request.header("accept"),
        );
        let content_type = submission
            .media
            .as_ref()
            .copied()
            .unwrap_or_default()
            .content_type();
        let sink = HttpSink::new(stream.try_clone()?, content_type);
        let (closed_tx, closed_rx) = channel::bounded(1);
        let watcher = watch_disconnect(stream.try_clone()?, closed_tx)?;

        let record = self.dispatcher.serve(&submission, Box::new(sink), &closed_rx);
        debug!(
            target: LISTENER_TARGET,
            request_id = %record.request_id,
            status = record.status,
            "query served"
        );

        // Shutting the socket down also ends the watcher's read.
        stream.shutdown()?;
        if watcher.join().is_err() {
            warn!(target: LISTENER_TARGET, "disconnect watcher panicked");
        }
        Ok(())
    }
}

impl ConnectionHandler for QueryConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        if let Err(error) = self.serve(&stream) {
            debug!(target: LISTENER_TARGET, %error, "connection ended with an error");
        }
        if let Err(error) = stream.shutdown() {
            debug!(target: LISTENER_TARGET, %error, "socket shutdown failed");
        }
    }
}

/// Reads the connection after the request was consumed; end of stream or
/// a read error means the client went away.
fn watch_disconnect(mut stream: ConnectionStream, closed: Sender<()>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("conn-watch".to_owned())
        .spawn(move || {
            let mut scratch = [0_u8; 256];
            loop {
                match stream.read(&mut scratch) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
            let _ = closed.try_send(());
        })
}

fn respond(stream: &ConnectionStream, status: u16, body: &Value) -> io::Result<()> {
    let bytes = serde_json::to_vec(body).map_err(io::Error::other)?;
    HttpSink::new(stream.try_clone()?, JSON).respond(status, &bytes)
}

fn not_found(stream: &ConnectionStream) -> io::Result<()> {
    respond(stream, 404, &json!({}))
}

fn failure_body(error: &HttpError) -> Value {
    let failure = match error {
        HttpError::BodyTooLarge { limit, .. } => QueryError::request_size(*limit),
        HttpError::UnsupportedEncoding { encoding } => {
            QueryError::not_implemented("Transfer-Encoding", encoding)
        }
        other => QueryError::bad_value("request", other),
    };
    json!({
        "errors": [failure.to_json(failure.retry())],
        "status": "fatal",
    })
}

#[cfg(test)]
mod tests;
