//! Socket listener and HTTP transport for the query service.
//!
//! The transport module binds to the configured socket endpoint, accepts
//! connections in a background thread and hands each one to a handler that
//! reads a single HTTP request and streams the response.

mod errors;
mod handler;
mod http;
mod listener;
mod routes;
mod stream;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub(crate) use self::errors::HttpError;
pub(crate) use self::handler::QueryConnectionHandler;
#[cfg(test)]
pub(crate) use self::listener::ListenerHandle;
pub(crate) use self::listener::SocketListener;
pub(crate) use self::stream::{ConnectionHandler, ConnectionStream};
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
