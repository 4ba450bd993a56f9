//! Accept loop feeding HTTP connections to the query handler.
//!
//! The listener polls a non-blocking socket so shutdown is observed between
//! accepts. Each accepted connection runs on its own named thread and holds a
//! slot in the open-connection gauge until its handler returns.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use tributary_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

/// Pause between polls when no client is waiting.
const IDLE_POLL: Duration = Duration::from_millis(25);
/// Pause after a failed accept, so a persistent fault does not spin.
const FAULT_PAUSE: Duration = Duration::from_millis(150);

/// Bound socket that has not started accepting yet.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    acceptor: Acceptor,
}

#[derive(Debug)]
enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Acceptor {
    fn set_nonblocking(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => listener.set_nonblocking(true),
            #[cfg(unix)]
            Self::Unix(listener) => listener.set_nonblocking(true),
        }
    }

    /// Takes the next waiting client, or `None` when nobody is queued.
    fn next_client(&self) -> io::Result<Option<ConnectionStream>> {
        let accepted = match self {
            Self::Tcp(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                stream.set_nodelay(true)?;
                Ok(ConnectionStream::Tcp(stream))
            }),
            #[cfg(unix)]
            Self::Unix(listener) => listener.accept().and_then(|(stream, _)| {
                stream.set_nonblocking(false)?;
                Ok(ConnectionStream::Unix(stream))
            }),
        };
        match accepted {
            Ok(stream) => Ok(Some(stream)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl SocketListener {
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let acceptor = match endpoint {
            SocketEndpoint::Tcp { host, port } => Acceptor::Tcp(bind_tcp(host, *port)?),
            #[cfg(unix)]
            SocketEndpoint::Unix { path } => {
                endpoint.prepare_filesystem()?;
                Acceptor::Unix(bind_unix(path.as_std_path())?)
            }
            #[cfg(not(unix))]
            SocketEndpoint::Unix { .. } => {
                return Err(ListenerError::UnsupportedUnix {
                    endpoint: endpoint.to_string(),
                });
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            acceptor,
        })
    }

    /// Bound TCP address, useful when the configured port was `0`.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.acceptor {
            Acceptor::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Acceptor::Unix(_) => None,
        }
    }

    /// Starts the accept thread. Connections are handed to `handler`.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = self.acceptor.set_nonblocking() {
            self.release();
            return Err(ListenerError::NonBlocking { source });
        }
        let stopping = Arc::new(AtomicBool::new(false));
        let open = Arc::new(AtomicUsize::new(0));
        let accept_loop = AcceptLoop {
            listener: self,
            handler,
            stopping: Arc::clone(&stopping),
            open: Arc::clone(&open),
        };
        let thread = thread::Builder::new()
            .name("http-accept".to_owned())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            stopping,
            open,
            thread: Some(thread),
        })
    }

    /// Removes the socket file of a Unix endpoint.
    fn release(&self) {
        #[cfg(unix)]
        remove_socket_file(&self.endpoint);
    }
}

#[cfg(unix)]
fn remove_socket_file(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}

/// Handle to the running accept thread.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    stopping: Arc<AtomicBool>,
    open: Arc<AtomicUsize>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept thread to stop. Connections already accepted keep
    /// running until their handlers return.
    pub(crate) fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Connections whose handlers are still running.
    pub(crate) fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        thread.join().map_err(|_| ListenerError::ThreadPanic)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

struct AcceptLoop {
    listener: SocketListener,
    handler: Arc<dyn ConnectionHandler>,
    stopping: Arc<AtomicBool>,
    open: Arc<AtomicUsize>,
}

impl AcceptLoop {
    fn run(self) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint,
            "accepting query connections"
        );
        let mut accepted: u64 = 0;
        let mut last_fault = None::<io::ErrorKind>;
        while !self.stopping.load(Ordering::SeqCst) {
            match self.listener.acceptor.next_client() {
                Ok(Some(stream)) => {
                    last_fault = None;
                    self.dispatch(accepted, stream);
                    accepted += 1;
                }
                Ok(None) => thread::sleep(IDLE_POLL),
                Err(error) => {
                    // Log each distinct fault once until an accept succeeds.
                    if last_fault != Some(error.kind()) {
                        warn!(target: LISTENER_TARGET, %error, "accept failed");
                    }
                    last_fault = Some(error.kind());
                    thread::sleep(FAULT_PAUSE);
                }
            }
        }
        debug!(
            target: LISTENER_TARGET,
            accepted,
            still_open = self.open.load(Ordering::SeqCst),
            "accept loop stopped"
        );
        self.listener.release();
    }

    fn dispatch(&self, id: u64, stream: ConnectionStream) {
        let slot = ConnectionSlot::claim(&self.open);
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("http-conn-{id}"))
            .spawn(move || {
                let _slot = slot;
                handler.handle(stream);
            });
        if let Err(error) = spawned {
            warn!(
                target: LISTENER_TARGET,
                connection = id,
                %error,
                "dropping connection; no thread available"
            );
        }
    }
}

/// Counts a connection as open for as long as it lives.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn claim(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(open))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?
        .next()
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    if path.exists() {
        reclaim_stale_socket(path)?;
    }
    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

/// Deletes a socket file left behind by a previous run. A socket that still
/// answers belongs to a live service and is left alone.
#[cfg(unix)]
fn reclaim_stale_socket(path: &Path) -> Result<(), ListenerError> {
    let display = path.display().to_string();
    let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
        path: display.clone(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::UnixNotSocket { path: display });
    }
    match UnixStream::connect(path) {
        Ok(_) => Err(ListenerError::UnixInUse { path: display }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            debug!(target: LISTENER_TARGET, path = %path.display(), "removing stale unix socket");
            fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                path: display,
                source,
            })
        }
        Err(source) => Err(ListenerError::UnixConnect {
            path: display,
            source,
        }),
    }
}
