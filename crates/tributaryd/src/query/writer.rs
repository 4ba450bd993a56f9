//! Buffered response writer shared by the executor and the network actor.
//!
//! The executor (the *internal* actor) streams rows into an in-memory
//! buffer while the connection worker (the *external* actor) keeps the
//! authority to finalize the response. The HTTP status line goes out with
//! the first flush, so the buffer holds bytes back until either the buffer
//! overflows, the flush interval elapses, or the response is finished.
//!
//! Access is arbitrated by four calls guarded by one condition variable:
//!
//! - [`BufferedWriter::get_external`] blocks until the writer is started or
//!   stopped. On *stopped* it reports [`Handoff::Stopped`] so the caller
//!   abandons finalization to the producer.
//! - [`BufferedWriter::release_external`] marks the writer started.
//! - [`BufferedWriter::get_internal`] blocks while the buffer is in use,
//!   then marks it stopped so no further handoff happens.
//! - [`BufferedWriter::release_internal`] clears the in-use flag.
//!
//! Whoever acquires receives a [`Lease`]; dropping the lease performs the
//! matching release.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

pub(crate) const WRITER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::writer");

/// Status sent when nothing overrides it.
pub const DEFAULT_STATUS: u16 = 200;

/// The wire half of a response.
pub trait ResponseSink: Send {
    /// Writes the status line and headers. `content_length` is known only
    /// when the whole body is already buffered.
    fn send_head(&mut self, status: u16, content_length: Option<usize>) -> io::Result<()>;

    /// Writes body bytes.
    fn send_body(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Terminates the body.
    fn finish(&mut self) -> io::Result<()>;
}

/// Process-wide free-list of response buffers.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl BufferPool {
    /// Creates a pool handing out buffers sized for `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Configured flush threshold.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes a buffer from the pool or allocates one.
    pub fn get(&self) -> Vec<u8> {
        self.lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity))
    }

    /// Returns a buffer. Buffers that grew past twice the configured size are
    /// released instead of pooled.
    pub fn put(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > self.capacity.saturating_mul(2) {
            return;
        }
        buffer.clear();
        self.lock().push(buffer);
    }

    /// Buffers currently parked in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of a `get_*` call.
#[must_use]
pub enum Handoff<'a> {
    /// The caller holds exclusive write access until the lease drops.
    Acquired(Lease<'a>),
    /// The other actor owns finalization; the caller must not write.
    Stopped,
}

impl Handoff<'_> {
    /// True when the caller was turned away.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Actor {
    External,
    Internal,
}

/// Exclusive write access granted by a `get_*` call.
pub struct Lease<'a> {
    writer: &'a BufferedWriter,
    actor: Actor,
}

impl Lease<'_> {
    /// Appends raw bytes, flushing on overflow.
    pub fn write_bytes(&self, bytes: &[u8]) {
        let mut state = self.writer.lock();
        self.writer.append(&mut state, bytes);
    }

    /// Sends whatever is buffered and terminates the response.
    pub fn finish(&self) {
        let mut state = self.writer.lock();
        self.writer.finish_locked(&mut state);
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        match self.actor {
            Actor::External => self.writer.release_external(),
            Actor::Internal => self.writer.release_internal(),
        }
    }
}

struct WriterState {
    buffer: Vec<u8>,
    sink: Box<dyn ResponseSink>,
    status: u16,
    last_flush: Instant,
    closed: bool,
    header_pending: bool,
    started: bool,
    stopped: bool,
    in_use: bool,
    waiters: usize,
    finished: bool,
}

/// Byte buffer plus the two-actor handoff protocol.
pub struct BufferedWriter {
    state: Mutex<WriterState>,
    ready: Condvar,
    pool: Arc<BufferPool>,
    flush_interval: Duration,
}

impl BufferedWriter {
    /// Wraps `sink` with a buffer drawn from `pool`.
    pub fn new(sink: Box<dyn ResponseSink>, pool: Arc<BufferPool>, flush_interval: Duration) -> Self {
        let buffer = pool.get();
        Self {
            state: Mutex::new(WriterState {
                buffer,
                sink,
                status: DEFAULT_STATUS,
                last_flush: Instant::now(),
                closed: false,
                header_pending: true,
                started: false,
                stopped: false,
                in_use: false,
                waiters: 0,
                finished: false,
            }),
            ready: Condvar::new(),
            pool,
            flush_interval,
        }
    }

    /// Sets the response status. Ignored once the header has gone out.
    pub fn set_status(&self, status: u16) {
        let mut state = self.lock();
        if state.header_pending {
            state.status = status;
        }
    }

    /// Status that was, or will be, sent.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.lock().status
    }

    /// True once the header has been written to the sink.
    #[must_use]
    pub fn header_sent(&self) -> bool {
        !self.lock().header_pending
    }

    /// True once a sink write failed; later writes are dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True once the response has been terminated.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Unflushed bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Writes one item speculatively on behalf of the producer.
    ///
    /// `encode` appends to the buffer; on error the buffer is truncated back
    /// to where the item began. Returns the number of bytes the item added,
    /// or zero when the write was dropped because the response is already
    /// finished or its transport closed. Blocks while the other actor holds
    /// the buffer.
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `encode`.
    pub fn write_item<E>(
        &self,
        encode: impl FnOnce(&mut Vec<u8>) -> Result<(), E>,
    ) -> Result<usize, E> {
        let mut state = self.wait_while_in_use(self.lock());
        if state.finished || state.closed {
            return Ok(0);
        }
        let mark = state.buffer.len();
        if let Err(error) = encode(&mut state.buffer) {
            state.buffer.truncate(mark);
            return Err(error);
        }
        let written = state.buffer.len() - mark;
        self.settle(&mut state, mark);
        Ok(written)
    }

    /// Appends raw bytes on behalf of the producer; see [`Self::write_item`].
    pub fn write_bytes(&self, bytes: &[u8]) {
        let mut state = self.wait_while_in_use(self.lock());
        if state.finished || state.closed {
            return;
        }
        self.append(&mut state, bytes);
    }

    /// Flushes if the flush interval has elapsed and nobody holds the buffer.
    pub fn flush_if_due(&self) {
        let mut state = self.lock();
        if state.in_use || state.finished || state.buffer.is_empty() {
            return;
        }
        if state.last_flush.elapsed() >= self.flush_interval {
            self.flush(&mut state, usize::MAX);
        }
    }

    /// Blocks until the writer is started or stopped.
    pub fn get_external(&self) -> Handoff<'_> {
        let mut state = self.lock();
        state.waiters += 1;
        let mut state = self
            .ready
            .wait_while(state, |state| !state.started && !state.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        state.waiters -= 1;
        if state.stopped {
            return Handoff::Stopped;
        }
        state.in_use = true;
        state.stopped = true;
        Handoff::Acquired(Lease {
            writer: self,
            actor: Actor::External,
        })
    }

    /// Marks the writer started and wakes any parked actor.
    pub fn release_external(&self) {
        let mut state = self.lock();
        state.started = true;
        state.in_use = false;
        self.wake(&state);
    }

    /// Blocks while the buffer is in use, then claims finalization.
    pub fn get_internal(&self) -> Handoff<'_> {
        let mut state = self.wait_while_in_use(self.lock());
        if state.stopped {
            return Handoff::Stopped;
        }
        state.stopped = true;
        state.in_use = true;
        Handoff::Acquired(Lease {
            writer: self,
            actor: Actor::Internal,
        })
    }

    /// Clears the in-use flag and wakes any parked actor.
    pub fn release_internal(&self) {
        let mut state = self.lock();
        state.in_use = false;
        self.wake(&state);
    }

    fn wait_while_in_use<'a>(
        &self,
        mut state: MutexGuard<'a, WriterState>,
    ) -> MutexGuard<'a, WriterState> {
        if !state.in_use {
            return state;
        }
        state.waiters += 1;
        let mut state = self
            .ready
            .wait_while(state, |state| state.in_use)
            .unwrap_or_else(PoisonError::into_inner);
        state.waiters -= 1;
        state
    }

    fn wake(&self, state: &WriterState) {
        if state.waiters > 0 {
            self.ready.notify_all();
        }
    }

    fn append(&self, state: &mut WriterState, bytes: &[u8]) {
        if state.finished || state.closed {
            return;
        }
        let mark = state.buffer.len();
        state.buffer.extend_from_slice(bytes);
        self.settle(state, mark);
    }

    /// Applies the flush policy after bytes were appended at `mark`.
    fn settle(&self, state: &mut WriterState, mark: usize) {
        let capacity = self.pool.capacity();
        if state.buffer.len() > capacity {
            if mark > 0 {
                self.flush(state, mark);
            }
            if state.buffer.len() > capacity {
                self.flush(state, usize::MAX);
            }
        } else if state.last_flush.elapsed() >= self.flush_interval {
            self.flush(state, usize::MAX);
        }
    }

    /// Sends up to `limit` buffered bytes, preceded by the header on the
    /// first flush.
    fn flush(&self, state: &mut WriterState, limit: usize) {
        let end = limit.min(state.buffer.len());
        if state.closed {
            state.buffer.clear();
            return;
        }
        let result = send_chunk(state, end);
        state.buffer.drain(..end);
        state.last_flush = Instant::now();
        if let Err(error) = result {
            debug!(target: WRITER_TARGET, %error, "response write failed; dropping output");
            state.closed = true;
            state.buffer.clear();
        }
    }

    fn finish_locked(&self, state: &mut WriterState) {
        if state.finished {
            return;
        }
        state.finished = true;
        if !state.closed {
            let result = if state.header_pending {
                state.header_pending = false;
                let length = state.buffer.len();
                let WriterState {
                    sink, buffer, status, ..
                } = state;
                sink.send_head(*status, Some(length))
                    .and_then(|()| sink.send_body(buffer))
                    .and_then(|()| sink.finish())
            } else {
                let end = state.buffer.len();
                send_chunk(state, end).and_then(|()| state.sink.finish())
            };
            if let Err(error) = result {
                debug!(target: WRITER_TARGET, %error, "response finalization failed");
                state.closed = true;
            }
        }
        let buffer = std::mem::take(&mut state.buffer);
        self.pool.put(buffer);
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn send_chunk(state: &mut WriterState, end: usize) -> io::Result<()> {
    let WriterState {
        sink,
        buffer,
        status,
        header_pending,
        ..
    } = state;
    if *header_pending {
        *header_pending = false;
        sink.send_head(*status, None)?;
    }
    if end == 0 {
        return Ok(());
    }
    sink.send_body(&buffer[..end])
}
