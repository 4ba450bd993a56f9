//! Shared doubles for query-layer tests.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::writer::{BufferPool, BufferedWriter, ResponseSink};

/// Long enough that no test triggers a time-based flush.
pub(crate) const NEVER: Duration = Duration::from_secs(3600);

/// Everything a [`RecordingSink`] was asked to send.
#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub(crate) head: Option<(u16, Option<usize>)>,
    pub(crate) body: Vec<u8>,
    pub(crate) chunks: Vec<usize>,
    pub(crate) finished: bool,
}

/// Sink that records the response in memory, optionally failing body writes.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    recorded: Arc<Mutex<Recorded>>,
    fail_body: bool,
}

impl RecordingSink {
    pub(crate) fn failing() -> Self {
        Self {
            fail_body: true,
            ..Self::default()
        }
    }

    pub(crate) fn snapshot<T>(&self, read: impl FnOnce(&Recorded) -> T) -> T {
        read(&self.recorded.lock().expect("recording lock"))
    }

    pub(crate) fn body_json(&self) -> serde_json::Value {
        self.snapshot(|recorded| serde_json::from_slice(&recorded.body))
            .expect("response body is valid JSON")
    }

    /// Writer over a clone of this sink.
    pub(crate) fn writer(&self, capacity: usize) -> BufferedWriter {
        BufferedWriter::new(
            Box::new(self.clone()),
            Arc::new(BufferPool::new(capacity)),
            NEVER,
        )
    }
}

impl ResponseSink for RecordingSink {
    fn send_head(&mut self, status: u16, content_length: Option<usize>) -> io::Result<()> {
        self.recorded.lock().expect("recording lock").head = Some((status, content_length));
        Ok(())
    }

    fn send_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.fail_body {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
        }
        let mut recorded = self.recorded.lock().expect("recording lock");
        recorded.body.extend_from_slice(bytes);
        recorded.chunks.push(bytes.len());
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.recorded.lock().expect("recording lock").finished = true;
        Ok(())
    }
}
