//! Fixed-size worker pools fed through a bounded job queue.

use std::io;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::thread;

use crossbeam::channel::{self, Sender, TrySendError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Why a job was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The backlog is at capacity.
    Full,
    /// The pool has been shut down.
    Closed,
}

/// Named pool of worker threads draining a bounded queue.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `size` workers named `{name}-{index}` sharing a queue of
    /// `capacity` pending jobs.
    ///
    /// # Errors
    ///
    /// Returns the spawn error when the OS refuses a worker thread; workers
    /// already started are shut down.
    pub fn new(name: &str, size: usize, capacity: usize) -> io::Result<Self> {
        let (sender, receiver) = channel::bounded::<Job>(capacity);
        let pool = Self {
            name: name.to_owned(),
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(Vec::with_capacity(size)),
        };
        for index in 0..size.max(1) {
            let receiver = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })?;
            pool.lock_workers().push(worker);
        }
        Ok(pool)
    }

    /// Pool name, as used for worker thread names.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `job` without blocking.
    ///
    /// # Errors
    ///
    /// Reports whether the queue was full or the pool already shut down.
    pub fn try_execute<F>(&self, job: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SubmitError::Closed)?;
        sender.try_send(Box::new(job)).map_err(|error| match error {
            TrySendError::Full(_) => SubmitError::Full,
            TrySendError::Disconnected(_) => SubmitError::Closed,
        })
    }

    /// Stops accepting jobs, lets queued ones finish and joins the workers.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let workers = std::mem::take(&mut *self.lock_workers());
        for worker in workers {
            let _ = worker.join();
        }
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<thread::JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crossbeam::channel::bounded;

    use super::*;

    #[test]
    fn executes_queued_jobs() {
        let pool = WorkerPool::new("test", 2, 8).expect("spawn pool");
        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = bounded(8);
        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            let done_tx = done_tx.clone();
            pool.try_execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = done_tx.send(());
            })
            .expect("queue job");
        }
        for _ in 0..5 {
            done_rx
                .recv_timeout(Duration::from_secs(1))
                .expect("job completes");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn reports_full_backlog() {
        let pool = WorkerPool::new("busy", 1, 1).expect("spawn pool");
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded::<()>(1);
        pool.try_execute(move || {
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
        })
        .expect("first job");
        started_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("worker busy");

        pool.try_execute(|| {}).expect("second job fills the queue");
        assert_eq!(pool.try_execute(|| {}), Err(SubmitError::Full));
        drop(gate_tx);
    }

    #[test]
    fn rejects_jobs_after_shutdown() {
        let pool = WorkerPool::new("closed", 1, 1).expect("spawn pool");
        pool.shutdown();
        assert_eq!(pool.try_execute(|| {}), Err(SubmitError::Closed));
    }
}
