//! Service lifecycle and the two admission queues.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::query::{QueryError, QueryParams, ScanConsistency};

use super::pool::{SubmitError, WorkerPool};

/// Phase of the service as seen by admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accepting work.
    Running,
    /// Draining; only requests inside a transaction are admitted.
    ShuttingDown,
    /// Not accepting work.
    ShutDown,
}

/// Process-wide lifecycle flag.
#[derive(Debug, Default)]
pub struct Lifecycle(AtomicU8);

impl Lifecycle {
    const RUNNING: u8 = 0;
    const SHUTTING_DOWN: u8 = 1;
    const SHUT_DOWN: u8 = 2;

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self.0.load(Ordering::Acquire) {
            Self::RUNNING => Phase::Running,
            Self::SHUTTING_DOWN => Phase::ShuttingDown,
            _ => Phase::ShutDown,
        }
    }

    /// Starts draining. Has no effect once shut down.
    pub fn begin_shutdown(&self) {
        let _ = self.0.compare_exchange(
            Self::RUNNING,
            Self::SHUTTING_DOWN,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Stops admitting anything.
    pub fn finish_shutdown(&self) {
        self.0.store(Self::SHUT_DOWN, Ordering::Release);
    }

    /// Rejects requests the current phase does not admit.
    ///
    /// # Errors
    ///
    /// Shutting-down for non-transactional requests while draining,
    /// shut-down for everything afterwards.
    pub fn check(&self, params: &QueryParams) -> Result<(), QueryError> {
        match self.phase() {
            Phase::Running => Ok(()),
            Phase::ShuttingDown if params.txid.is_some() => Ok(()),
            Phase::ShuttingDown => Err(QueryError::shutting_down()),
            Phase::ShutDown => Err(QueryError::shut_down()),
        }
    }
}

/// Which admission queue a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Unbounded-consistency reads.
    Unbounded,
    /// Bounded consistency or transactional work.
    Plus,
}

impl Lane {
    /// Picks the queue for `params`.
    #[must_use]
    pub fn of(params: &QueryParams) -> Self {
        if params.txid.is_some() || params.scan.consistency() != ScanConsistency::NotBounded {
            Self::Plus
        } else {
            Self::Unbounded
        }
    }
}

/// The pair of servicer pools requests are admitted to.
#[derive(Debug)]
pub struct AdmissionQueues {
    unbounded: WorkerPool,
    plus: WorkerPool,
}

impl AdmissionQueues {
    /// Spawns both pools.
    ///
    /// # Errors
    ///
    /// Returns the spawn error of the first worker that failed to start.
    pub fn new(servicers: usize, plus_servicers: usize, capacity: usize) -> io::Result<Self> {
        Ok(Self {
            unbounded: WorkerPool::new("servicer", servicers, capacity)?,
            plus: WorkerPool::new("plus-servicer", plus_servicers, capacity)?,
        })
    }

    /// Queues `job` on the pool serving `lane`.
    ///
    /// # Errors
    ///
    /// Queue-full when the backlog is at capacity, shut-down when the pools
    /// are closed.
    pub fn submit<F>(&self, lane: Lane, job: F) -> Result<(), QueryError>
    where
        F: FnOnce() + Send + 'static,
    {
        let pool = match lane {
            Lane::Unbounded => &self.unbounded,
            Lane::Plus => &self.plus,
        };
        pool.try_execute(job).map_err(|error| match error {
            SubmitError::Full => QueryError::queue_full(),
            SubmitError::Closed => QueryError::shut_down(),
        })
    }

    /// Finishes queued work and joins both pools.
    pub fn shutdown(&self) {
        self.unbounded.shutdown();
        self.plus.shutdown();
    }
}
