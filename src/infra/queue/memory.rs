//! In-memory lifecycle queue ordered by eligibility time.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use crate::core::error::{ControlPlaneError, Result};
use crate::core::lifecycle::{queue_full, JobQueue, LifecycleJob};

/// Heap entry: earliest `not_before_ms` first, FIFO by enqueue sequence within it.
struct QueuedJob {
    seq: u64,
    job: LifecycleJob,
}

impl QueuedJob {
    fn key(&self) -> (u128, u64) {
        (self.job.not_before_ms, self.seq)
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// In-memory queue storing lifecycle jobs in a min-heap.
/// O(log n) enqueue and O(log n) dequeue; leased jobs wait beside the heap.
pub struct InMemoryJobQueue {
    max_depth: usize,
    next_seq: u64,
    jobs: BinaryHeap<Reverse<QueuedJob>>,
    leased: HashMap<String, LifecycleJob>,
}

impl InMemoryJobQueue {
    /// Queue holding at most `max_depth` jobs.
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            next_seq: 0,
            jobs: BinaryHeap::with_capacity(max_depth.min(1024)),
            leased: HashMap::new(),
        }
    }

    /// Jobs leased and not yet settled.
    pub fn leased(&self) -> usize {
        self.leased.len()
    }

    fn push(&mut self, job: LifecycleJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.jobs.push(Reverse(QueuedJob { seq, job }));
    }
}

fn not_leased(job_id: &str) -> ControlPlaneError {
    ControlPlaneError::NotFound(format!("leased job `{job_id}`"))
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&mut self, job: LifecycleJob) -> Result<()> {
        if self.len() >= self.max_depth() {
            return Err(queue_full());
        }
        self.push(job);
        Ok(())
    }

    fn dequeue_ready(&mut self, now_ms: u128) -> Result<Option<LifecycleJob>> {
        let ready = self
            .jobs
            .peek()
            .is_some_and(|Reverse(next)| next.job.not_before_ms <= now_ms);
        if !ready {
            return Ok(None);
        }
        let job = self.jobs.pop().map(|Reverse(queued)| queued.job);
        if let Some(job) = &job {
            self.leased.insert(job.id.clone(), job.clone());
        }
        Ok(job)
    }

    fn ack(&mut self, job_id: &str) -> Result<()> {
        self.leased
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| not_leased(job_id))
    }

    fn requeue(&mut self, job: LifecycleJob) -> Result<()> {
        if self.leased.remove(&job.id).is_none() {
            return Err(not_leased(&job.id));
        }
        self.push(job);
        Ok(())
    }

    fn len(&self) -> usize {
        self.jobs.len() + self.leased.len()
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }
}
