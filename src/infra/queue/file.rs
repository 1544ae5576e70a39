//! File-backed lifecycle queue.
//!
//! Jobs are persisted as JSON lines so queued provisioning work survives a
//! restart. A leased job stays on disk until it is acknowledged, so a job in
//! progress when the process died is handed out again on reopen. The whole
//! file is rewritten on ack and requeue; queues are small.

use std::collections::HashSet;
use std::fs::{create_dir_all, rename, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::core::error::{ControlPlaneError, Result};
use crate::core::lifecycle::{queue_full, JobQueue, LifecycleJob};

fn backend(e: impl std::fmt::Display) -> ControlPlaneError {
    ControlPlaneError::Backend(e.to_string())
}

/// Durable queue using one JSONL file per stream.
pub struct FileJobQueue {
    path: PathBuf,
    stream: String,
    max_depth: usize,
    jobs: Vec<LifecycleJob>,
    leased: HashSet<String>,
}

impl FileJobQueue {
    /// Open (or create) the queue `stream` under directory `path`.
    ///
    /// # Errors
    ///
    /// Directory creation, read or parse failures.
    pub fn new(path: impl AsRef<Path>, stream: impl Into<String>, max_depth: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(&path).map_err(backend)?;
        let mut queue = Self {
            path,
            stream: stream.into(),
            max_depth,
            jobs: Vec::new(),
            leased: HashSet::new(),
        };
        queue.load_from_disk()?;
        Ok(queue)
    }

    fn file_path(&self) -> PathBuf {
        self.path.join(format!("{}.jsonl", self.stream))
    }

    fn load_from_disk(&mut self) -> Result<()> {
        let file_path = self.file_path();
        if !file_path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new().read(true).open(&file_path).map_err(backend)?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(backend)?;
            if line.trim().is_empty() {
                continue;
            }
            let job: LifecycleJob = serde_json::from_str(&line).map_err(backend)?;
            self.jobs.push(job);
        }
        Ok(())
    }

    fn append_to_disk(&self, job: &LifecycleJob) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path())
            .map_err(backend)?;
        let line = serde_json::to_string(job).map_err(backend)?;
        writeln!(file, "{line}").map_err(backend)
    }

    /// Write the full job list to a temporary file, then swap it in.
    fn rewrite_disk(&self, jobs: &[LifecycleJob]) -> Result<()> {
        let tmp = self.path.join(format!("{}.jsonl.tmp", self.stream));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(backend)?;
            for job in jobs {
                let line = serde_json::to_string(job).map_err(backend)?;
                writeln!(file, "{line}").map_err(backend)?;
            }
            file.sync_all().map_err(backend)?;
        }
        rename(&tmp, self.file_path()).map_err(backend)
    }

    fn leased_index(&self, job_id: &str) -> Result<usize> {
        if !self.leased.contains(job_id) {
            return Err(ControlPlaneError::NotFound(format!("leased job `{job_id}`")));
        }
        self.jobs
            .iter()
            .position(|job| job.id == job_id)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("job `{job_id}`")))
    }

    /// Jobs leased and not yet settled.
    pub fn leased(&self) -> usize {
        self.leased.len()
    }
}

impl JobQueue for FileJobQueue {
    fn enqueue(&mut self, job: LifecycleJob) -> Result<()> {
        if self.len() >= self.max_depth() {
            return Err(queue_full());
        }
        self.append_to_disk(&job)?;
        self.jobs.push(job);
        Ok(())
    }

    fn dequeue_ready(&mut self, now_ms: u128) -> Result<Option<LifecycleJob>> {
        // Insertion order breaks ties, matching the in-memory queue.
        let next = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.not_before_ms <= now_ms && !self.leased.contains(&job.id))
            .min_by_key(|(idx, job)| (job.not_before_ms, *idx))
            .map(|(_, job)| job.clone());
        if let Some(job) = &next {
            self.leased.insert(job.id.clone());
        }
        Ok(next)
    }

    fn ack(&mut self, job_id: &str) -> Result<()> {
        let idx = self.leased_index(job_id)?;
        let mut remaining = self.jobs.clone();
        remaining.remove(idx);
        self.rewrite_disk(&remaining)?;
        self.jobs = remaining;
        self.leased.remove(job_id);
        Ok(())
    }

    fn requeue(&mut self, job: LifecycleJob) -> Result<()> {
        let idx = self.leased_index(&job.id)?;
        let mut updated = self.jobs.clone();
        updated[idx] = job;
        self.rewrite_disk(&updated)?;
        self.leased.remove(&updated[idx].id);
        self.jobs = updated;
        Ok(())
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }

    fn max_depth(&self) -> usize {
        self.max_depth
    }
}
