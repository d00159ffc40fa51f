// src/pool/job.rs
//! Server-issued jobs and their expiry.
//!
//! A pool owns one [`JobTracker`] that remembers which job is current. Every
//! [`PoolJob`] holds only a weak reference to it, so a job is expired as
//! soon as a newer job becomes current or the pool (and with it the
//! tracker) is gone. Expiry is computed on every call, never stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Remembers the sequence number of a pool's current job
#[derive(Debug, Default)]
pub struct JobTracker {
    latest: AtomicU64,
}

impl JobTracker {
    /// Creates a tracker without a current job
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sequence number of the current job, 0 if there is none yet
    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::Acquire)
    }

    /// Makes `seq` the current job
    pub(crate) fn set_latest(&self, seq: u64) {
        self.latest.store(seq, Ordering::Release);
    }
}

/// One job as announced by a pool
///
/// Stays readable after it expired; only [`expired`](Self::expired) changes.
#[derive(Debug)]
pub struct PoolJob {
    seq: u64,
    pool_uid: u64,
    tracker: Weak<JobTracker>,
    /// Job id as sent by the server
    pub job_id: String,
    /// Share difficulty of this job
    pub difficulty: f64,
    /// Block height, for protocols that announce it
    pub height: Option<u64>,
}

impl PoolJob {
    /// Creates a job tracked by `tracker`; `seq` must be unique per tracker and non-zero
    pub(crate) fn new(
        seq: u64,
        pool_uid: u64,
        tracker: &Arc<JobTracker>,
        job_id: String,
        difficulty: f64,
        height: Option<u64>,
    ) -> Self {
        PoolJob {
            seq,
            pool_uid,
            tracker: Arc::downgrade(tracker),
            job_id,
            difficulty,
            height,
        }
    }

    /// Whether this job was superseded or its pool no longer exists
    pub fn expired(&self) -> bool {
        self.tracker
            .upgrade()
            .is_none_or(|tracker| tracker.latest() != self.seq)
    }

    /// Uid of the pool that issued the job
    pub fn pool_uid(&self) -> u64 {
        self.pool_uid
    }

    /// Position of the job in its pool's job sequence
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_expires_when_superseded() {
        let tracker = JobTracker::new();
        let first = PoolJob::new(1, 7, &tracker, "a".into(), 1.0, None);
        let second = PoolJob::new(2, 7, &tracker, "b".into(), 1.0, None);

        assert!(first.expired(), "not current until installed");
        tracker.set_latest(1);
        assert!(!first.expired());
        tracker.set_latest(2);
        assert!(first.expired(), "superseded job is expired");
        assert!(!second.expired());
        assert_eq!(first.job_id, "a", "expired jobs stay readable");
    }

    #[test]
    fn test_job_orphaned_when_tracker_dropped() {
        let tracker = JobTracker::new();
        let job = PoolJob::new(1, 3, &tracker, "x".into(), 2.0, Some(10));
        tracker.set_latest(1);
        assert!(!job.expired());

        drop(tracker);
        assert!(job.expired(), "orphaned job is expired");
        assert_eq!(job.pool_uid(), 3);
        assert_eq!(job.height, Some(10));
    }
}
