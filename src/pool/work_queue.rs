// src/pool/work_queue.rs
//! Per-pool work buffer built on [`AutoRefillQueue`].

use crate::pool::job::{JobTracker, PoolJob};
use crate::pool::refill_queue::AutoRefillQueue;
use crate::pool::work::Work;
use crate::utils::MinerError;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tuning knobs of a pool's work buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkQueueSettings {
    /// Refill starts when fewer items than this are buffered
    pub refill_threshold: usize,
    /// Refill tops the buffer up to this many items
    pub max_length: usize,
    /// How long a single `try_get_work` may block
    pub pop_timeout: Duration,
}

impl Default for WorkQueueSettings {
    fn default() -> Self {
        WorkQueueSettings {
            refill_threshold: 8,
            max_length: 16,
            pop_timeout: Duration::from_millis(100),
        }
    }
}

/// Buffered work of one pool together with the job bookkeeping
pub struct WorkQueue {
    pool_uid: u64,
    settings: WorkQueueSettings,
    tracker: Arc<JobTracker>,
    queue: AutoRefillQueue<Work>,
    next_seq: AtomicU64,
}

impl WorkQueue {
    /// Creates the queue; `derive` turns the master into one more distinct work item
    ///
    /// # Errors
    /// Returns an error if the refill thread cannot be started
    pub fn new<F>(pool_uid: u64, settings: WorkQueueSettings, mut derive: F) -> Result<Self, MinerError>
    where
        F: FnMut(&mut Work) -> Work + Send + 'static,
    {
        let max_length = settings.max_length.max(settings.refill_threshold);
        let queue = AutoRefillQueue::new(settings.refill_threshold, move |out, master, current| {
            for _ in current..max_length {
                out.push(derive(master));
            }
        })?;

        Ok(WorkQueue {
            pool_uid,
            settings,
            tracker: JobTracker::new(),
            queue,
            next_seq: AtomicU64::new(1),
        })
    }

    /// Creates a job owned by this queue's pool; it is not current until pushed
    pub fn make_job(&self, job_id: String, difficulty: f64, height: Option<u64>) -> Arc<PoolJob> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        Arc::new(PoolJob::new(seq, self.pool_uid, &self.tracker, job_id, difficulty, height))
    }

    /// Installs `master` as the template for all further work
    ///
    /// Its job becomes current, which expires every older job. With `clean`
    /// the buffered items are dropped right away.
    pub fn push_job(&self, master: Work, clean: bool) {
        let seq = master.job.seq();
        let tracker = self.tracker.clone();
        self.queue
            .set_master_with(master, clean, move || tracker.set_latest(seq));
    }

    /// Pops the next unexpired work item, waiting at most the configured timeout
    pub fn try_pop(&self) -> Option<Work> {
        self.pop_with_timeout(self.settings.pop_timeout)
    }

    /// Pops the next unexpired work item, waiting at most `timeout`
    pub fn pop_with_timeout(&self, timeout: Duration) -> Option<Work> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let work = self.queue.pop_with_timeout(remaining)?;
            if !work.expired() {
                return Some(work);
            }
            log::trace!("Skipping work of expired job {}", work.job.job_id);
            if remaining.is_zero() {
                return None;
            }
        }
    }

    /// Whether any job was pushed so far
    pub fn has_job(&self) -> bool {
        self.tracker.latest() != 0
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no items are buffered
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Settings this queue was created with
    pub fn settings(&self) -> &WorkQueueSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::work::{CuckooWork, WorkPayload};

    fn nonce_queue() -> WorkQueue {
        let settings = WorkQueueSettings {
            refill_threshold: 2,
            max_length: 4,
            pop_timeout: Duration::from_millis(500),
        };
        WorkQueue::new(9, settings, |master| {
            if let WorkPayload::Cuckatoo31(c) = &mut master.payload {
                c.nonce += 1;
            }
            master.clone()
        })
        .unwrap()
    }

    fn master(queue: &WorkQueue, id: &str, nonce: u64) -> Work {
        Work {
            job: queue.make_job(id.into(), 1.0, Some(1)),
            payload: WorkPayload::Cuckatoo31(CuckooWork {
                pre_pow: vec![0xaa],
                nonce,
                difficulty: 1,
                height: 1,
            }),
        }
    }

    fn nonce_of(work: &Work) -> u64 {
        match &work.payload {
            WorkPayload::Cuckatoo31(c) => c.nonce,
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_no_work_before_first_job() {
        let queue = nonce_queue();
        assert!(!queue.has_job());
        assert!(queue.pop_with_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_items_are_distinct_and_current() {
        let queue = nonce_queue();
        queue.push_job(master(&queue, "a", 0), true);

        let first = queue.try_pop().expect("work after job push");
        let second = queue.try_pop().expect("second work item");
        assert_ne!(nonce_of(&first), nonce_of(&second), "items must differ");
        assert_eq!(first.job.job_id, "a");
        assert_eq!(first.pool_uid(), 9);
        assert!(!first.expired());
    }

    #[test]
    fn test_new_job_expires_old_work() {
        let queue = nonce_queue();
        queue.push_job(master(&queue, "a", 0), true);
        let old = queue.try_pop().unwrap();

        queue.push_job(master(&queue, "b", 1000), false);
        assert!(old.expired(), "older job is superseded");

        // leftovers of job a are skipped even without a clean flag
        let next = queue.try_pop().unwrap();
        assert_eq!(next.job.job_id, "b");
        assert!(nonce_of(&next) > 1000);
    }
}
