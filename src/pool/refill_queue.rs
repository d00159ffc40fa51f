// src/pool/refill_queue.rs
//! A blocking queue that replicates a master item whenever it runs low.
//!
//! Consumers pop from the back; a background thread borrows the master and
//! calls the refill function without holding the lock, then pushes the new
//! items to the front. Replacing the master bumps a generation counter so
//! output derived from an outdated master never reaches consumers.

use crate::utils::MinerError;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Pause before retrying a refill that produced nothing
const EMPTY_REFILL_BACKOFF: Duration = Duration::from_millis(50);

struct QueueState<T> {
    buffer: VecDeque<T>,
    master: Option<T>,
    generation: u64,
    shutdown: bool,
}

struct QueueShared<T> {
    state: Mutex<QueueState<T>>,
    needs_refill: Condvar,
    not_empty: Condvar,
    threshold: usize,
}

impl<T> QueueShared<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // a panic inside a refill never happens under the lock, the state stays consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Queue that keeps itself filled from a master item
pub struct AutoRefillQueue<T: Send + 'static> {
    shared: Arc<QueueShared<T>>,
    refill_thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> AutoRefillQueue<T> {
    /// Creates the queue and starts its refill thread
    ///
    /// # Arguments
    /// * `threshold` - Refill is triggered once fewer items than this are buffered
    /// * `refill` - Called as `refill(out, master, current_len)`; push new items into `out`
    ///   and advance `master` so the next call produces different items
    ///
    /// # Errors
    /// Returns an error if the refill thread cannot be spawned
    pub fn new<F>(threshold: usize, mut refill: F) -> Result<Self, MinerError>
    where
        F: FnMut(&mut Vec<T>, &mut T, usize) + Send + 'static,
    {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                master: None,
                generation: 0,
                shutdown: false,
            }),
            needs_refill: Condvar::new(),
            not_empty: Condvar::new(),
            threshold: threshold.max(1),
        });

        let worker = shared.clone();
        let refill_thread = thread::Builder::new()
            .name("refill-queue".into())
            .spawn(move || {
                let mut out = Vec::with_capacity(worker.threshold);
                let mut state = worker.lock();
                loop {
                    state = worker
                        .needs_refill
                        .wait_while(state, |s| {
                            !s.shutdown && !(s.buffer.len() < worker.threshold && s.master.is_some())
                        })
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    if state.shutdown {
                        return;
                    }

                    let Some(mut master) = state.master.take() else {
                        continue;
                    };
                    let generation = state.generation;
                    let current_len = state.buffer.len();
                    drop(state);

                    refill(&mut out, &mut master, current_len);

                    state = worker.lock();
                    if state.generation != generation {
                        log::trace!("Discarding {} refilled items of a replaced master", out.len());
                        out.clear();
                        continue;
                    }
                    if state.master.is_none() {
                        state.master = Some(master);
                    }
                    if out.is_empty() {
                        state = worker
                            .needs_refill
                            .wait_timeout(state, EMPTY_REFILL_BACKOFF)
                            .map(|(guard, _)| guard)
                            .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                        continue;
                    }
                    for item in out.drain(..) {
                        state.buffer.push_front(item);
                    }
                    worker.not_empty.notify_all();
                }
            })?;

        Ok(AutoRefillQueue {
            shared,
            refill_thread: Some(refill_thread),
        })
    }

    /// Replaces the master item, optionally dropping every buffered item
    pub fn set_master(&self, master: T, clear: bool) {
        self.set_master_with(master, clear, || {});
    }

    /// Same as [`set_master`](Self::set_master), running `under_lock` while the queue is locked
    ///
    /// Lets callers publish related state atomically with the master swap.
    pub fn set_master_with(&self, master: T, clear: bool, under_lock: impl FnOnce()) {
        let below = {
            let mut state = self.shared.lock();
            state.master = Some(master);
            state.generation += 1;
            if clear {
                state.buffer.clear();
            }
            under_lock();
            state.buffer.len() < self.shared.threshold
        };
        if below {
            self.shared.needs_refill.notify_one();
        }
    }

    /// Takes the oldest buffered item, waiting up to `timeout` for one to arrive
    pub fn pop_with_timeout(&self, timeout: Duration) -> Option<T> {
        let (item, below) = {
            let state = self.shared.lock();
            let (mut state, _) = self
                .shared
                .not_empty
                .wait_timeout_while(state, timeout, |s| s.buffer.is_empty() && !s.shutdown)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let item = state.buffer.pop_back()?;
            let below = state.buffer.len() < self.shared.threshold && state.master.is_some();
            (item, below)
        };
        if below {
            self.shared.needs_refill.notify_one();
        }
        Some(item)
    }

    /// Number of buffered items
    pub fn len(&self) -> usize {
        self.shared.lock().buffer.len()
    }

    /// Whether no items are buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a master was ever provided
    ///
    /// May briefly report `false` while the refill thread borrows the master.
    pub fn has_master(&self) -> bool {
        self.shared.lock().master.is_some()
    }
}

impl<T: Send + 'static> Drop for AutoRefillQueue<T> {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.needs_refill.notify_all();
        self.shared.not_empty.notify_all();
        if let Some(handle) = self.refill_thread.take() {
            if handle.join().is_err() {
                log::error!("Refill thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Instant;

    fn counting_queue(threshold: usize, batch: usize) -> AutoRefillQueue<u64> {
        AutoRefillQueue::new(threshold, move |out: &mut Vec<u64>, master: &mut u64, current| {
            for _ in current..batch {
                *master += 1;
                out.push(*master);
            }
        })
        .unwrap()
    }

    fn wait_for_len(queue: &AutoRefillQueue<u64>, len: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.len() < len {
            assert!(Instant::now() < deadline, "queue never reached {} items", len);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_pop_times_out_without_master() {
        let queue = counting_queue(4, 8);
        let started = Instant::now();
        assert_eq!(queue.pop_with_timeout(Duration::from_millis(50)), None);
        assert!(started.elapsed() >= Duration::from_millis(50), "pop should wait for the timeout");
        assert!(!queue.has_master());
    }

    #[test]
    fn test_refills_from_master_in_order() {
        let queue = counting_queue(4, 8);
        queue.set_master(0, false);
        wait_for_len(&queue, 8);

        let popped: Vec<u64> = (0..3)
            .map(|_| queue.pop_with_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(popped, vec![1, 2, 3], "oldest items come out first");
    }

    #[test]
    fn test_refill_triggered_below_threshold() {
        let queue = counting_queue(4, 6);
        queue.set_master(100, false);
        wait_for_len(&queue, 6);

        for _ in 0..3 {
            queue.pop_with_timeout(Duration::from_secs(1)).unwrap();
        }
        // 3 left, below 4: refill tops up to 6 again
        wait_for_len(&queue, 6);
        let values: Vec<u64> = (0..6)
            .map(|_| queue.pop_with_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(values, vec![104, 105, 106, 107, 108, 109]);
    }

    #[test]
    fn test_set_master_clear_drops_buffer() {
        let queue = counting_queue(2, 4);
        queue.set_master(0, false);
        wait_for_len(&queue, 4);

        queue.set_master(1000, true);
        let first = queue.pop_with_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first, 1001, "cleared items must not be returned");
    }

    #[test]
    fn test_stale_refill_output_is_discarded() {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded::<()>();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let queue = AutoRefillQueue::new(1, move |out: &mut Vec<u64>, master: &mut u64, _| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            *master += 1;
            out.push(*master);
        })
        .unwrap();

        queue.set_master(0, false);
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        // the refill thread now holds master 0
        queue.set_master(500, true);
        release_tx.send(()).unwrap();

        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        release_tx.send(()).unwrap();
        let item = queue.pop_with_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(item, 501, "item derived from the replaced master leaked");
        drop(release_tx);
    }

    #[test]
    fn test_drop_during_refill_joins_and_stops() {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded::<()>();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let calls = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let (counted, done) = (calls.clone(), finished.clone());
        let queue = AutoRefillQueue::new(4, move |out: &mut Vec<u64>, master: &mut u64, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            *master += 1;
            out.push(*master);
            done.store(true, Ordering::SeqCst);
        })
        .unwrap();

        queue.set_master(0, false);
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let (dropped_tx, dropped_rx) = crossbeam_channel::bounded::<()>(1);
        let dropper = thread::spawn(move || {
            drop(queue);
            dropped_tx.send(()).unwrap();
        });

        thread::sleep(Duration::from_millis(100));
        assert!(dropped_rx.try_recv().is_err(), "drop must wait for the refill in flight");

        release_tx.send(()).unwrap();
        dropped_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(finished.load(Ordering::SeqCst), "drop returned before the refill finished");
        dropper.join().unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no refill may start once shutdown began");
        assert!(entered_rx.try_recv().is_err());
    }
}
