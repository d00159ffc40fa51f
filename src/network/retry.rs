// src/network/retry.rs
//! Bookkeeping for "retry every interval until the predicate says stop".
//!
//! The engine only tracks entries; the io service drives them with a timer
//! task per entry and calls [`RetryEngine::poll`] on every tick. While a
//! predicate runs it is loaned out of the table so the lock is never held
//! across user code. A cancel that lands during the loan is recorded on the
//! entry and completed by the poll that gives the predicate back.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Predicate of a scheduled retry; returns `true` once no further retry is needed
pub type RetryPredicate = Box<dyn FnMut() -> bool + Send>;

/// Callback run exactly once if a retry is cancelled before its predicate finished it
pub type CancelCallback = Box<dyn FnOnce() + Send>;

/// Identifies one scheduled retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryToken(u64);

/// Outcome of one retry tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// The predicate returned false; tick again after the interval
    Again,
    /// The entry is gone (finished, cancelled, or never existed)
    Done,
}

struct RetryEntry {
    pred: Option<RetryPredicate>,
    on_cancelled: Option<CancelCallback>,
    cancel_requested: bool,
}

/// Table of active retries
#[derive(Default)]
pub struct RetryEngine {
    entries: Mutex<HashMap<RetryToken, RetryEntry>>,
    next_token: AtomicU64,
}

impl RetryEngine {
    /// Creates an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a retry and returns its token; nothing runs until [`poll`](Self::poll)
    pub fn register(&self, pred: RetryPredicate, on_cancelled: CancelCallback) -> RetryToken {
        let token = RetryToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            token,
            RetryEntry {
                pred: Some(pred),
                on_cancelled: Some(on_cancelled),
                cancel_requested: false,
            },
        );
        token
    }

    /// Runs the predicate of `token` once
    ///
    /// The predicate is taken out of the table for the duration of the call.
    /// When it returns true the entry is removed without invoking the
    /// cancellation callback.
    pub fn poll(&self, token: RetryToken) -> RetryStep {
        let mut pred = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(&token) else {
                return RetryStep::Done;
            };
            match entry.pred.take() {
                Some(pred) if !entry.cancel_requested => pred,
                // cancelled earlier, or polled re-entrantly from its own predicate
                _ => return RetryStep::Done,
            }
        };

        let finished = pred();

        let cancelled = {
            let mut entries = self.lock();
            let cancel_requested = match entries.get(&token) {
                None => return RetryStep::Done,
                Some(entry) => entry.cancel_requested,
            };
            if cancel_requested {
                entries.remove(&token).and_then(|e| e.on_cancelled)
            } else if finished {
                entries.remove(&token);
                return RetryStep::Done;
            } else {
                if let Some(entry) = entries.get_mut(&token) {
                    entry.pred = Some(pred);
                }
                return RetryStep::Again;
            }
        };

        if let Some(on_cancelled) = cancelled {
            on_cancelled();
        }
        RetryStep::Done
    }

    /// Cancels one retry
    ///
    /// If the predicate is currently on loan the cancellation is completed
    /// by the poll that returns it; otherwise the callback runs right here.
    pub fn cancel(&self, token: RetryToken) {
        let callback = {
            let mut entries = self.lock();
            let on_loan = match entries.get_mut(&token) {
                None => return,
                Some(entry) if entry.pred.is_none() => {
                    entry.cancel_requested = true;
                    true
                }
                Some(_) => false,
            };
            if on_loan {
                None
            } else {
                entries.remove(&token).and_then(|e| e.on_cancelled)
            }
        };

        if let Some(on_cancelled) = callback {
            on_cancelled();
        }
    }

    /// Cancels every entry, loaned or not, running all callbacks before returning
    ///
    /// Only called once the driving timers can no longer fire.
    pub fn cancel_all(&self) {
        let drained: Vec<RetryEntry> = self.lock().drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            log::debug!("Cancelling {} outstanding retries", drained.len());
        }
        for entry in drained {
            if let Some(on_cancelled) = entry.on_cancelled {
                on_cancelled();
            }
        }
    }

    /// Number of retries still registered
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no retry is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RetryToken, RetryEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn bump(c: &Arc<AtomicUsize>) -> CancelCallback {
        let c = c.clone();
        Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_poll_until_predicate_true() {
        let engine = RetryEngine::new();
        let cancelled = counter();
        let mut calls = 0;
        let token = engine.register(
            Box::new(move || {
                calls += 1;
                calls == 3
            }),
            bump(&cancelled),
        );

        assert_eq!(engine.poll(token), RetryStep::Again);
        assert_eq!(engine.poll(token), RetryStep::Again);
        assert_eq!(engine.poll(token), RetryStep::Done, "third call finishes");
        assert!(engine.is_empty(), "finished entries are removed");
        assert_eq!(
            cancelled.load(Ordering::SeqCst),
            0,
            "finishing normally must not run the cancel callback"
        );
    }

    #[test]
    fn test_cancel_idle_entry_runs_callback_once() {
        let engine = RetryEngine::new();
        let cancelled = counter();
        let token = engine.register(Box::new(|| false), bump(&cancelled));

        engine.cancel(token);
        engine.cancel(token);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1, "callback runs exactly once");
        assert_eq!(engine.poll(token), RetryStep::Done, "cancelled entry never polls again");
    }

    #[test]
    fn test_cancel_while_predicate_on_loan() {
        let engine = Arc::new(RetryEngine::new());
        let cancelled = counter();
        let slot: Arc<Mutex<Option<RetryToken>>> = Arc::new(Mutex::new(None));

        let engine2 = engine.clone();
        let slot2 = slot.clone();
        let token = engine.register(
            Box::new(move || {
                // cancels itself while loaned out
                if let Some(t) = *slot2.lock().unwrap() {
                    engine2.cancel(t);
                }
                false
            }),
            bump(&cancelled),
        );
        *slot.lock().unwrap() = Some(token);

        assert_eq!(engine.poll(token), RetryStep::Done);
        assert_eq!(
            cancelled.load(Ordering::SeqCst),
            1,
            "loaned cancellation completes when the predicate is given back"
        );
        assert!(engine.is_empty());
    }

    #[test]
    fn test_cancel_all_runs_every_callback() {
        let engine = RetryEngine::new();
        let cancelled = counter();
        for _ in 0..4 {
            engine.register(Box::new(|| false), bump(&cancelled));
        }

        engine.cancel_all();
        assert_eq!(cancelled.load(Ordering::SeqCst), 4);
        assert!(engine.is_empty(), "cancel_all leaves nothing behind");
    }
}
