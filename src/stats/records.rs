// src/stats/records.rs
//! Share bookkeeping per pool.
//!
//! Every pool owns a [`PoolRecords`]. Parents (such as a pool switcher)
//! subscribe to their children with [`PoolRecords::add_listener`], which
//! forwards each reported share over a channel to a background thread.

use crate::utils::MinerError;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Outcome of one submitted share
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShareRecord {
    /// Difficulty of the job the share was found for
    pub difficulty: f64,
    /// Whether the pool accepted the share
    pub accepted: bool,
    /// Whether the pool flagged the share as a duplicate
    pub duplicate: bool,
}

/// Point-in-time copy of a pool's share counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ShareStats {
    /// Accepted shares
    pub accepted: u64,
    /// Rejected shares, duplicates included
    pub rejected: u64,
    /// Rejected shares that were duplicates
    pub duplicate: u64,
    /// Sum of the difficulty of all accepted shares
    pub accepted_difficulty: f64,
}

/// Thread-safe share counters of one pool
#[derive(Debug)]
pub struct PoolRecords {
    name: String,
    accepted: AtomicU64,
    rejected: AtomicU64,
    duplicate: AtomicU64,
    accepted_difficulty_bits: AtomicU64,
    listeners: Mutex<Vec<Sender<ShareRecord>>>,
}

impl PoolRecords {
    /// Creates empty records labelled `name`
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(PoolRecords {
            name: name.into(),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            duplicate: AtomicU64::new(0),
            accepted_difficulty_bits: AtomicU64::new(0f64.to_bits()),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Label used in log lines
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counts a share and forwards it to all listeners
    pub fn report_share(&self, record: ShareRecord) {
        if record.accepted {
            self.accepted.fetch_add(1, Ordering::Relaxed);
            let _ = self.accepted_difficulty_bits.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + record.difficulty).to_bits())
            });
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            if record.duplicate {
                self.duplicate.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        listeners.retain(|tx| match forward(tx, record) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Dropping stats listener of {}: {}", self.name, e);
                false
            }
        });
    }

    /// Mirrors every share reported here into `parent`
    ///
    /// The forwarding thread ends once either side is dropped.
    pub fn add_listener(&self, parent: &Arc<PoolRecords>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(tx);
        start_forwarder(Arc::downgrade(parent), rx);
    }

    /// Current counter values
    pub fn snapshot(&self) -> ShareStats {
        ShareStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            accepted_difficulty: f64::from_bits(self.accepted_difficulty_bits.load(Ordering::Relaxed)),
        }
    }
}

fn forward(tx: &Sender<ShareRecord>, record: ShareRecord) -> Result<(), MinerError> {
    tx.send(record)?;
    Ok(())
}

/// Starts a listener for share records on a background thread
fn start_forwarder(parent: Weak<PoolRecords>, receiver: Receiver<ShareRecord>) {
    std::thread::spawn(move || {
        for record in receiver {
            match parent.upgrade() {
                Some(parent) => parent.report_share(record),
                None => break,
            }
        }
    });
}
