// src/pool/switcher.rs
//! Priority-ordered failover between pools.
//!
//! A checker thread looks at the pools' liveness every check interval. A
//! dead active pool hands over to the next pool in the list; any pool of
//! higher priority that is alive again is re-promoted right away. With no
//! active pool left, `try_get_work` waits briefly and returns `None`.

use crate::pool::pool::{AliveTracker, Pool, generate_pool_uid};
use crate::pool::work::{Work, WorkSolution};
use crate::stats::PoolRecords;
use crate::types::PowType;
use crate::utils::MinerError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

/// Timing of the switcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitcherSettings {
    /// Time between liveness checks
    pub check_interval: Duration,
    /// Silence after which a pool counts as dead
    pub dead_after: Duration,
    /// How long `try_get_work` waits when there is no active pool
    pub no_pool_wait: Duration,
}

impl Default for SwitcherSettings {
    fn default() -> Self {
        SwitcherSettings {
            check_interval: Duration::from_secs(20),
            dead_after: Duration::from_secs(60),
            no_pool_wait: Duration::from_secs(1),
        }
    }
}

struct SwitcherState {
    pools: Vec<Arc<dyn Pool>>,
    active: usize,
    shutdown: bool,
}

impl SwitcherState {
    fn active_pool(&self) -> Option<&Arc<dyn Pool>> {
        self.pools.get(self.active)
    }

    /// Moves the active index according to the pools' liveness
    fn alive_check_and_maybe_switch(&mut self, dead_after: Duration) {
        let mut i = 0;
        while i < self.pools.len() && i <= self.active {
            let pool = &self.pools[i];
            if pool.alive().is_dead(dead_after) {
                if i == self.active {
                    self.active += 1;
                    log::info!("Pool #{} ({}) is inactive, trying next backup pool", i, pool.name());
                }
            } else if i != self.active {
                self.active = i;
                log::info!("Pool #{} ({}) chosen as new active pool", i, pool.name());
            }
            i += 1;
        }

        if self.active >= self.pools.len() {
            log::warn!("No more backup pools available, waiting for pools to come back");
        }
    }
}

struct SwitcherShared {
    state: Mutex<SwitcherState>,
    wake: Condvar,
    settings: SwitcherSettings,
}

impl SwitcherShared {
    fn lock(&self) -> MutexGuard<'_, SwitcherState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A [`Pool`] that delegates to the first live pool of a priority list
pub struct PoolSwitcher {
    uid: u64,
    name: String,
    pow_type: PowType,
    shared: Arc<SwitcherShared>,
    alive: Arc<AliveTracker>,
    records: Arc<PoolRecords>,
    checker: Option<JoinHandle<()>>,
}

impl PoolSwitcher {
    /// Creates an empty switcher and starts its checker thread
    ///
    /// # Errors
    /// Returns an error if the checker thread cannot be spawned
    pub fn new(pow_type: PowType, settings: SwitcherSettings) -> Result<Self, MinerError> {
        let shared = Arc::new(SwitcherShared {
            state: Mutex::new(SwitcherState {
                pools: Vec::new(),
                active: 0,
                shutdown: false,
            }),
            wake: Condvar::new(),
            settings,
        });
        let alive = Arc::new(AliveTracker::new());

        let worker = shared.clone();
        let worker_alive = alive.clone();
        let checker = std::thread::Builder::new()
            .name("pool-switcher".into())
            .spawn(move || {
                let mut state = worker.lock();
                while !state.shutdown {
                    if !state.pools.is_empty() {
                        log::debug!("Checking pool connection status");
                        state.alive_check_and_maybe_switch(worker.settings.dead_after);
                        if let Some(at) = state.active_pool().and_then(|p| p.alive().last_known_alive()) {
                            worker_alive.set_last_known_alive(at);
                        }
                    }
                    state = worker
                        .wake
                        .wait_timeout_while(state, worker.settings.check_interval, |s| !s.shutdown)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|p| p.into_inner().0);
                }
            })?;

        Ok(PoolSwitcher {
            uid: generate_pool_uid(),
            name: format!("PoolSwitcher({})", pow_type),
            pow_type,
            shared,
            alive,
            records: PoolRecords::new(format!("PoolSwitcher({})", pow_type)),
            checker: Some(checker),
        })
    }

    /// Appends a pool with the lowest priority so far
    ///
    /// The first pool is assumed alive so work can flow before the first check.
    ///
    /// # Errors
    /// Returns an error if the pool serves a different pow type
    pub fn push(&self, pool: Arc<dyn Pool>) -> Result<(), MinerError> {
        if pool.pow_type() != self.pow_type {
            return Err(MinerError::InputError(format!(
                "{} serves {}, switcher serves {}",
                pool.name(),
                pool.pow_type(),
                self.pow_type
            )));
        }
        pool.records().add_listener(&self.records);

        let mut state = self.shared.lock();
        if state.pools.is_empty() {
            pool.alive().set_last_known_alive(SystemTime::now());
        }
        log::info!("Added pool #{}: {}", state.pools.len(), pool.name());
        state.pools.push(pool);
        drop(state);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Runs one liveness check right now
    pub fn alive_check_and_maybe_switch(&self) {
        self.shared
            .lock()
            .alive_check_and_maybe_switch(self.shared.settings.dead_after);
    }

    /// Index of the active pool, `None` if every pool is dead
    pub fn active_index(&self) -> Option<usize> {
        let state = self.shared.lock();
        (state.active < state.pools.len()).then_some(state.active)
    }

    /// Number of pools held
    pub fn pool_count(&self) -> usize {
        self.shared.lock().pools.len()
    }

    fn active_pool(&self) -> Option<Arc<dyn Pool>> {
        self.shared.lock().active_pool().cloned()
    }
}

impl Pool for PoolSwitcher {
    fn try_get_work(&self) -> Option<Work> {
        if let Some(pool) = self.active_pool() {
            return pool.try_get_work();
        }

        log::debug!("No active pool, cannot provide work");
        // waits without busy looping, pushes and shutdown cut it short
        let state = self.shared.lock();
        let _ = self
            .shared
            .wake
            .wait_timeout(state, self.shared.settings.no_pool_wait);
        None
    }

    fn submit_solution(&self, solution: WorkSolution) {
        if solution.expired() {
            log::debug!("Solution of job {} not submitted, job is stale", solution.job.job_id);
            return;
        }
        let solution_uid = solution.pool_uid();

        let target = {
            let state = self.shared.lock();
            state.active_pool().map(|p| (p.pool_uid() == solution_uid, p.clone()))
        };
        match target {
            Some((true, pool)) => pool.submit_solution(solution),
            Some((false, pool)) => log::info!(
                "Solution belongs to pool uid {} and will not be submitted to {} (uid {})",
                solution_uid,
                pool.name(),
                pool.pool_uid()
            ),
            None => log::info!("Solution could not be submitted, there is no active pool"),
        }
    }

    fn pool_uid(&self) -> u64 {
        self.uid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn pow_type(&self) -> PowType {
        self.pow_type
    }

    fn alive(&self) -> &AliveTracker {
        &self.alive
    }

    fn records(&self) -> &Arc<PoolRecords> {
        &self.records
    }
}

impl Drop for PoolSwitcher {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_all();
        if let Some(checker) = self.checker.take() {
            if checker.join().is_err() {
                log::error!("Pool switcher checker thread panicked");
            }
        }
    }
}
