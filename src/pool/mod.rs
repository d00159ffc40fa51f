//! Pools: where work comes from and where solutions go
//!
//! This module contains:
//! - The job, work and solution model with expiry
//! - The auto-refilling work queue
//! - The [`Pool`] trait and the stratum implementations
//! - [`PoolSwitcher`] for failover between pools
//! - [`PoolRegistry`] for constructing pools by name or protocol

/// Ethash stratum pool
pub mod ethash;
/// Grin stratum pool for Cuckatoo31
pub mod grin;
/// Server jobs and their expiry
pub mod job;
/// The `Pool` trait and shared pool helpers
pub mod pool;
/// Blocking queue refilled from a master item
pub mod refill_queue;
/// Lookup of pool implementations
pub mod registry;
mod stratum;
/// Failover between prioritized pools
pub mod switcher;
/// Work items and solutions
pub mod work;
/// Per-pool work buffer
pub mod work_queue;

#[cfg(test)]
mod test_server;

pub use ethash::EthashStratumPool;
pub use grin::GrinStratumPool;
pub use job::{JobTracker, PoolJob};
pub use pool::{AliveTracker, Pool, PoolConstructionArgs, generate_pool_uid};
pub use refill_queue::AutoRefillQueue;
pub use registry::{PoolEntry, PoolFactory, PoolRegistry};
pub use switcher::{PoolSwitcher, SwitcherSettings};
pub use work::{
    CuckooSolution, CuckooWork, EthashSolution, EthashWork, SolutionPayload, Work, WorkPayload, WorkSolution,
};
pub use work_queue::{WorkQueue, WorkQueueSettings};
