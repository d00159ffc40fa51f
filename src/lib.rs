//! GPU Miner - pool connectivity and work distribution in Rust
//!
//! This crate provides the pool side of a GPU miner:
//! - A layered async transport (socket, lines, JSON, JSON-RPC) with reconnects
//! - Stratum pool clients for Ethash and Cuckatoo31 (Grin)
//! - Auto-refilling work queues with cheap job expiry checks
//! - Priority based failover between pools
//!
//! Device kernels consume work through the [`pool::Pool`] trait and hand
//! solutions back through it.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Network communication components: io service, type layers, JSON-RPC
pub mod network;

/// Pools, work queues and the pool switcher
pub mod pool;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::Config;
pub use network::{BaseIo, CxnHandle, IoMode, IoService, TlsDesc};
pub use network::jrpc::{JsonRpcUtil, Message, RequestBuilder};
pub use pool::{Pool, PoolConstructionArgs, PoolRegistry, PoolSwitcher, Work, WorkSolution};
pub use stats::{PoolRecords, StatsReporter};
pub use types::PowType;
pub use utils::{MinerError, init_logging};
