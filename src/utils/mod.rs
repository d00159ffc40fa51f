// src/utils/mod.rs
//! Utilities module for common functionality
//!
//! This module contains shared utilities used throughout the miner,
//! including error handling and logging infrastructure.

/// Error types and handling utilities
///
/// Contains the [`MinerError`] enum which defines the setup-time error
/// conditions of the miner, along with conversion implementations.
pub mod error;

/// Logging configuration and utilities
///
/// Provides logging initialization for the binary and the [`LogEvery`]
/// helper used to rate-limit noisy warnings.
pub mod logging;

// Re-export for easier access
pub use error::MinerError;
pub use logging::{LogEvery, init_logging};
