// src/config/mod.rs
//! Configuration management for the GPU miner's pool side
//!
//! This module handles all configuration-related functionality including:
//! - Loading, parsing and validating configuration files
//! - Generating configuration templates
//! - Turning pool entries into pool construction arguments
//!
//! The configuration uses TOML format. Pools are listed in descending
//! priority; later entries serve as failover backups.

/// Core configuration implementation
///
/// Contains the [`Config`] struct and related types that define
/// the miner's configuration structure and behavior.
pub mod config;

// Re-export key items for easy access
pub use config::{Config, PoolConfig, StatsConfig, SwitcherConfig, WorkQueueConfig};

use crate::types::PowType;
use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads miner configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
///
/// # Arguments
/// * `pow_type` - Pow type of the example pools
///
/// # Returns
/// String containing a ready-to-use TOML configuration template
pub fn generate_template(pow_type: PowType) -> String {
    Config::generate_template(pow_type)
}
