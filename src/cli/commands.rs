// src/cli/commands.rs
use crate::types::PowType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// GPU Miner CLI - pool connectivity and work distribution
#[derive(Parser, Debug)]
#[command(name = "gpu-miner")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform (start the pool side or generate config)
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Connect to the configured pools and hand out work
    Start(StartOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Options for starting the pool side
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Log every line exchanged with the pools
    #[arg(short, long)]
    pub verbose: bool,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,

    /// Pow type of the example pools
    #[arg(short, long, value_enum, default_value_t = PowType::Ethash)]
    pub pow_type: PowType,
}
