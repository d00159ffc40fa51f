// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! This module handles logging setup for the miner, including:
//! - Standard logging configuration
//! - Verbose logging for protocol debugging
//! - Rate limiting of repetitive warnings
//!
//! Uses `env_logger` under the hood with custom formatting and filtering.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};

/// Initializes the logging subsystem with sensible defaults
///
/// # Configuration
/// - Logs to stdout
/// - Default log level: Info
/// - Custom timestamp and source location formatting
/// - Respects `RUST_LOG` environment variable if set
pub fn init_logging() {
    init_with_default(LevelFilter::Info);
}

/// Configures verbose logging for pool protocol debugging
///
/// # Differences from Standard Logging
/// - Default log level: Trace (if RUST_LOG not set), which includes every
///   line sent to and received from the pools
/// - Same custom formatting as standard logging
pub fn init_verbose_logging() {
    init_with_default(LevelFilter::Trace);
}

fn init_with_default(level: LevelFilter) {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(level);
    } else {
        builder.parse_env("RUST_LOG");
    }

    // A logger may already be installed (tests, embedding applications)
    let _ = builder.try_init();
}

/// Creates and configures a base logger builder with common settings
///
/// # Features
/// - Custom log format including:
///   - Timestamp (seconds since epoch)
///   - Log level
///   - Module path
///   - Line number
///   - Message
/// - Output to stdout
///
/// # Returns
/// Partially configured `env_logger::Builder` instance
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();
            let line = record.line().unwrap_or(0);

            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                level,
                module,
                line,
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}

/// Lets the first occurrence of an event through, then every `n`th one
///
/// Used for warnings that a misbehaving peer can trigger once per message.
#[derive(Debug)]
pub struct LogEvery {
    every: u64,
    seen: AtomicU64,
}

impl LogEvery {
    /// Creates a limiter that admits occurrence 1, n+1, 2n+1, ...
    pub const fn new(every: u64) -> Self {
        LogEvery {
            every: if every == 0 { 1 } else { every },
            seen: AtomicU64::new(0),
        }
    }

    /// Records one occurrence
    ///
    /// # Returns
    /// `Some(total_seen)` if this occurrence should be logged
    pub fn hit(&self) -> Option<u64> {
        let prev = self.seen.fetch_add(1, Ordering::Relaxed);
        (prev % self.every == 0).then_some(prev + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_every_admits_first_and_every_nth() {
        let limiter = LogEvery::new(3);
        let admitted: Vec<bool> = (0..7).map(|_| limiter.hit().is_some()).collect();
        assert_eq!(
            admitted,
            vec![true, false, false, true, false, false, true],
            "limiter should admit occurrences 1, 4 and 7"
        );
    }

    #[test]
    fn test_log_every_zero_admits_all() {
        let limiter = LogEvery::new(0);
        assert!(
            (0..5).all(|_| limiter.hit().is_some()),
            "a zero period must not divide by zero and should admit everything"
        );
    }
}
