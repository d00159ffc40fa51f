//! Statistics collection and reporting module
//!
//! This module tracks submitted shares per pool and aggregates them upwards:
//! - Accepted, rejected and duplicate share counts
//! - Accepted difficulty
//!
//! [`PoolRecords`] holds the counters, [`StatsReporter`] periodically logs them.

/// Share counters and parent aggregation
pub mod records;

/// Submodule containing the statistics reporter implementation
pub mod reporter;

// Re-export main components
pub use records::{PoolRecords, ShareRecord, ShareStats};
pub use reporter::StatsReporter;
