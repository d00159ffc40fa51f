// src/stats/reporter.rs
use crate::stats::records::{PoolRecords, ShareStats};
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Periodically logs the share statistics of a pool (usually the switcher)
pub struct StatsReporter {
    /// Closing this channel stops the reporting thread
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StatsReporter {
    /// Starts reporting `records` every `report_interval`
    ///
    /// # Arguments
    /// * `records` - Counters to report
    /// * `report_interval` - How often to log statistics
    pub fn start(records: Arc<PoolRecords>, report_interval: Duration) -> Self {
        let (stop, stopped) = crossbeam_channel::bounded::<()>(0);
        let started = Instant::now();

        let handle = std::thread::spawn(move || {
            loop {
                match stopped.recv_timeout(report_interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let stats = records.snapshot();
                log::info!("{}", format_stats(records.name(), &stats, started.elapsed()));
            }
        });

        StatsReporter {
            stop: Some(stop),
            handle: Some(handle),
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Renders one report line
fn format_stats(name: &str, stats: &ShareStats, uptime: Duration) -> String {
    let minutes = (uptime.as_secs_f64() / 60.0).max(1.0 / 60.0);
    format!(
        "{} | Accepted/Rejected: {}/{} ({} duplicate) | Accepted difficulty: {:.2} ({:.2}/min)",
        name,
        stats.accepted,
        stats.rejected,
        stats.duplicate,
        stats.accepted_difficulty,
        stats.accepted_difficulty / minutes
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stats() {
        let stats = ShareStats {
            accepted: 3,
            rejected: 1,
            duplicate: 1,
            accepted_difficulty: 12.0,
        };
        let line = format_stats("switcher", &stats, Duration::from_secs(120));
        assert!(line.starts_with("switcher | Accepted/Rejected: 3/1 (1 duplicate)"), "{}", line);
        assert!(line.ends_with("(6.00/min)"), "{}", line);
    }

    #[test]
    fn test_drop_stops_promptly() {
        let reporter = StatsReporter::start(PoolRecords::new("x"), Duration::from_secs(3600));
        let started = Instant::now();
        drop(reporter);
        assert!(started.elapsed() < Duration::from_secs(5), "drop must not wait for the interval");
    }
}
