// src/pool/pool.rs
//! The provider interface shared by concrete pools and the switcher.

use crate::network::{IoMode, TlsDesc};
use crate::network::jrpc::Message;
use crate::pool::work::{Work, WorkSolution};
use crate::pool::work_queue::WorkQueueSettings;
use crate::stats::{PoolRecords, ShareRecord};
use crate::types::PowType;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Attempts per share submission
pub const SUBMIT_MAX_TRIES: u32 = 5;
/// Pause between resends of an unanswered share submission
pub const SUBMIT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

static NEXT_POOL_UID: AtomicU64 = AtomicU64::new(1);

/// Returns a process-wide unique pool uid (never 0)
pub fn generate_pool_uid() -> u64 {
    NEXT_POOL_UID.fetch_add(1, Ordering::Relaxed)
}

/// A source of work and a sink for solutions
///
/// `try_get_work` may block only for a short bounded time and returns
/// `None` frequently; callers simply ask again. `submit_solution` never
/// blocks and never reports failure to the caller.
pub trait Pool: Send + Sync {
    /// Fetches the next work item, if one arrives within the pool's pop timeout
    fn try_get_work(&self) -> Option<Work>;

    /// Hands a solution over for asynchronous submission
    fn submit_solution(&self, solution: WorkSolution);

    /// Process-unique uid stamped into every job of this pool
    fn pool_uid(&self) -> u64;

    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Pow family this pool serves
    fn pow_type(&self) -> PowType;

    /// Liveness timestamps of this pool
    fn alive(&self) -> &AliveTracker;

    /// Share counters of this pool
    fn records(&self) -> &Arc<PoolRecords>;
}

/// Remembers when a pool last showed signs of life
#[derive(Debug)]
pub struct AliveTracker {
    created: Instant,
    /// Unix time in ms, 0 if never alive
    last_alive_ms: AtomicU64,
}

impl Default for AliveTracker {
    fn default() -> Self {
        AliveTracker {
            created: Instant::now(),
            last_alive_ms: AtomicU64::new(0),
        }
    }
}

impl AliveTracker {
    /// Creates a tracker that has never seen its pool alive
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the pool is alive right now
    pub fn on_still_alive(&self) {
        self.set_last_known_alive(SystemTime::now());
    }

    /// Overrides the last known alive time
    pub fn set_last_known_alive(&self, at: SystemTime) {
        let ms = at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .max(1);
        self.last_alive_ms.store(ms, Ordering::Relaxed);
    }

    /// Last time the pool was seen alive, `None` if never
    pub fn last_known_alive(&self) -> Option<SystemTime> {
        match self.last_alive_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    /// Time since the pool was last seen alive, `Duration::MAX` if never
    pub fn since_last_alive(&self) -> Duration {
        self.last_known_alive()
            .map(|at| SystemTime::now().duration_since(at).unwrap_or_default())
            .unwrap_or(Duration::MAX)
    }

    /// Whether the pool has been silent for longer than `dead_after`
    pub fn is_dead(&self, dead_after: Duration) -> bool {
        self.since_last_alive() > dead_after
    }

    /// When the tracker was created
    pub fn created(&self) -> Instant {
        self.created
    }
}

/// Everything needed to construct a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConstructionArgs {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login, usually a wallet address with an optional worker suffix
    pub username: String,
    /// Password, often ignored by pools
    pub password: String,
    /// TLS client settings, `None` for plain TCP
    pub tls: Option<TlsDesc>,
    /// Work buffer tuning
    pub queue: WorkQueueSettings,
}

impl PoolConstructionArgs {
    /// Creates plain TCP args with default queue settings
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, password: impl Into<String>) -> Self {
        PoolConstructionArgs {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            tls: None,
            queue: WorkQueueSettings::default(),
        }
    }

    /// Transport mode implied by the TLS settings
    pub fn io_mode(&self) -> IoMode {
        match &self.tls {
            Some(desc) => IoMode::TcpTls(desc.clone()),
            None => IoMode::Tcp,
        }
    }
}

/// Records the outcome of a share submission
///
/// A response is a duplicate when its error message says so.
pub(crate) fn report_submit_outcome(
    records: &PoolRecords,
    pool_name: &str,
    job_id: &str,
    difficulty: f64,
    response: &Message,
    accepted: bool,
) {
    let duplicate = !accepted
        && response
            .error()
            .is_some_and(|e| e.message.to_ascii_lowercase().contains("duplicate"));

    if accepted {
        log::info!("{}: share for job {} accepted", pool_name, job_id);
    } else {
        match response.error() {
            Some(e) => log::warn!("{}: share for job {} rejected: {}", pool_name, job_id, e),
            None => log::warn!("{}: share for job {} rejected: {}", pool_name, job_id, response),
        }
    }

    records.report_share(ShareRecord {
        difficulty,
        accepted,
        duplicate,
    });
}
