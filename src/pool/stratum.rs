// src/pool/stratum.rs
//! Connection, work buffer and share submission shared by the stratum pools.
//!
//! Each dialect (ethash, grin) embeds a [`StratumPoolBase`] and adds its own
//! handshake and job parsing on top of it.

use crate::network::jrpc::{JsonRpcUtil, Message};
use crate::network::{CxnHandle, IoLayer};
use crate::pool::pool::{
    AliveTracker, PoolConstructionArgs, SUBMIT_MAX_TRIES, SUBMIT_RETRY_INTERVAL, generate_pool_uid,
    report_submit_outcome,
};
use crate::pool::work::{Work, WorkSolution};
use crate::pool::work_queue::WorkQueue;
use crate::stats::PoolRecords;
use crate::types::PowType;
use crate::utils::MinerError;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// State every stratum pool has
pub(crate) struct StratumPoolBase {
    uid: u64,
    name: String,
    pow_type: PowType,
    args: PoolConstructionArgs,
    rpc: JsonRpcUtil,
    queue: WorkQueue,
    alive: Arc<AliveTracker>,
    records: Arc<PoolRecords>,
    cxn: Arc<Mutex<CxnHandle>>,
}

impl StratumPoolBase {
    /// Creates the io endpoint and the work queue, without connecting yet
    ///
    /// # Arguments
    /// * `impl_name` - Prefix of the pool name, which is `impl_name@host:port`
    /// * `pow_type` - The only kind of solution this pool accepts
    /// * `args` - Server address, credentials and queue tuning
    /// * `derive` - Makes the next work item from the master when refilling
    ///
    /// # Errors
    /// Returns an error if the io service, TLS setup or work queue cannot be created
    pub(crate) fn new<D>(
        impl_name: &str,
        pow_type: PowType,
        args: PoolConstructionArgs,
        derive: D,
    ) -> Result<Self, MinerError>
    where
        D: FnMut(&mut Work) -> Work + Send + 'static,
    {
        let uid = generate_pool_uid();
        let rpc = JsonRpcUtil::new(args.io_mode())?;
        let queue = WorkQueue::new(uid, args.queue, derive)?;
        let name = format!("{}@{}:{}", impl_name, args.host, args.port);

        Ok(StratumPoolBase {
            uid,
            records: PoolRecords::new(name.clone()),
            name,
            pow_type,
            args,
            rpc,
            queue,
            alive: Arc::new(AliveTracker::new()),
            cxn: Arc::new(Mutex::new(CxnHandle::default())),
        })
    }

    /// Starts connecting, reconnecting until the pool is dropped
    ///
    /// Any inbound message marks the pool alive. Each new connection becomes
    /// the current one and has its read loop armed before `on_connected`
    /// runs on the io thread. Register methods before calling this.
    pub(crate) fn connect<C>(&self, on_connected: C)
    where
        C: Fn(CxnHandle) + Send + Sync + 'static,
    {
        let alive = self.alive.clone();
        self.rpc.io().set_incoming_modifier(move |_| alive.on_still_alive());
        self.rpc.set_read_loop_enabled(true);

        let current = self.cxn.clone();
        let io = self.rpc.base().clone();
        let name = self.name.clone();
        self.rpc
            .base()
            .launch_client_auto_reconnect(&self.args.host, self.args.port, move |cxn| {
                log::info!("{}: connected", name);
                *current.lock().unwrap_or_else(|p| p.into_inner()) = cxn.clone();
                io.read_async(&cxn);
                on_connected(cxn);
            });
    }

    /// Submits a share with retries
    ///
    /// Solutions of expired jobs or of another pow type are dropped here.
    /// The job is checked again before every write, so a share whose job
    /// expires while it waits for the wire or for a resend is not sent.
    ///
    /// # Arguments
    /// * `solution` - The solution to submit
    /// * `method` - The dialect's submit method
    /// * `encode` - Builds the params, `None` if the payload does not fit
    /// * `is_accepted` - Reads the verdict out of the pool's response
    pub(crate) fn submit<E, A>(&self, solution: WorkSolution, method: &str, encode: E, is_accepted: A)
    where
        E: FnOnce(&WorkSolution) -> Option<Value>,
        A: FnOnce(&Message) -> bool + Send + 'static,
    {
        if solution.expired() {
            log::debug!("{}: dropping solution of expired job {}", self.name, solution.job.job_id);
            return;
        }
        if solution.pow_type() != self.pow_type {
            debug_assert!(false, "{} pool received a {} solution", self.pow_type, solution.pow_type());
            log::error!("{}: dropping {} solution", self.name, solution.pow_type());
            return;
        }
        let Some(params) = encode(&solution) else {
            log::error!("{}: cannot encode solution of job {}", self.name, solution.job.job_id);
            return;
        };

        let request = Message::request(self.rpc.next_id(), method, params);
        let job = solution.job.clone();
        let records = self.records.clone();
        let name = self.name.clone();
        let lost_job = job.job_id.clone();
        let lost_name = self.name.clone();
        let answered_job = job.clone();

        self.rpc.call_async_retry_n_times(
            &self.cxn(),
            request,
            SUBMIT_MAX_TRIES,
            SUBMIT_RETRY_INTERVAL,
            move || !job.expired(),
            move |_, response| {
                let accepted = is_accepted(&response);
                report_submit_outcome(
                    &records,
                    &name,
                    &answered_job.job_id,
                    answered_job.difficulty,
                    &response,
                    accepted,
                );
            },
            move || log::warn!("{}: share for job {} never acknowledged", lost_name, lost_job),
        );
    }

    /// The current connection, empty before the first connect
    pub(crate) fn cxn(&self) -> CxnHandle {
        self.cxn.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub(crate) fn rpc(&self) -> &JsonRpcUtil {
        &self.rpc
    }

    pub(crate) fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub(crate) fn args(&self) -> &PoolConstructionArgs {
        &self.args
    }

    pub(crate) fn uid(&self) -> u64 {
        self.uid
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn pow_type(&self) -> PowType {
        self.pow_type
    }

    pub(crate) fn alive(&self) -> &AliveTracker {
        &self.alive
    }

    pub(crate) fn records(&self) -> &Arc<PoolRecords> {
        &self.records
    }
}
