// src/pool/ethash.rs
//! Ethash over stratum (`mining.subscribe` / `mining.authorize` / `mining.notify`).

use crate::network::CxnHandle;
use crate::network::jrpc::{ErrorCode, Message, RequestBuilder, RpcError};
use crate::pool::pool::{AliveTracker, Pool, PoolConstructionArgs};
use crate::pool::stratum::StratumPoolBase;
use crate::pool::work::{
    EthashSolution, EthashWork, SolutionPayload, Work, WorkPayload, WorkSolution, bytes32_from_hex,
    difficulty_from_target,
};
use crate::stats::PoolRecords;
use crate::types::PowType;
use crate::utils::MinerError;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Name under which this pool is registered
pub const IMPL_NAME: &str = "EthashStratum";

const CLIENT_NAME: &str = "sgminer";
const CLIENT_VERSION: &str = "5.5.17-gm";

/// Parsed `mining.notify` params
#[derive(Debug, Clone, PartialEq)]
struct EthashNotify {
    job_id: String,
    header_hash: [u8; 32],
    seed_hash: [u8; 32],
    target: [u8; 32],
    clean: bool,
}

impl EthashNotify {
    /// Parses `[job_id, header_hash, seed_hash, target, clean?]`
    ///
    /// A missing clean flag counts as `true`.
    fn parse(params: &Value) -> Result<Self, MinerError> {
        let params = params
            .as_array()
            .filter(|p| p.len() >= 4)
            .ok_or_else(|| MinerError::ProtocolError("expected at least 4 params".into()))?;

        let job_id = match &params[0] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => return Err(MinerError::ProtocolError(format!("invalid job id {}", other))),
        };
        let hex_param = |i: usize| -> Result<[u8; 32], MinerError> {
            let text = params[i]
                .as_str()
                .ok_or_else(|| MinerError::ProtocolError(format!("param {} is not a string", i)))?;
            Ok(bytes32_from_hex(text)?)
        };

        Ok(EthashNotify {
            job_id,
            header_hash: hex_param(1)?,
            seed_hash: hex_param(2)?,
            target: hex_param(3)?,
            clean: params.get(4).and_then(Value::as_bool).unwrap_or(true),
        })
    }
}

/// Builds the `mining.submit` params
fn submit_params(username: &str, job_id: &str, solution: &EthashSolution) -> Value {
    json!([
        username,
        job_id,
        format!("0x{:016x}", solution.nonce),
        format!("0x{}", hex::encode(solution.pow_hash)),
        format!("0x{}", hex::encode(solution.mix_hash)),
    ])
}

/// Ethash stratum pool client
///
/// Connects on construction and keeps reconnecting until dropped.
pub struct EthashStratumPool {
    base: StratumPoolBase,
    weak_self: Weak<Self>,
    accept_notify: AtomicBool,
}

impl EthashStratumPool {
    /// Creates the pool and starts connecting to it
    ///
    /// # Errors
    /// Returns an error if the io service, TLS setup or work queue cannot be created
    pub fn new(args: PoolConstructionArgs) -> Result<Arc<Self>, MinerError> {
        let base = StratumPoolBase::new(IMPL_NAME, PowType::Ethash, args, |master| {
            if let WorkPayload::Ethash(work) = &mut master.payload {
                work.extranonce = work.extranonce.wrapping_add(1);
            }
            master.clone()
        })?;

        let pool = Arc::new_cyclic(|weak_self| EthashStratumPool {
            base,
            weak_self: weak_self.clone(),
            accept_notify: AtomicBool::new(false),
        });
        pool.start();
        Ok(pool)
    }

    fn start(&self) {
        let weak = self.weak_self.clone();
        self.base.rpc().add_method("mining.notify", move |params| match weak.upgrade() {
            Some(pool) => pool.on_mining_notify(params),
            None => Ok(Value::Null),
        });

        let weak = self.weak_self.clone();
        self.base.connect(move |cxn| {
            if let Some(pool) = weak.upgrade() {
                pool.subscribe(cxn);
            }
        });
    }

    fn subscribe(&self, cxn: CxnHandle) {
        self.accept_notify.store(false, Ordering::Release);
        let rpc = self.base.rpc();
        let subscribe = RequestBuilder::new()
            .id(rpc.next_id())
            .method("mining.subscribe")
            .param(CLIENT_NAME)
            .param(CLIENT_VERSION)
            .done();

        let weak = self.weak_self.clone();
        rpc.call_async(&cxn, subscribe, move |cxn, response| {
            if let Some(pool) = weak.upgrade() {
                pool.on_subscribed(cxn, response);
            }
        });
    }

    fn on_subscribed(&self, cxn: CxnHandle, response: Message) {
        if !response.result_is_true() {
            log::warn!("{}: mining.subscribe failed: {}", self.base.name(), response);
            return;
        }
        self.accept_notify.store(true, Ordering::Release);

        let args = self.base.args();
        let authorize = RequestBuilder::new()
            .id(self.base.rpc().next_id())
            .method("mining.authorize")
            .param(args.username.as_str())
            .param(args.password.as_str())
            .done();

        let weak = self.weak_self.clone();
        self.base.rpc().call_async(&cxn, authorize, move |_, response| {
            let Some(pool) = weak.upgrade() else {
                return;
            };
            let user = &pool.base.args().username;
            match response.error() {
                Some(e) => {
                    log::error!("{}: authorization of {} failed: {}", pool.base.name(), user, e);
                    pool.accept_notify.store(false, Ordering::Release);
                }
                None => log::info!("{}: authorized as {}", pool.base.name(), user),
            }
        });
    }

    fn on_mining_notify(&self, params: &Value) -> Result<Value, RpcError> {
        let name = self.base.name();
        if !self.accept_notify.load(Ordering::Acquire) {
            log::debug!("{}: ignoring mining.notify before subscription", name);
            return Ok(Value::Null);
        }
        let notify = EthashNotify::parse(params).map_err(|e| {
            log::warn!("{}: bad mining.notify: {}", name, e);
            RpcError::new(ErrorCode::InvalidParams, e.to_string())
        })?;

        log::info!("{}: new job {} (clean: {})", name, notify.job_id, notify.clean);
        let queue = self.base.queue();
        let job = queue.make_job(notify.job_id, difficulty_from_target(&notify.target), None);
        let master = Work {
            job,
            payload: WorkPayload::Ethash(EthashWork {
                header_hash: notify.header_hash,
                seed_hash: notify.seed_hash,
                target: notify.target,
                extranonce: 0,
            }),
        };
        queue.push_job(master, notify.clean);
        Ok(Value::Null)
    }
}

impl Pool for EthashStratumPool {
    fn try_get_work(&self) -> Option<Work> {
        self.base.queue().try_pop()
    }

    fn submit_solution(&self, solution: WorkSolution) {
        let username = self.base.args().username.clone();
        self.base.submit(
            solution,
            "mining.submit",
            |solution| match &solution.payload {
                SolutionPayload::Ethash(result) => Some(submit_params(&username, &solution.job.job_id, result)),
                _ => None,
            },
            Message::result_is_true,
        );
    }

    fn pool_uid(&self) -> u64 {
        self.base.uid()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn pow_type(&self) -> PowType {
        self.base.pow_type()
    }

    fn alive(&self) -> &AliveTracker {
        self.base.alive()
    }

    fn records(&self) -> &Arc<PoolRecords> {
        self.base.records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::pool::SUBMIT_RETRY_INTERVAL;
    use crate::pool::test_server::{TestPoolServer, wait_for};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Mutex, mpsc};
    use std::time::Duration;

    fn hash(byte: u8) -> String {
        format!("0x{}", hex::encode([byte; 32]))
    }

    #[test]
    fn test_parse_notify() {
        let notify = EthashNotify::parse(&json!(["job1", hash(1), hash(2), "0x00ff", false])).unwrap();
        assert_eq!(notify.job_id, "job1");
        assert_eq!(notify.header_hash, [1; 32]);
        assert_eq!(notify.target[31], 0xff);
        assert!(!notify.clean);

        let defaulted = EthashNotify::parse(&json!([7, hash(1), hash(2), hash(3)])).unwrap();
        assert_eq!(defaulted.job_id, "7");
        assert!(defaulted.clean, "missing clean flag means clean");

        assert!(EthashNotify::parse(&json!(["j", hash(1)])).is_err());
        assert!(EthashNotify::parse(&json!(["j", "nothex", hash(2), hash(3)])).is_err());
    }

    #[test]
    fn test_submit_params_format() {
        let solution = EthashSolution {
            nonce: 42,
            pow_hash: [0xaa; 32],
            mix_hash: [0xbb; 32],
        };
        let params = submit_params("wallet.rig", "job7", &solution);
        assert_eq!(params[0], "wallet.rig");
        assert_eq!(params[1], "job7");
        assert_eq!(params[2], "0x000000000000002a");
        assert_eq!(params[3], json!(format!("0x{}", "aa".repeat(32))));
        assert_eq!(params[4], json!(format!("0x{}", "bb".repeat(32))));
    }

    #[test]
    fn test_notify_to_work_and_submit() {
        let server = TestPoolServer::start();
        let authorized = Arc::new(AtomicBool::new(false));
        let (submit_tx, submits) = mpsc::channel::<Value>();
        let submit_tx = Mutex::new(submit_tx);

        server.add_method("mining.subscribe", |_| Ok(json!(true)));
        let flag = authorized.clone();
        server.add_method("mining.authorize", move |params| {
            flag.store(params[0] == "worker", Ordering::SeqCst);
            Ok(json!(true))
        });
        server.add_method("mining.submit", move |params| {
            let _ = submit_tx.lock().unwrap().send(params.clone());
            Ok(json!(true))
        });

        let pool = EthashStratumPool::new(server.pool_args()).unwrap();
        let cxn = server.accept();
        wait_for("authorization", || authorized.load(Ordering::SeqCst).then_some(()));

        server.notify(&cxn, "mining.notify", json!(["job7", hash(1), hash(2), hash(0), true]));
        let work = wait_for("work of job7", || pool.try_get_work());
        assert_eq!(work.job.job_id, "job7");
        assert_eq!(work.pool_uid(), pool.pool_uid());
        assert!(pool.alive().last_known_alive().is_some(), "inbound traffic marks the pool alive");

        pool.submit_solution(work.make_solution(SolutionPayload::Ethash(EthashSolution {
            nonce: 42,
            pow_hash: [3; 32],
            mix_hash: [4; 32],
        })));
        let params = submits.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(params[1], "job7");
        assert_eq!(params[2], "0x000000000000002a");
        wait_for("accepted share", || (pool.records().snapshot().accepted == 1).then_some(()));

        // a solution of a superseded job never reaches the wire
        server.notify(&cxn, "mining.notify", json!(["job8", hash(5), hash(2), hash(0), true]));
        wait_for("work of job8", || pool.try_get_work().filter(|w| w.job.job_id == "job8"));
        assert!(work.expired());
        pool.submit_solution(work.make_solution(SolutionPayload::Ethash(EthashSolution {
            nonce: 43,
            pow_hash: [3; 32],
            mix_hash: [4; 32],
        })));
        assert!(
            submits.recv_timeout(Duration::from_millis(300)).is_err(),
            "expired solution was submitted"
        );
    }

    #[test]
    fn test_notify_ignored_before_subscription() {
        let server = TestPoolServer::start();
        server.add_method("mining.subscribe", |_| Ok(json!(false)));

        let pool = EthashStratumPool::new(server.pool_args()).unwrap();
        let cxn = server.accept();
        server.notify(&cxn, "mining.notify", json!(["job1", hash(1), hash(2), hash(3), true]));

        std::thread::sleep(Duration::from_millis(200));
        assert!(pool.try_get_work().is_none(), "rejected subscription must not yield work");
    }

    #[test]
    fn test_unanswered_share_not_resent_after_new_job() {
        let server = TestPoolServer::start();
        server.add_method("mining.subscribe", |_| Ok(json!(true)));
        server.add_method("mining.authorize", |_| Ok(json!(true)));

        // submits arrive as notifications, so the server never answers them
        let submits = Arc::new(AtomicUsize::new(0));
        let seen = submits.clone();
        server.rpc.io().set_incoming_modifier(move |msg: &mut Message| {
            if msg.method_is("mining.submit") {
                seen.fetch_add(1, Ordering::SeqCst);
                msg.id = Value::Null;
            }
        });

        let pool = EthashStratumPool::new(server.pool_args()).unwrap();
        let cxn = server.accept();
        server.notify(&cxn, "mining.notify", json!(["job7", hash(1), hash(2), hash(0), true]));
        let work = wait_for("work of job7", || pool.try_get_work());

        pool.submit_solution(work.make_solution(SolutionPayload::Ethash(EthashSolution {
            nonce: 1,
            pow_hash: [3; 32],
            mix_hash: [4; 32],
        })));
        wait_for("first submit", || (submits.load(Ordering::SeqCst) == 1).then_some(()));

        server.notify(&cxn, "mining.notify", json!(["job8", hash(5), hash(2), hash(0), true]));
        wait_for("work of job8", || pool.try_get_work().filter(|w| w.job.job_id == "job8"));
        assert!(work.expired());

        std::thread::sleep(SUBMIT_RETRY_INTERVAL + Duration::from_secs(1));
        assert_eq!(
            submits.load(Ordering::SeqCst),
            1,
            "share of a superseded job must not be resent"
        );
        assert_eq!(pool.records().snapshot().accepted, 0);
    }
}
