// src/pool/grin.rs
//! Cuckatoo31 over the Grin stratum dialect (`login` / `getjobtemplate` / `job` / `submit`).

use crate::network::CxnHandle;
use crate::network::jrpc::{ErrorCode, Message, RequestBuilder, RpcError};
use crate::pool::pool::{AliveTracker, Pool, PoolConstructionArgs};
use crate::pool::stratum::StratumPoolBase;
use crate::pool::work::{CuckooSolution, CuckooWork, SolutionPayload, Work, WorkPayload, WorkSolution};
use crate::stats::PoolRecords;
use crate::types::PowType;
use crate::utils::MinerError;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Name under which this pool is registered
pub const IMPL_NAME: &str = "GrinStratum";

const AGENT: &str = "grin-miner";
const EDGE_BITS: u32 = 31;
const LOGIN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Parsed `job` params (also the `getjobtemplate` result)
#[derive(Debug, Clone, PartialEq)]
struct GrinJob {
    height: u64,
    job_id: u64,
    difficulty: u64,
    pre_pow: Vec<u8>,
}

fn u64_field(params: &Value, key: &str) -> Result<u64, MinerError> {
    let value = match params.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    value.ok_or_else(|| MinerError::ProtocolError(format!("missing or invalid {}", key)))
}

impl GrinJob {
    fn parse(params: &Value) -> Result<Self, MinerError> {
        let pre_pow = params
            .get("pre_pow")
            .and_then(Value::as_str)
            .ok_or_else(|| MinerError::ProtocolError("missing pre_pow".into()))?;
        Ok(GrinJob {
            height: u64_field(params, "height")?,
            job_id: u64_field(params, "job_id")?,
            difficulty: u64_field(params, "difficulty")?,
            pre_pow: hex::decode(pre_pow)?,
        })
    }
}

/// Turns a numeric string id into a number, leaving every other id alone
fn id_to_number(json: &mut Value) {
    if let Some(map) = json.as_object_mut() {
        let parsed = map
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<u64>().ok());
        if let Some(id) = parsed {
            map.insert("id".into(), json!(id));
        }
    }
}

/// Sends numeric ids as strings, which grin stratum servers expect
fn id_to_string(json: &mut Value) {
    if let Some(map) = json.as_object_mut() {
        if let Some(Value::Number(n)) = map.get("id") {
            let id = n.to_string();
            map.insert("id".into(), Value::String(id));
        }
    }
}

/// Builds the named `submit` params
fn submit_params(height: u64, job_id: &str, solution: &CuckooSolution) -> Value {
    let mut params = Map::new();
    params.insert("edge_bits".into(), json!(EDGE_BITS));
    params.insert("height".into(), json!(height));
    params.insert(
        "job_id".into(),
        job_id.parse::<u64>().map(Value::from).unwrap_or_else(|_| json!(job_id)),
    );
    params.insert("nonce".into(), json!(solution.nonce));
    params.insert("pow".into(), json!(solution.pow));
    Value::Object(params)
}

/// Grin stratum pool client
pub struct GrinStratumPool {
    base: StratumPoolBase,
    weak_self: Weak<Self>,
    current_height: AtomicU64,
}

impl GrinStratumPool {
    /// Creates the pool and starts connecting to it
    ///
    /// # Errors
    /// Returns an error if the io service, TLS setup or work queue cannot be created
    pub fn new(args: PoolConstructionArgs) -> Result<Arc<Self>, MinerError> {
        let base = StratumPoolBase::new(IMPL_NAME, PowType::Cuckatoo31, args, |master| {
            if let WorkPayload::Cuckatoo31(work) = &mut master.payload {
                work.nonce = work.nonce.wrapping_add(1);
            }
            master.clone()
        })?;

        let pool = Arc::new_cyclic(|weak_self| GrinStratumPool {
            base,
            weak_self: weak_self.clone(),
            current_height: AtomicU64::new(0),
        });
        pool.start();
        Ok(pool)
    }

    fn start(&self) {
        let json = self.base.rpc().io().below();
        json.set_incoming_modifier(id_to_number);
        json.set_outgoing_modifier(id_to_string);

        let weak = self.weak_self.clone();
        self.base.rpc().add_method("job", move |params| match weak.upgrade() {
            Some(pool) => pool.on_job(params),
            None => Ok(Value::Null),
        });

        let weak = self.weak_self.clone();
        self.base.connect(move |cxn| {
            if let Some(pool) = weak.upgrade() {
                pool.login(cxn);
            }
        });
    }

    fn login(&self, cxn: CxnHandle) {
        let args = self.base.args();
        let login = RequestBuilder::new()
            .id(self.base.rpc().next_id())
            .method("login")
            .named_param("agent", AGENT)
            .named_param("login", args.username.as_str())
            .named_param("pass", args.password.as_str())
            .done();

        let weak = self.weak_self.clone();
        self.base.rpc().call_async(&cxn, login, move |cxn, response| {
            if let Some(pool) = weak.upgrade() {
                pool.on_login(cxn, response);
            }
        });
    }

    fn on_login(&self, cxn: CxnHandle, response: Message) {
        let rpc = self.base.rpc();
        if let Some(e) = response.error() {
            log::warn!("{}: login failed ({}), retrying", self.base.name(), e);
            let weak = self.weak_self.clone();
            rpc.base().post_after(LOGIN_RETRY_DELAY, move || {
                if let Some(pool) = weak.upgrade() {
                    if cxn.is_alive() {
                        pool.login(cxn);
                    }
                }
            });
            return;
        }

        let template = RequestBuilder::new().id(rpc.next_id()).method("getjobtemplate").done();
        let weak = self.weak_self.clone();
        rpc.call_async(&cxn, template, move |_, response| {
            let Some(pool) = weak.upgrade() else {
                return;
            };
            match response.result() {
                Some(job) => {
                    let _ = pool.on_job(job);
                }
                None => log::warn!("{}: getjobtemplate failed: {}", pool.base.name(), response),
            }
        });
    }

    fn on_job(&self, params: &Value) -> Result<Value, RpcError> {
        let name = self.base.name();
        let job = GrinJob::parse(params).map_err(|e| {
            log::warn!("{}: bad job: {}", name, e);
            RpcError::new(ErrorCode::InvalidParams, e.to_string())
        })?;

        let previous = self.current_height.swap(job.height, Ordering::AcqRel);
        let clean = previous != job.height;
        log::info!(
            "{}: new job {} at height {} (difficulty {})",
            name,
            job.job_id,
            job.height,
            job.difficulty
        );

        let queue = self.base.queue();
        let pool_job = queue.make_job(job.job_id.to_string(), job.difficulty as f64, Some(job.height));
        let master = Work {
            job: pool_job,
            payload: WorkPayload::Cuckatoo31(CuckooWork {
                pre_pow: job.pre_pow,
                nonce: rand::random::<u64>(),
                difficulty: job.difficulty,
                height: job.height,
            }),
        };
        queue.push_job(master, clean);
        Ok(Value::Null)
    }
}

impl Pool for GrinStratumPool {
    fn try_get_work(&self) -> Option<Work> {
        self.base.queue().try_pop()
    }

    fn submit_solution(&self, solution: WorkSolution) {
        self.base.submit(
            solution,
            "submit",
            |solution| match &solution.payload {
                SolutionPayload::Cuckatoo31(result) => {
                    let height = solution.job.height.unwrap_or_default();
                    Some(submit_params(height, &solution.job.job_id, result))
                }
                _ => None,
            },
            |response| response.result().and_then(Value::as_str) == Some("ok"),
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
    use crate::pool::test_server::{TestPoolServer, wait_for};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Mutex, mpsc};

    fn job_json(height: u64, job_id: u64) -> Value {
        json!({"height": height, "job_id": job_id, "difficulty": 4, "pre_pow": "00ff10"})
    }

    #[test]
    fn test_parse_job() {
        let job = GrinJob::parse(&job_json(100, 3)).unwrap();
        assert_eq!(job.pre_pow, vec![0x00, 0xff, 0x10]);
        assert_eq!((job.height, job.job_id, job.difficulty), (100, 3, 4));

        let stringly = GrinJob::parse(&json!({"height": "5", "job_id": "9", "difficulty": 1, "pre_pow": ""})).unwrap();
        assert_eq!((stringly.height, stringly.job_id), (5, 9));

        assert!(GrinJob::parse(&json!({"height": 1})).is_err());
        assert!(GrinJob::parse(&json!({"height": 1, "job_id": 1, "difficulty": 1, "pre_pow": "xyz"})).is_err());
    }

    #[test]
    fn test_id_modifiers() {
        let mut incoming = json!({"id": "12", "result": "ok"});
        id_to_number(&mut incoming);
        assert_eq!(incoming["id"], json!(12));

        let mut named = json!({"id": "abc", "result": "ok"});
        id_to_number(&mut named);
        assert_eq!(named["id"], json!("abc"), "non-numeric ids stay untouched");

        let mut outgoing = json!({"id": 7, "method": "login"});
        id_to_string(&mut outgoing);
        assert_eq!(outgoing["id"], json!("7"));

        let mut notification = json!({"id": null, "method": "job"});
        id_to_string(&mut notification);
        assert!(notification["id"].is_null());
    }

    #[test]
    fn test_submit_params() {
        let params = submit_params(100, "3", &CuckooSolution { nonce: 77, pow: vec![1, 2, 3] });
        assert_eq!(
            params,
            json!({"edge_bits": 31, "height": 100, "job_id": 3, "nonce": 77, "pow": [1, 2, 3]})
        );
    }

    #[test]
    fn test_login_template_job_and_submit() {
        let server = TestPoolServer::start();
        let logins = Arc::new(AtomicUsize::new(0));
        let (submit_tx, submits) = mpsc::channel::<Value>();
        let submit_tx = Mutex::new(submit_tx);

        let seen = logins.clone();
        server.add_method("login", move |params| {
            // first attempt fails to exercise the delayed retry
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(RpcError::new(ErrorCode::ServerError(-32500), "try again"));
            }
            match params["agent"].as_str() {
                Some(AGENT) => Ok(json!("ok")),
                _ => Err(RpcError::new(ErrorCode::InvalidParams, "agent missing")),
            }
        });
        server.add_method("getjobtemplate", |_| Ok(job_json(100, 1)));
        server.add_method("submit", move |params| {
            let _ = submit_tx.lock().unwrap().send(params.clone());
            Ok(json!("ok"))
        });

        let pool = GrinStratumPool::new(server.pool_args()).unwrap();
        let cxn = server.accept();

        let work = wait_for("template work", || pool.try_get_work());
        assert!(logins.load(Ordering::SeqCst) >= 2, "login is retried after an error");
        assert_eq!(work.job.job_id, "1");
        assert_eq!(work.job.height, Some(100));
        let WorkPayload::Cuckatoo31(payload) = &work.payload else {
            panic!("unexpected payload");
        };
        assert_eq!(payload.pre_pow, vec![0x00, 0xff, 0x10]);

        let nonce = payload.nonce;
        pool.submit_solution(work.make_solution(SolutionPayload::Cuckatoo31(CuckooSolution {
            nonce,
            pow: vec![5; 42],
        })));
        let params = submits.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(params["job_id"], json!(1));
        assert_eq!(params["nonce"], json!(nonce));
        assert_eq!(params["edge_bits"], json!(31));
        wait_for("accepted share", || (pool.records().snapshot().accepted == 1).then_some(()));

        server.notify(&cxn, "job", job_json(101, 2));
        let next = wait_for("job 2", || pool.try_get_work().filter(|w| w.job.job_id == "2"));
        assert_eq!(next.job.height, Some(101));
        assert!(work.expired(), "new height expires the old job");
    }
}
