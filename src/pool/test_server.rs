// src/pool/test_server.rs
//! A scriptable local JSON-RPC server standing in for a mining pool in tests.

use crate::network::jrpc::{JsonRpcUtil, Message, RpcError};
use crate::network::{CxnHandle, IoLayer, IoMode};
use crate::pool::pool::PoolConstructionArgs;
use crate::pool::work_queue::WorkQueueSettings;
use serde_json::Value;
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

pub(crate) struct TestPoolServer {
    pub rpc: JsonRpcUtil,
    pub port: u16,
    accepted: mpsc::Receiver<CxnHandle>,
}

impl TestPoolServer {
    pub fn start() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let rpc = JsonRpcUtil::new(IoMode::Tcp).unwrap();
        rpc.set_read_loop_enabled(true);
        let (tx, accepted) = mpsc::channel();
        let base = rpc.base().clone();
        let addr = rpc
            .base()
            .launch_server(
                0,
                move |cxn| {
                    base.read_async(&cxn);
                    let _ = tx.send(cxn);
                },
                |_| {},
            )
            .unwrap();
        TestPoolServer {
            rpc,
            port: addr.port(),
            accepted,
        }
    }

    pub fn add_method<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.rpc.add_method(name, handler);
    }

    /// Waits for the next client connection
    pub fn accept(&self) -> CxnHandle {
        self.accepted.recv_timeout(WAIT).expect("pool never connected")
    }

    pub fn notify(&self, cxn: &CxnHandle, method: &str, params: Value) {
        self.rpc.write_async(cxn, Message::notification(method, params));
    }

    pub fn pool_args(&self) -> PoolConstructionArgs {
        let mut args = PoolConstructionArgs::new("127.0.0.1", self.port, "worker", "x");
        args.queue = WorkQueueSettings {
            refill_threshold: 2,
            max_length: 4,
            pop_timeout: Duration::from_millis(50),
        };
        args
    }
}

/// Polls `f` until it yields a value or [`WAIT`] elapses
pub(crate) fn wait_for<T>(what: &str, mut f: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(value) = f() {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(10));
    }
}
