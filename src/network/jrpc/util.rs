// src/network/jrpc/util.rs
//! JSON-RPC endpoint: id assignment, response correlation, method dispatch,
//! and calls that are resent until answered.

use crate::network::connection::CxnHandle;
use crate::network::io_service::{BaseIo, IoService};
use crate::network::jrpc::handler_map::{HandlerMap, ResponseHandler};
use crate::network::jrpc::message::{JsonRpcIo, Message, MessageKind, RpcError};
use crate::network::jrpc::method::{MethodTable, method_not_found};
use crate::network::json_io::JsonIo;
use crate::network::layer::IoLayer;
use crate::network::line_io::LineIo;
use crate::network::socket::IoMode;
use crate::utils::{LogEvery, MinerError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Unanswered calls are forgotten after this long
pub const PENDING_CALL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Method that some pools send with a regular id although it is a notification
const NOTIFY_METHOD: &str = "mining.notify";

struct RpcShared {
    pending: Mutex<HandlerMap>,
    methods: Mutex<MethodTable>,
    next_id: AtomicU64,
    read_loop: AtomicBool,
    untracked: LogEvery,
}

impl RpcShared {
    fn pending(&self) -> MutexGuard<'_, HandlerMap> {
        self.pending.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn methods(&self) -> MutexGuard<'_, MethodTable> {
        self.methods.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Clone)]
struct RpcCore {
    io: JsonRpcIo,
    shared: Arc<RpcShared>,
}

impl RpcCore {
    fn next_id(&self) -> Value {
        Value::from(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn call_async(&self, cxn: &CxnHandle, mut request: Message, handler: ResponseHandler) -> Value {
        debug_assert!(request.is_request(), "only requests can be called");
        if request.id.is_null() {
            request.id = self.next_id();
        }
        let id = request.id.clone();
        // registered before the write so an instant response finds it
        self.shared.pending().add(&id, handler);
        self.io.write_async(cxn, request);
        id
    }

    fn dispatch(&self, cxn: CxnHandle, mut msg: Message) {
        let dropped = self.shared.pending().remove_older_than(PENDING_CALL_TIMEOUT);
        if dropped > 0 {
            log::debug!("Forgot {} calls that were never answered", dropped);
        }

        if msg.method_is(NOTIFY_METHOD) && !msg.id.is_null() {
            log::trace!("Treating {} with id {} as notification", NOTIFY_METHOD, msg.id);
            msg.id = Value::Null;
        }

        let Message { id, kind } = msg;
        match kind {
            MessageKind::Request { method, params } => {
                let handler = self.shared.methods().get(&method);
                let outcome = match handler {
                    Some(handler) => handler(&params),
                    None => Err(method_not_found(&method)),
                };

                if id.is_null() {
                    if let Err(e) = outcome {
                        log::debug!("Notification {} not handled: {}", method, e);
                    }
                } else {
                    let response = match outcome {
                        Ok(result) => Message::with_result(id, result),
                        Err(e) => Message::with_error(id, e),
                    };
                    self.io.write_async(&cxn, response);
                }
            }
            kind @ MessageKind::Response(_) => {
                let msg = Message { id, kind };
                let handler = self.shared.pending().try_pop(&msg.id);
                match handler {
                    Some(handler) => handler(cxn.clone(), msg),
                    None => {
                        if let Some(seen) = self.shared.untracked.hit() {
                            log::info!("Untracked response ({} so far): {}", seen, msg);
                        }
                    }
                }
            }
        }

        if self.shared.read_loop.load(Ordering::Acquire) {
            self.io.read_async(&cxn);
        }
    }
}

struct RetryCallState {
    responded: AtomicBool,
    never_responded: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl RetryCallState {
    fn fire_never_responded(&self) {
        let callback = self
            .never_responded
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// A JSON-RPC endpoint on its own io thread
///
/// Owns an [`IoService`] with the line, JSON and JSON-RPC layers stacked on
/// it. Incoming requests go to methods registered with
/// [`add_method`](Self::add_method); incoming responses go to the handler
/// of the matching call.
pub struct JsonRpcUtil {
    core: RpcCore,
    service: IoService,
}

impl JsonRpcUtil {
    /// Starts an endpoint
    ///
    /// # Errors
    /// Returns `MinerError` if the io service cannot be started.
    pub fn new(mode: IoMode) -> Result<Self, MinerError> {
        let service = IoService::new(mode)?;
        let io = JsonRpcIo::over(JsonIo::over(LineIo::over(service.base())));
        let core = RpcCore {
            io,
            shared: Arc::new(RpcShared {
                pending: Mutex::new(HandlerMap::new()),
                methods: Mutex::new(MethodTable::new()),
                next_id: AtomicU64::new(1),
                read_loop: AtomicBool::new(false),
                untracked: LogEvery::new(50),
            }),
        };

        let dispatcher = core.clone();
        core.io
            .set_on_receive(move |cxn, msg| dispatcher.dispatch(cxn, msg));

        Ok(JsonRpcUtil { core, service })
    }

    /// The JSON-RPC layer, for modifiers and direct access to the layers below
    pub fn io(&self) -> &JsonRpcIo {
        &self.core.io
    }

    /// Handle to the underlying io service
    pub fn base(&self) -> &BaseIo {
        self.core.io.base()
    }

    /// Id of the underlying io service
    pub fn io_uid(&self) -> u64 {
        self.service.uid()
    }

    /// Returns a fresh id from this endpoint's counter (starts at 1)
    pub fn next_id(&self) -> Value {
        self.core.next_id()
    }

    /// Makes every dispatched message re-arm the read on its connection
    pub fn set_read_loop_enabled(&self, enabled: bool) {
        self.core.shared.read_loop.store(enabled, Ordering::Release);
    }

    /// Registers a method; a later registration under the same name wins
    pub fn add_method<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.core.shared.methods().add(name, Arc::new(handler));
    }

    /// Whether a method is registered under `name`
    pub fn has_method(&self, name: &str) -> bool {
        self.core.shared.methods().contains(name)
    }

    /// Sends `request` and runs `handler` with its response
    ///
    /// An id is assigned if the request has none.
    ///
    /// # Returns
    /// The id the call is tracked under
    pub fn call_async<H>(&self, cxn: &CxnHandle, request: Message, handler: H) -> Value
    where
        H: FnOnce(CxnHandle, Message) + Send + 'static,
    {
        self.core.call_async(cxn, request, Box::new(handler))
    }

    /// Sends `request`, resending it every `interval` until a response arrives
    ///
    /// The first send registers the call; resends reuse its id. After
    /// `max_tries` sends without an answer the call is unregistered and
    /// `never_responded` runs. It also runs if the io service shuts down
    /// first. Either way it runs at most once, and never after a response.
    ///
    /// `still_valid` is asked on the io thread right before every write,
    /// the first one included. Once it returns false the call is
    /// unregistered and nothing more is sent; `never_responded` does not run.
    pub fn call_async_retry_n_times<V, H, N>(
        &self,
        cxn: &CxnHandle,
        mut request: Message,
        max_tries: u32,
        interval: Duration,
        mut still_valid: V,
        on_response: H,
        never_responded: N,
    ) where
        V: FnMut() -> bool + Send + 'static,
        H: FnOnce(CxnHandle, Message) + Send + 'static,
        N: FnOnce() + Send + 'static,
    {
        if request.id.is_null() {
            request.id = self.core.next_id();
        }

        let state = Arc::new(RetryCallState {
            responded: AtomicBool::new(false),
            never_responded: Mutex::new(Some(Box::new(never_responded))),
        });

        let pred = {
            let state = state.clone();
            let core = self.core.clone();
            let cxn = cxn.clone();
            let request = request.clone();
            let mut on_response = Some(on_response);
            let mut tries = 0u32;

            move || -> bool {
                if state.responded.load(Ordering::Acquire) {
                    return true;
                }
                if !still_valid() {
                    let _ = core.shared.pending().try_pop(&request.id);
                    log::debug!(
                        "Dropping {} (id {}) after {} sends, no longer valid",
                        request.method().unwrap_or("call"),
                        request.id,
                        tries
                    );
                    return true;
                }
                if tries >= max_tries {
                    let _ = core.shared.pending().try_pop(&request.id);
                    log::info!(
                        "No response to {} (id {}) after {} tries",
                        request.method().unwrap_or("call"),
                        request.id,
                        tries
                    );
                    state.fire_never_responded();
                    return true;
                }

                if tries == 0 {
                    let answered = state.clone();
                    let handler = on_response.take();
                    core.call_async(
                        &cxn,
                        request.clone(),
                        Box::new(move |cxn, response| {
                            answered.responded.store(true, Ordering::Release);
                            if let Some(handler) = handler {
                                handler(cxn, response);
                            }
                        }),
                    );
                } else {
                    log::debug!("Resending call id {} (try {})", request.id, tries + 1);
                    core.io.write_async(&cxn, request.clone());
                }
                tries += 1;
                false
            }
        };

        let on_cancelled = {
            let core = self.core.clone();
            let id = request.id.clone();
            move || {
                if !state.responded.load(Ordering::Acquire) {
                    let _ = core.shared.pending().try_pop(&id);
                    state.fire_never_responded();
                }
            }
        };

        self.base().retry_async_every(interval, pred, on_cancelled);
    }

    /// Sends a response (or any message) on `cxn`
    pub fn respond(&self, cxn: &CxnHandle, response: Message) {
        self.core.io.write_async(cxn, response);
    }

    /// Sends a message without tracking a response
    pub fn write_async(&self, cxn: &CxnHandle, msg: Message) {
        self.core.io.write_async(cxn, msg);
    }

    /// Arms one read on `cxn`
    pub fn read_async(&self, cxn: &CxnHandle) {
        self.core.io.read_async(cxn);
    }

    /// Number of calls still waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.core.shared.pending().len()
    }

    /// Whether a call with `id` is waiting for a response
    pub fn is_pending(&self, id: &Value) -> bool {
        self.core.shared.pending().contains(id)
    }
}
