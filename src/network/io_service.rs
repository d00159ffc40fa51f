// src/network/io_service.rs
//! The io service: one OS thread driving one single-threaded tokio runtime.
//!
//! [`IoService`] owns the thread and is the only thing that can stop it.
//! [`BaseIo`] is the cheap, clonable handle every layer talks to; it holds a
//! weak reference, so closures stored inside the service never keep it alive.
//! All callbacks of one service (receive, connect, disconnect, posted work,
//! retry predicates) run on its io thread, one at a time.

use crate::network::connection::{Connection, CxnHandle, DisconnectCallback};
use crate::network::layer::IoLayer;
use crate::network::retry::{RetryEngine, RetryStep, RetryToken};
use crate::network::socket::{IoMode, Socket, tls_connector};
use crate::utils::error::MinerError;
use arc_swap::ArcSwapOption;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

/// First delay before reconnecting a lost auto-reconnect client
pub const RECONNECT_BACKOFF_MIN: Duration = Duration::from_secs(1);
/// Upper bound of the doubling reconnect delay
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

static NEXT_IO_UID: AtomicU64 = AtomicU64::new(1);

struct ReceiveSlot(Box<dyn Fn(CxnHandle, String) + Send + Sync>);

pub(crate) struct IoShared {
    uid: u64,
    handle: Handle,
    shutdown: CancellationToken,
    tls: Option<TlsConnector>,
    on_receive: ArcSwapOption<ReceiveSlot>,
    next_cxn_uid: AtomicU64,
    retries: RetryEngine,
    io_thread: OnceLock<ThreadId>,
}

impl IoShared {
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            log::debug!("io #{} is shutting down, task discarded", self.uid);
            return;
        }
        let shutdown = self.shutdown.clone();
        self.handle.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = fut => {}
            }
        });
    }

    fn deliver(&self, cxn: CxnHandle, line: String) {
        match self.on_receive.load_full() {
            Some(slot) => (slot.0)(cxn, line),
            None => log::debug!("io #{} has no receiver, dropping line", self.uid),
        }
    }

    /// Wraps a connected socket into a connection and starts its writer task
    fn adopt(&self, socket: Socket, peer: String, on_disconnect: DisconnectCallback) -> Arc<Connection> {
        let (reader, writer) = tokio::io::split(socket);
        let (tx, rx) = mpsc::unbounded_channel();
        let uid = self.next_cxn_uid.fetch_add(1, Ordering::Relaxed);

        log::info!("Connected to {} (io #{}, cxn #{})", peer, self.uid, uid);
        self.spawn(run_writer(writer, rx));

        Arc::new(Connection::new(
            uid,
            self.uid,
            peer,
            reader,
            tx,
            on_disconnect,
            self.shutdown.clone(),
        ))
    }
}

async fn run_writer(
    mut half: WriteHalf<Socket>,
    mut rx: mpsc::UnboundedReceiver<(String, Arc<Connection>)>,
) {
    while let Some((data, cxn)) = rx.recv().await {
        let result = async {
            half.write_all(data.as_bytes()).await?;
            half.flush().await
        }
        .await;

        if let Err(e) = result {
            cxn.disconnect(&e.to_string());
            break;
        }
    }
    let _ = half.shutdown().await;
}

/// Owner of an io thread
///
/// Dropping the service stops the thread, waits for it, and then cancels
/// every outstanding retry, running their cancellation callbacks before
/// `drop` returns. No callback of this service fires afterwards.
pub struct IoService {
    shared: Arc<IoShared>,
    thread: Option<JoinHandle<()>>,
}

impl IoService {
    /// Starts a new io thread
    ///
    /// # Arguments
    /// * `mode` - Plain TCP or TLS; TLS roots are loaded here
    ///
    /// # Errors
    /// Returns `MinerError` if the runtime or thread cannot be created, or
    /// if the TLS configuration is unusable.
    pub fn new(mode: IoMode) -> Result<Self, MinerError> {
        let tls = match &mode {
            IoMode::Tcp => None,
            IoMode::TcpTls(desc) => Some(tls_connector(desc)?),
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let uid = NEXT_IO_UID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(IoShared {
            uid,
            handle: runtime.handle().clone(),
            shutdown: CancellationToken::new(),
            tls,
            on_receive: ArcSwapOption::empty(),
            next_cxn_uid: AtomicU64::new(1),
            retries: RetryEngine::new(),
            io_thread: OnceLock::new(),
        });

        let shutdown = shared.shutdown.clone();
        let thread = std::thread::Builder::new()
            .name(format!("io-{}", uid))
            .spawn(move || {
                runtime.block_on(shutdown.cancelled());
                // dropping the runtime drops every task still parked on it
                drop(runtime);
            })?;
        let _ = shared.io_thread.set(thread.thread().id());

        log::debug!("io #{} started", uid);
        Ok(IoService {
            shared,
            thread: Some(thread),
        })
    }

    /// Handle for issuing operations on this service
    pub fn base(&self) -> BaseIo {
        BaseIo {
            shared: Arc::downgrade(&self.shared),
            uid: self.shared.uid,
        }
    }

    /// Process-unique id of this service
    pub fn uid(&self) -> u64 {
        self.shared.uid
    }

    /// Number of retries currently scheduled
    pub fn pending_retries(&self) -> usize {
        self.shared.retries.len()
    }
}

impl Drop for IoService {
    fn drop(&mut self) {
        let uid = self.shared.uid;
        self.shared.shutdown.cancel();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == std::thread::current().id() {
                // the runtime winds down once the current callback returns
                log::debug!("io #{} dropped from its own thread", uid);
            } else if thread.join().is_err() {
                log::error!("io thread #{} panicked", uid);
            }
        }

        self.shared.retries.cancel_all();
        log::debug!("io #{} stopped", uid);
    }
}

/// Non-owning handle to an [`IoService`]
///
/// Every operation silently does nothing (with a debug log) once the
/// service has been dropped.
#[derive(Clone)]
pub struct BaseIo {
    shared: Weak<IoShared>,
    uid: u64,
}

impl BaseIo {
    fn upgrade(&self) -> Option<Arc<IoShared>> {
        let shared = self.shared.upgrade();
        if shared.is_none() {
            log::debug!("io #{} is gone", self.uid);
        }
        shared
    }

    /// Id of the service this handle points to
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Whether the owning service was dropped or is stopping
    pub fn has_stopped(&self) -> bool {
        self.shared
            .upgrade()
            .is_none_or(|shared| shared.shutdown.is_cancelled())
    }

    /// Whether the calling thread is this service's io thread
    pub fn is_io_thread(&self) -> bool {
        self.shared.upgrade().is_some_and(|shared| {
            shared.io_thread.get() == Some(&std::thread::current().id())
        })
    }

    /// Connects once to `host:port`
    ///
    /// `on_connected` runs on the io thread with a handle to the new
    /// connection. `on_disconnected` runs when that connection ends, or
    /// with an empty handle if the connection attempt itself failed.
    pub fn launch_client<C, D>(&self, host: &str, port: u16, on_connected: C, on_disconnected: D)
    where
        C: FnOnce(CxnHandle) + Send + 'static,
        D: FnOnce(CxnHandle) + Send + 'static,
    {
        let Some(shared) = self.upgrade() else {
            return;
        };
        let host = host.to_string();
        let task_shared = shared.clone();

        shared.spawn(async move {
            log::info!("Connecting to {}:{}", host, port);
            match Socket::connect(&host, port, task_shared.tls.as_ref()).await {
                Ok(socket) => {
                    let cxn = task_shared.adopt(
                        socket,
                        format!("{}:{}", host, port),
                        Box::new(on_disconnected),
                    );
                    on_connected(cxn.handle());
                }
                Err(e) => {
                    log::warn!("Could not connect to {}:{}: {}", host, port, e);
                    on_disconnected(CxnHandle::default());
                }
            }
        });
    }

    /// Connects to `host:port` and reconnects whenever the connection is lost
    ///
    /// Reconnect delays start at [`RECONNECT_BACKOFF_MIN`] and double up to
    /// [`RECONNECT_BACKOFF_MAX`]; a successful connect resets them. Stops
    /// when the service is dropped.
    pub fn launch_client_auto_reconnect<C>(&self, host: &str, port: u16, on_connected: C)
    where
        C: Fn(CxnHandle) + Send + Sync + 'static,
    {
        let reconnect = Arc::new(Reconnect {
            host: host.to_string(),
            port,
            on_connected: Box::new(on_connected),
            backoff: Mutex::new(RECONNECT_BACKOFF_MIN),
        });
        Reconnect::start(self.clone(), reconnect);
    }

    /// Listens on 127.0.0.1:`port` (0 picks a free port) and adopts every accepted peer
    ///
    /// # Returns
    /// The bound address
    ///
    /// # Errors
    /// Returns `MinerError` if the service is gone, runs in TLS mode, or the
    /// port cannot be bound.
    pub fn launch_server<C, D>(
        &self,
        port: u16,
        on_connected: C,
        on_disconnected: D,
    ) -> Result<SocketAddr, MinerError>
    where
        C: Fn(CxnHandle) + Send + Sync + 'static,
        D: Fn(CxnHandle) + Send + Sync + 'static,
    {
        let shared = self
            .upgrade()
            .ok_or_else(|| MinerError::ConnectionError("io service stopped".into()))?;
        if shared.tls.is_some() {
            return Err(MinerError::ConnectionError(
                "TLS servers are not supported".into(),
            ));
        }

        let std_listener = std::net::TcpListener::bind(("127.0.0.1", port))?;
        std_listener.set_nonblocking(true)?;
        let addr = std_listener.local_addr()?;
        let listener = {
            let _guard = shared.handle.enter();
            TcpListener::from_std(std_listener)?
        };
        log::info!("io #{} listening on {}", shared.uid, addr);

        let on_disconnected = Arc::new(on_disconnected);
        let task_shared = shared.clone();
        shared.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        let lost = on_disconnected.clone();
                        let cxn = task_shared.adopt(
                            Socket::Plain(stream),
                            peer.to_string(),
                            Box::new(move |cxn| lost(cxn)),
                        );
                        on_connected(cxn.handle());
                    }
                    Err(e) => {
                        log::warn!("Accept failed on {}: {}", addr, e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });

        Ok(addr)
    }

    /// Runs `f` on the io thread as soon as possible
    pub fn post_async<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(shared) = self.upgrade() {
            shared.spawn(async move { f() });
        }
    }

    /// Runs `f` on the io thread after `delay`, unless the service stops first
    pub fn post_after<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(shared) = self.upgrade() {
            shared.spawn(async move {
                tokio::time::sleep(delay).await;
                f()
            });
        }
    }

    /// Calls `pred` now and then every `interval` until it returns true
    ///
    /// `on_cancelled` runs instead if the retry is cancelled, explicitly or
    /// by the service shutting down, before `pred` finished it.
    ///
    /// # Returns
    /// A token for [`cancel_retry`](Self::cancel_retry), or `None` if the
    /// service is gone (in which case `on_cancelled` has already run).
    pub fn retry_async_every<P, C>(
        &self,
        interval: Duration,
        pred: P,
        on_cancelled: C,
    ) -> Option<RetryToken>
    where
        P: FnMut() -> bool + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let Some(shared) = self.upgrade() else {
            on_cancelled();
            return None;
        };

        let token = shared.retries.register(Box::new(pred), Box::new(on_cancelled));
        let task_shared = shared.clone();
        shared.spawn(async move {
            while task_shared.retries.poll(token) == RetryStep::Again {
                tokio::time::sleep(interval).await;
            }
        });
        Some(token)
    }

    /// Cancels a retry scheduled with [`retry_async_every`](Self::retry_async_every)
    pub fn cancel_retry(&self, token: RetryToken) {
        if let Some(shared) = self.upgrade() {
            shared.retries.cancel(token);
        }
    }
}

impl IoLayer for BaseIo {
    type Value = String;

    fn set_on_receive<F>(&self, on_receive: F)
    where
        F: Fn(CxnHandle, String) + Send + Sync + 'static,
    {
        if let Some(shared) = self.upgrade() {
            shared
                .on_receive
                .store(Some(Arc::new(ReceiveSlot(Box::new(on_receive)))));
        }
    }

    fn read_async(&self, cxn: &CxnHandle) {
        let Some(shared) = self.upgrade() else {
            return;
        };
        let Some(connection) = cxn.resolve(shared.uid) else {
            return;
        };
        let task_shared = shared.clone();

        shared.spawn(async move {
            if let Some(line) = connection.read_line().await {
                task_shared.deliver(connection.handle(), line);
            }
        });
    }

    fn write_async(&self, cxn: &CxnHandle, data: String) {
        let Some(shared) = self.upgrade() else {
            return;
        };
        if let Some(connection) = cxn.resolve(shared.uid) {
            connection.enqueue_write(data);
        }
    }

    fn base(&self) -> &BaseIo {
        self
    }
}

struct Reconnect {
    host: String,
    port: u16,
    on_connected: Box<dyn Fn(CxnHandle) + Send + Sync>,
    backoff: Mutex<Duration>,
}

impl Reconnect {
    fn start(io: BaseIo, this: Arc<Self>) {
        let connected = this.clone();
        let lost = this.clone();
        let retry_io = io.clone();

        io.launch_client(
            &this.host,
            this.port,
            move |cxn| {
                *connected.lock_backoff() = RECONNECT_BACKOFF_MIN;
                (connected.on_connected)(cxn);
            },
            move |_| {
                let delay = lost.next_delay();
                log::info!(
                    "Reconnecting to {}:{} in {}s",
                    lost.host,
                    lost.port,
                    delay.as_secs()
                );
                let io = retry_io.clone();
                retry_io.post_after(delay, move || Reconnect::start(io, lost));
            },
        );
    }

    fn next_delay(&self) -> Duration {
        let mut backoff = self.lock_backoff();
        let delay = *backoff;
        *backoff = (delay * 2).min(RECONNECT_BACKOFF_MAX);
        delay
    }

    fn lock_backoff(&self) -> std::sync::MutexGuard<'_, Duration> {
        self.backoff.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc as std_mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_post_async_runs_on_io_thread() {
        let service = IoService::new(IoMode::Tcp).unwrap();
        let io = service.base();
        let (tx, rx) = std_mpsc::channel();

        let on_thread = io.clone();
        io.post_async(move || {
            tx.send(on_thread.is_io_thread()).unwrap();
        });

        assert!(rx.recv_timeout(WAIT).unwrap(), "posted work runs on the io thread");
        assert!(!io.is_io_thread(), "the test thread is not the io thread");
    }

    #[test]
    fn test_handle_from_other_service_never_resolves() {
        let server = IoService::new(IoMode::Tcp).unwrap();
        let other = IoService::new(IoMode::Tcp).unwrap();
        let (tx, rx) = std_mpsc::channel();

        let server_io = server.base();
        server_io.set_on_receive(|_, _| {});
        let addr = server_io
            .launch_server(0, move |cxn| tx.send(cxn).unwrap(), |_| {})
            .unwrap();

        let client = IoService::new(IoMode::Tcp).unwrap();
        let client_io = client.base();
        let keep = client_io.clone();
        client_io.launch_client(
            "127.0.0.1",
            addr.port(),
            move |cxn| keep.read_async(&cxn),
            |_| {},
        );

        let cxn = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(cxn.io_uid(), server.uid(), "handle is stamped with its io");
        assert!(cxn.resolve(other.uid()).is_none(), "foreign io must not resolve");

        // using it through the wrong service is a silent no-op
        other.base().write_async(&cxn, "ignored\n".into());
        other.base().read_async(&cxn);
    }

    #[test]
    fn test_lines_round_trip_in_order() {
        let server = IoService::new(IoMode::Tcp).unwrap();
        let server_io = server.base();
        let (tx, rx) = std_mpsc::channel();

        let echo = server_io.clone();
        server_io.set_on_receive(move |cxn, line| {
            echo.write_async(&cxn, line);
            echo.read_async(&cxn);
        });
        let accept = server_io.clone();
        let addr = server_io
            .launch_server(0, move |cxn| accept.read_async(&cxn), |_| {})
            .unwrap();

        let client = IoService::new(IoMode::Tcp).unwrap();
        let client_io = client.base();
        let reader = client_io.clone();
        client_io.set_on_receive(move |cxn, line| {
            tx.send(line).unwrap();
            reader.read_async(&cxn);
        });
        let writer = client_io.clone();
        client_io.launch_client(
            "127.0.0.1",
            addr.port(),
            move |cxn| {
                for i in 0..5 {
                    writer.write_async(&cxn, format!("line {}\n", i));
                }
                writer.read_async(&cxn);
            },
            |_| {},
        );

        let got: Vec<String> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        let want: Vec<String> = (0..5).map(|i| format!("line {}\n", i)).collect();
        assert_eq!(got, want, "writes arrive in submission order");
    }

    #[test]
    fn test_disconnect_callback_fires_once_on_eof() {
        let server = IoService::new(IoMode::Tcp).unwrap();
        let server_io = server.base();
        server_io.set_on_receive(|_, _| {});
        // the server keeps nothing pending, so accepted connections close at once
        let addr = server_io.launch_server(0, |_| {}, |_| {}).unwrap();

        let client = IoService::new(IoMode::Tcp).unwrap();
        let client_io = client.base();
        client_io.set_on_receive(|_, _| {});
        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std_mpsc::channel();
        let count = fired.clone();
        let reader = client_io.clone();
        client_io.launch_client(
            "127.0.0.1",
            addr.port(),
            move |cxn| reader.read_async(&cxn),
            move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            },
        );

        rx.recv_timeout(WAIT).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(fired.load(Ordering::SeqCst), 1, "disconnect fires exactly once");
    }

    #[test]
    fn test_failed_connect_reports_disconnect() {
        let client = IoService::new(IoMode::Tcp).unwrap();
        // bind and drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (tx, rx) = std_mpsc::channel();
        client.base().launch_client(
            "127.0.0.1",
            port,
            |_| panic!("nothing listens there"),
            move |cxn| tx.send(cxn).unwrap(),
        );

        let cxn = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(cxn, CxnHandle::default(), "failed attempts report an empty handle");
    }

    #[test]
    fn test_retry_every_until_true() {
        let service = IoService::new(IoMode::Tcp).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std_mpsc::channel();

        let c = calls.clone();
        service.base().retry_async_every(
            Duration::from_millis(10),
            move || {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 3 {
                    tx.send(()).unwrap();
                }
                n == 3
            },
            || panic!("finished retries are not cancelled"),
        );

        rx.recv_timeout(WAIT).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "stops after the predicate says so");
        assert_eq!(service.pending_retries(), 0);
    }

    #[test]
    fn test_drop_cancels_outstanding_retries() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        {
            let service = IoService::new(IoMode::Tcp).unwrap();
            for _ in 0..3 {
                let c = cancelled.clone();
                service.base().retry_async_every(
                    Duration::from_secs(60),
                    || false,
                    move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    },
                );
            }
        }
        assert_eq!(
            cancelled.load(Ordering::SeqCst),
            3,
            "every cancel callback has run once drop returns"
        );
    }

    #[test]
    fn test_operations_after_drop_are_noops() {
        let service = IoService::new(IoMode::Tcp).unwrap();
        let io = service.base();
        drop(service);

        assert!(io.has_stopped());
        io.post_async(|| panic!("must not run"));
        io.read_async(&CxnHandle::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let token = io.retry_async_every(Duration::from_millis(1), || true, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert!(token.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 1, "cancel callback runs immediately");
    }
}
