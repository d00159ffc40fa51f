// src/network/connection.rs
//! Connections and the handles callers use to refer to them.
//!
//! A [`Connection`] is kept alive only by the io tasks that still have work
//! for it: a pending read or a queued write. Callers hold a [`CxnHandle`],
//! which never keeps the connection alive and must be resolved against the
//! io service that issued it before every use.

use crate::network::socket::Socket;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::io::{AsyncBufReadExt, BufReader, ReadHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) type DisconnectCallback = Box<dyn FnOnce(CxnHandle) + Send>;

/// One queued line plus the reference that keeps its connection alive until written
pub(crate) type WriteOp = (String, Arc<Connection>);

/// A live socket owned by an io service
pub(crate) struct Connection {
    uid: u64,
    io_uid: u64,
    peer: String,
    reader: tokio::sync::Mutex<BufReader<ReadHalf<Socket>>>,
    writer: mpsc::UnboundedSender<WriteOp>,
    disconnected: AtomicBool,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
    shutdown: CancellationToken,
}

impl Connection {
    pub(crate) fn new(
        uid: u64,
        io_uid: u64,
        peer: String,
        reader: ReadHalf<Socket>,
        writer: mpsc::UnboundedSender<WriteOp>,
        on_disconnect: DisconnectCallback,
        shutdown: CancellationToken,
    ) -> Self {
        Connection {
            uid,
            io_uid,
            peer,
            reader: tokio::sync::Mutex::new(BufReader::new(reader)),
            writer,
            disconnected: AtomicBool::new(false),
            on_disconnect: Mutex::new(Some(on_disconnect)),
            shutdown,
        }
    }

    pub(crate) fn uid(&self) -> u64 {
        self.uid
    }

    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    /// Reads one raw line (terminator included) from the socket
    ///
    /// # Returns
    /// `None` on EOF or a socket error; the disconnect callback has fired by then.
    pub(crate) async fn read_line(self: &Arc<Self>) -> Option<String> {
        let mut buf = Vec::new();
        let result = self.reader.lock().await.read_until(b'\n', &mut buf).await;

        match result {
            Ok(0) => {
                self.disconnect("connection closed by peer");
                None
            }
            Ok(_) => Some(String::from_utf8_lossy(&buf).into_owned()),
            Err(e) => {
                self.disconnect(&e.to_string());
                None
            }
        }
    }

    /// Queues a raw line for the writer task, preserving submission order
    pub(crate) fn enqueue_write(self: &Arc<Self>, data: String) {
        if self.is_disconnected() {
            log::debug!("Dropping write to disconnected {}", self.peer);
            return;
        }
        if self.writer.send((data, self.clone())).is_err() {
            log::debug!("Writer of {} has stopped, dropping write", self.peer);
        }
    }

    /// Marks the connection dead and runs the disconnect callback, once
    pub(crate) fn disconnect(self: &Arc<Self>, reason: &str) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Disconnected from {}: {}", self.peer, reason);
        self.fire_on_disconnect(self.handle());
    }

    pub(crate) fn handle(self: &Arc<Self>) -> CxnHandle {
        CxnHandle {
            cxn: Arc::downgrade(self),
            io_uid: self.io_uid,
            cxn_uid: self.uid,
        }
    }

    fn fire_on_disconnect(&self, handle: CxnHandle) {
        let callback = self
            .on_disconnect
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();

        if self.shutdown.is_cancelled() {
            return;
        }
        if let Some(callback) = callback {
            callback(handle);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Nothing is pending anymore: this is the teardown point
        if !self.disconnected.swap(true, Ordering::AcqRel) {
            log::debug!("Closing idle connection to {}", self.peer);
            let handle = CxnHandle {
                cxn: Weak::new(),
                io_uid: self.io_uid,
                cxn_uid: self.uid,
            };
            self.fire_on_disconnect(handle);
        }
    }
}

/// Non-owning reference to a connection that may already be gone
///
/// Handles are cheap to clone and compare. Resolving a handle against an io
/// service other than the one that created it always fails.
#[derive(Clone, Default)]
pub struct CxnHandle {
    cxn: Weak<Connection>,
    io_uid: u64,
    cxn_uid: u64,
}

impl CxnHandle {
    /// Returns the connection if it is alive and belongs to io instance `io_uid`
    pub(crate) fn resolve(&self, io_uid: u64) -> Option<Arc<Connection>> {
        if self.io_uid != io_uid {
            log::warn!(
                "Connection handle of io #{} used with io #{}; ignoring",
                self.io_uid,
                io_uid
            );
            return None;
        }
        let cxn = self.cxn.upgrade();
        if cxn.is_none() {
            log::debug!("Connection #{} no longer exists", self.cxn_uid);
        }
        cxn
    }

    /// Uid of the io service that issued this handle, 0 for an empty handle
    pub fn io_uid(&self) -> u64 {
        self.io_uid
    }

    /// Whether the referenced connection still exists
    pub fn is_alive(&self) -> bool {
        self.cxn
            .upgrade()
            .is_some_and(|cxn| !cxn.is_disconnected())
    }
}

impl PartialEq for CxnHandle {
    fn eq(&self, other: &Self) -> bool {
        self.io_uid == other.io_uid && self.cxn_uid == other.cxn_uid
    }
}

impl Eq for CxnHandle {}

impl fmt::Debug for CxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CxnHandle(io #{}, cxn #{})", self.io_uid, self.cxn_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_handle_never_resolves() {
        let handle = CxnHandle::default();
        assert!(handle.resolve(0).is_none(), "default handle has no connection");
        assert!(handle.resolve(7).is_none(), "default handle belongs to no io");
        assert!(!handle.is_alive());
        assert_eq!(handle, CxnHandle::default(), "empty handles compare equal");
    }
}
