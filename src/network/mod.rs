// src/network/mod.rs
//! Network communication components
//!
//! Everything between a pool and its socket:
//! - `IoService` / `BaseIo`: the io thread, connections and retries
//! - `LineIo`, `JsonIo`, `JsonRpcIo`: the framing stack
//! - `JsonRpcUtil`: request/response correlation on top of it

/// Sockets and TLS setup
pub mod socket;

/// Connections and the handles that refer to them
pub mod connection;

/// Retry bookkeeping driven by the io service
pub mod retry;

/// The io thread and its handle
pub mod io_service;

/// Layer traits and the generic conversion layer
pub mod layer;

/// Line framing
pub mod line_io;

/// JSON document framing
pub mod json_io;

/// JSON-RPC messages and endpoint
pub mod jrpc;

// Re-export main components for cleaner imports
pub use connection::CxnHandle;
pub use io_service::{BaseIo, IoService};
pub use json_io::JsonIo;
pub use layer::{Codec, ConversionError, IoLayer, TypeLayer};
pub use line_io::LineIo;
pub use retry::RetryToken;
pub use socket::{IoMode, TlsDesc};
