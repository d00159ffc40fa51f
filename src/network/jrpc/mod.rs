// src/network/jrpc/mod.rs
//! JSON-RPC over newline-delimited JSON
//!
//! The message model and its codec, a request builder, the pending-call
//! map, the method table, and [`JsonRpcUtil`] tying them to an io service.

/// Message types and the JSON-RPC codec layer
pub mod message;

/// Fluent request construction
pub mod builder;

/// Pending calls keyed by id
pub mod handler_map;

/// Named request handlers
pub mod method;

/// The endpoint used by pools
pub mod util;

pub use builder::RequestBuilder;
pub use handler_map::{HandlerMap, ResponseHandler};
pub use message::{ErrorCode, JsonRpcCodec, JsonRpcIo, Message, MessageKind, Response, RpcError};
pub use method::{MethodTable, method_not_found};
pub use util::{JsonRpcUtil, PENDING_CALL_TIMEOUT};
