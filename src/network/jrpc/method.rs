// src/network/jrpc/method.rs
//! Named handlers for incoming requests.

use crate::network::jrpc::message::{ErrorCode, RpcError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Handles the params of an incoming request and produces the response payload
pub type MethodFn = Arc<dyn Fn(&Value) -> Result<Value, RpcError> + Send + Sync>;

/// Method table of a JSON-RPC endpoint
#[derive(Default, Clone)]
pub struct MethodTable {
    methods: HashMap<String, MethodFn>,
}

impl MethodTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`, replacing an earlier one
    pub fn add(&mut self, name: impl Into<String>, handler: MethodFn) {
        let name = name.into();
        if self.methods.insert(name.clone(), handler).is_some() {
            log::debug!("Replaced handler for method {}", name);
        }
    }

    /// Looks up the handler for `name`
    pub fn get(&self, name: &str) -> Option<MethodFn> {
        self.methods.get(name).cloned()
    }

    /// Whether `name` has a handler
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

}

/// The error answered to a request for a method nobody registered
pub fn method_not_found(name: &str) -> RpcError {
    RpcError::new(ErrorCode::MethodNotFound, format!("method not supported: {}", name))
}
