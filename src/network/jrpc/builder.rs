// src/network/jrpc/builder.rs
//! Fluent construction of request messages.

use crate::network::jrpc::message::Message;
use serde_json::{Map, Value};

enum Params {
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

/// Builds a request [`Message`]
///
/// ```
/// use gpu_miner_rs::network::jrpc::RequestBuilder;
///
/// let msg = RequestBuilder::new()
///     .id(3)
///     .method("mining.authorize")
///     .param("wallet.rig")
///     .param("x")
///     .done();
/// assert!(msg.method_is("mining.authorize"));
/// ```
///
/// Positional and named parameters cannot be mixed; switching kinds
/// discards what was collected so far.
pub struct RequestBuilder {
    id: Value,
    method: String,
    params: Params,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// Starts a request without id (a notification unless [`id`](Self::id) is called)
    pub fn new() -> Self {
        RequestBuilder {
            id: Value::Null,
            method: String::new(),
            params: Params::None,
        }
    }

    /// Sets the correlation id
    pub fn id(mut self, id: impl Into<Value>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the method name
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Appends a positional parameter
    pub fn param(mut self, value: impl Into<Value>) -> Self {
        match &mut self.params {
            Params::Positional(items) => items.push(value.into()),
            Params::Named(_) => {
                log::warn!("{}: positional param replaces named params", self.method);
                self.params = Params::Positional(vec![value.into()]);
            }
            Params::None => self.params = Params::Positional(vec![value.into()]),
        }
        self
    }

    /// Adds a named parameter
    pub fn named_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self.params {
            Params::Named(map) => {
                map.insert(name.into(), value.into());
            }
            other => {
                if matches!(other, Params::Positional(_)) {
                    log::warn!("{}: named param replaces positional params", self.method);
                }
                let mut map = Map::new();
                map.insert(name.into(), value.into());
                self.params = Params::Named(map);
            }
        }
        self
    }

    /// Finishes the request
    pub fn done(self) -> Message {
        let params = match self.params {
            Params::None => Value::Array(Vec::new()),
            Params::Positional(items) => Value::Array(items),
            Params::Named(map) => Value::Object(map),
        };
        Message::request(self.id, self.method, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_positional() {
        let msg = RequestBuilder::new()
            .id(1)
            .method("mining.subscribe")
            .param("sgminer")
            .param("5.5.17-gm")
            .done();
        assert_eq!(msg.id, json!(1));
        assert_eq!(msg.params(), Some(&json!(["sgminer", "5.5.17-gm"])));
        assert!(!msg.is_notification());
    }

    #[test]
    fn test_builder_named_and_defaults() {
        let msg = RequestBuilder::new()
            .method("login")
            .named_param("login", "user")
            .named_param("pass", "x")
            .done();
        assert!(msg.is_notification(), "no id means notification");
        assert_eq!(msg.params(), Some(&json!({"login": "user", "pass": "x"})));

        let bare = RequestBuilder::new().id("a").method("getjobtemplate").done();
        assert_eq!(bare.params(), Some(&json!([])), "missing params become an empty array");
    }
}
