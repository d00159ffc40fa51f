// src/network/jrpc/message.rs
//! JSON-RPC message model and its tolerant JSON mapping.
//!
//! Pools are frequently non-conformant, so decoding accepts:
//! - errors shaped as `[code, message]` arrays (or bare strings)
//! - responses carrying both `"result"` and `"error"`, where a non-null
//!   error wins
//! - unknown error codes, mapped to [`ErrorCode::Unknown`]

use crate::network::json_io::JsonIo;
use crate::network::layer::{Codec, ConversionError, TypeLayer};
use serde_json::{Map, Value, json};
use std::fmt;

/// Version tag written into every outgoing message
pub const JSONRPC_VERSION: &str = "2.0";

/// Error codes reserved by JSON-RPC 2.0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Code not in the reserved space, or missing
    Unknown,
    /// -32700
    ParseError,
    /// -32600
    InvalidRequest,
    /// -32601
    MethodNotFound,
    /// -32602
    InvalidParams,
    /// -32603
    InternalError,
    /// Implementation-defined server error, -32099..=-32000
    ServerError(i64),
}

impl ErrorCode {
    /// Maps a numeric code, falling back to [`ErrorCode::Unknown`]
    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            -32099..=-32000 => ErrorCode::ServerError(code),
            _ => {
                log::debug!("Unknown JSON-RPC error code {}", code);
                ErrorCode::Unknown
            }
        }
    }

    /// Numeric value on the wire; `Unknown` is sent as 0
    pub fn code(self) -> i64 {
        match self {
            ErrorCode::Unknown => 0,
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError(code) => code,
        }
    }

    fn from_json(value: &Value) -> Self {
        value.as_i64().map_or(ErrorCode::Unknown, ErrorCode::from_code)
    }
}

/// Error object of a failed call
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    /// Category of the failure
    pub code: ErrorCode,
    /// Human readable description
    pub message: String,
    /// Optional extra payload, `Null` if absent
    pub data: Value,
}

impl RpcError {
    /// Creates an error without data
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        RpcError {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Object(mut obj) => RpcError {
                code: obj
                    .get("code")
                    .map_or(ErrorCode::Unknown, ErrorCode::from_json),
                message: match obj.remove("message") {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
                data: obj.remove("data").unwrap_or(Value::Null),
            },
            Value::Array(items) => RpcError {
                code: items
                    .first()
                    .map_or(ErrorCode::Unknown, ErrorCode::from_json),
                message: match items.get(1) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                },
                data: items.get(2).cloned().unwrap_or(Value::Null),
            },
            Value::String(message) => RpcError::new(ErrorCode::Unknown, message),
            other => RpcError::new(ErrorCode::Unknown, other.to_string()),
        }
    }

    fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("code".into(), json!(self.code.code()));
        obj.insert("message".into(), json!(self.message));
        if !self.data.is_null() {
            obj.insert("data".into(), self.data.clone());
        }
        Value::Object(obj)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code.code())
    }
}

/// Outcome carried by a response
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Successful call
    Result(Value),
    /// Failed call
    Error(RpcError),
}

/// Request or response part of a message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// A call (a notification if the id is null)
    Request {
        /// Method name
        method: String,
        /// Positional or named parameters, `Null` if absent
        params: Value,
    },
    /// Answer to an earlier call
    Response(Response),
}

/// One JSON-RPC message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Correlation id; `Null` marks a notification
    pub id: Value,
    /// Payload
    pub kind: MessageKind,
}

impl Message {
    /// Builds a request
    pub fn request(id: Value, method: impl Into<String>, params: Value) -> Self {
        Message {
            id,
            kind: MessageKind::Request {
                method: method.into(),
                params,
            },
        }
    }

    /// Builds a notification (a request without id)
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::request(Value::Null, method, params)
    }

    /// Builds a successful response
    pub fn with_result(id: Value, result: Value) -> Self {
        Message {
            id,
            kind: MessageKind::Response(Response::Result(result)),
        }
    }

    /// Builds an error response
    pub fn with_error(id: Value, error: RpcError) -> Self {
        Message {
            id,
            kind: MessageKind::Response(Response::Error(error)),
        }
    }

    /// Whether this is a request (notifications included)
    pub fn is_request(&self) -> bool {
        matches!(self.kind, MessageKind::Request { .. })
    }

    /// Whether this is a response
    pub fn is_response(&self) -> bool {
        matches!(self.kind, MessageKind::Response(_))
    }

    /// Whether this is a request that expects no answer
    pub fn is_notification(&self) -> bool {
        self.is_request() && self.id.is_null()
    }

    /// Method name of a request
    pub fn method(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Request { method, .. } => Some(method),
            MessageKind::Response(_) => None,
        }
    }

    /// Whether this is a request for `name`
    pub fn method_is(&self, name: &str) -> bool {
        self.method() == Some(name)
    }

    /// Parameters of a request
    pub fn params(&self) -> Option<&Value> {
        match &self.kind {
            MessageKind::Request { params, .. } => Some(params),
            MessageKind::Response(_) => None,
        }
    }

    /// Result of a successful response
    pub fn result(&self) -> Option<&Value> {
        match &self.kind {
            MessageKind::Response(Response::Result(value)) => Some(value),
            _ => None,
        }
    }

    /// Error of a failed response
    pub fn error(&self) -> Option<&RpcError> {
        match &self.kind {
            MessageKind::Response(Response::Error(error)) => Some(error),
            _ => None,
        }
    }

    /// Whether this is a response whose result is literally `true`
    pub fn result_is_true(&self) -> bool {
        self.result() == Some(&Value::Bool(true))
    }

    /// Decodes a JSON document
    ///
    /// # Errors
    /// Returns `ConversionError::InvalidMessage` for non-objects, non-string
    /// methods, and objects that are neither a request nor a response.
    pub fn from_json(value: Value) -> Result<Self, ConversionError> {
        let Value::Object(mut obj) = value else {
            return Err(ConversionError::InvalidMessage(
                "message is not an object".into(),
            ));
        };
        let id = obj.remove("id").unwrap_or(Value::Null);

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(ConversionError::InvalidMessage(
                    "method is not a string".into(),
                ));
            };
            let params = obj.remove("params").unwrap_or(Value::Null);
            return Ok(Message::request(id, method, params));
        }

        match (obj.remove("result"), obj.remove("error")) {
            (_, Some(error)) if !error.is_null() => {
                Ok(Message::with_error(id, RpcError::from_json(error)))
            }
            (Some(result), _) => Ok(Message::with_result(id, result)),
            (None, Some(_)) => Ok(Message::with_result(id, Value::Null)),
            (None, None) => Err(ConversionError::InvalidMessage(
                "neither method, result nor error present".into(),
            )),
        }
    }

    /// Encodes to a JSON document; `jsonrpc` and `id` are always present
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), json!(JSONRPC_VERSION));
        obj.insert("id".into(), self.id.clone());

        match &self.kind {
            MessageKind::Request { method, params } => {
                obj.insert("method".into(), json!(method));
                let params = if params.is_null() { json!([]) } else { params.clone() };
                obj.insert("params".into(), params);
            }
            MessageKind::Response(Response::Result(result)) => {
                obj.insert("result".into(), result.clone());
            }
            MessageKind::Response(Response::Error(error)) => {
                obj.insert("error".into(), error.to_json());
            }
        }
        Value::Object(obj)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Converts JSON documents to messages and back
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonRpcCodec;

impl Codec for JsonRpcCodec {
    type Below = Value;
    type Value = Message;

    fn decode(&self, value: Value) -> Result<Message, ConversionError> {
        Message::from_json(value)
    }

    fn encode(&self, message: Message) -> Value {
        message.to_json()
    }

    fn name(&self) -> &'static str {
        "json-rpc"
    }
}

/// JSON-RPC layer over the JSON layer
pub type JsonRpcIo = TypeLayer<JsonRpcCodec, JsonIo>;

impl JsonRpcIo {
    /// Creates the JSON-RPC layer over `json`
    pub fn over(json: JsonIo) -> Self {
        TypeLayer::new(JsonRpcCodec, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_request_and_notification() {
        let msg = Message::from_json(json!({
            "id": 4, "method": "mining.subscribe", "params": ["miner", "1.0"]
        }))
        .unwrap();
        assert!(msg.is_request() && !msg.is_notification());
        assert!(msg.method_is("mining.subscribe"));
        assert_eq!(msg.params(), Some(&json!(["miner", "1.0"])));

        let notify = Message::from_json(json!({"id": null, "method": "mining.notify"})).unwrap();
        assert!(notify.is_notification(), "null id is a notification");
        let notify = Message::from_json(json!({"method": "mining.notify"})).unwrap();
        assert!(notify.is_notification(), "missing id is a notification");
    }

    #[test]
    fn test_decode_error_shapes() {
        let obj = Message::from_json(json!({
            "id": 1, "error": {"code": -32601, "message": "nope", "data": 5}
        }))
        .unwrap();
        let err = obj.error().unwrap();
        assert_eq!(err.code, ErrorCode::MethodNotFound);
        assert_eq!(err.message, "nope");
        assert_eq!(err.data, json!(5));

        let arr = Message::from_json(json!({"id": 2, "error": [21, "Job not found"]})).unwrap();
        let err = arr.error().expect("array errors are accepted");
        assert_eq!(err.code, ErrorCode::Unknown, "21 is outside the reserved space");
        assert_eq!(err.message, "Job not found");

        let server = Message::from_json(json!({"id": 3, "error": {"code": -32010}})).unwrap();
        assert_eq!(server.error().unwrap().code, ErrorCode::ServerError(-32010));
    }

    #[test]
    fn test_decode_result_and_error_both_present() {
        let failed = Message::from_json(json!({
            "id": 1, "result": null, "error": [23, "Low difficulty share"]
        }))
        .unwrap();
        assert!(failed.error().is_some(), "non-null error is authoritative");

        let ok = Message::from_json(json!({"id": 1, "result": true, "error": null})).unwrap();
        assert!(ok.result_is_true(), "null error leaves the result in charge");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Message::from_json(json!([1, 2, 3])).is_err());
        assert!(Message::from_json(json!({"id": 1})).is_err());
        assert!(Message::from_json(json!({"id": 1, "method": 7})).is_err());
    }

    #[test]
    fn test_encode_always_has_version_and_id() {
        let encoded = Message::notification("mining.notify", Value::Null).to_json();
        assert_eq!(
            encoded,
            json!({"jsonrpc": "2.0", "id": null, "method": "mining.notify", "params": []})
        );

        let err = Message::with_error(json!(9), RpcError::new(ErrorCode::MethodNotFound, "x"));
        assert_eq!(
            err.to_json(),
            json!({"jsonrpc": "2.0", "id": 9, "error": {"code": -32601, "message": "x"}})
        );
    }

    #[test]
    fn test_unknown_code_maps_to_sentinel() {
        assert_eq!(ErrorCode::from_code(-1), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_code(-32000), ErrorCode::ServerError(-32000));
        assert_eq!(ErrorCode::from_code(-32099), ErrorCode::ServerError(-32099));
        assert_eq!(ErrorCode::from_code(-32100), ErrorCode::Unknown);
        assert_eq!(ErrorCode::Unknown.code(), 0);
    }
}
