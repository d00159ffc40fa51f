// src/network/json_io.rs
//! One JSON document per line.

use crate::network::layer::{Codec, ConversionError, TypeLayer};
use crate::network::line_io::LineIo;
use serde_json::Value;

/// Parses lines into JSON documents and serializes them back
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Below = String;
    type Value = Value;

    fn decode(&self, line: String) -> Result<Value, ConversionError> {
        Ok(serde_json::from_str(&line)?)
    }

    fn encode(&self, value: Value) -> String {
        value.to_string()
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// JSON layer over the line layer
pub type JsonIo = TypeLayer<JsonCodec, LineIo>;

impl JsonIo {
    /// Creates the JSON layer over `lines`
    pub fn over(lines: LineIo) -> Self {
        TypeLayer::new(JsonCodec, lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_codec_parses_documents() {
        let codec = JsonCodec;
        let value = codec.decode(r#"{"id":1,"result":true}"#.into()).unwrap();
        assert_eq!(value, json!({"id": 1, "result": true}));
        assert!(
            matches!(codec.decode("{not json".into()), Err(ConversionError::Json(_))),
            "malformed input is a conversion error"
        );
    }

    #[test]
    fn test_json_codec_output_is_single_line() {
        let encoded = JsonCodec.encode(json!({"text": "a\nb"}));
        assert!(!encoded.contains('\n'), "escaped newlines keep one document per line");
    }
}
