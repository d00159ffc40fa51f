// src/network/line_io.rs
//! Line framing: strips and appends the newline terminator.

use crate::network::io_service::BaseIo;
use crate::network::layer::{Codec, ConversionError, TypeLayer};

/// Converts raw newline-terminated chunks to bare lines and back
#[derive(Debug, Default, Clone, Copy)]
pub struct LineCodec;

impl Codec for LineCodec {
    type Below = String;
    type Value = String;

    fn decode(&self, raw: String) -> Result<String, ConversionError> {
        let line = raw.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(ConversionError::EmptyLine);
        }
        log::trace!("<-- {}", line);
        Ok(line.to_string())
    }

    fn encode(&self, mut line: String) -> String {
        log::trace!("--> {}", line);
        line.push('\n');
        line
    }

    fn name(&self) -> &'static str {
        "line"
    }
}

/// Line layer directly on the transport
pub type LineIo = TypeLayer<LineCodec, BaseIo>;

impl LineIo {
    /// Creates the line layer over `base`
    pub fn over(base: BaseIo) -> Self {
        TypeLayer::new(LineCodec, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_codec_strips_terminators() {
        let codec = LineCodec;
        assert_eq!(codec.decode("hello\r\n".into()).unwrap(), "hello");
        assert_eq!(codec.decode("hello\n".into()).unwrap(), "hello");
        assert_eq!(codec.decode("partial".into()).unwrap(), "partial", "EOF tail is kept");
        assert_eq!(codec.encode("out".into()), "out\n", "encode appends the newline");
    }

    #[test]
    fn test_line_codec_rejects_blank_lines() {
        let codec = LineCodec;
        assert!(matches!(codec.decode("\n".into()), Err(ConversionError::EmptyLine)));
        assert!(matches!(codec.decode("  \r\n".into()), Err(ConversionError::EmptyLine)));
    }
}
