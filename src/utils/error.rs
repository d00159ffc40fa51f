// src/utils/error.rs
use serde_json;
use std::io;
use thiserror::Error;
use url;

/// Main error type for the miner's pool connectivity layer
///
/// This enum represents the fallible setup paths: starting an io service,
/// building TLS configuration, constructing pools, and loading the
/// configuration file. Runtime protocol trouble (bad lines, rpc errors,
/// stale work) is logged where it happens and never surfaces here.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Errors related to network connectivity
    #[error("Network connection error: {0}")]
    ConnectionError(String),

    /// Errors in protocol handling or invalid protocol messages
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// TLS setup errors (root store, certificate files, server name)
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// No pool implementation is registered for the requested combination
    #[error("No pool implementation for {0}")]
    UnknownPool(String),
}

/// Converts crossbeam channel send errors for share records into MinerError
///
/// Used when a statistics listener has gone away while a record was being
/// forwarded. Wraps the original error in a `ChannelError` variant.
impl From<crossbeam_channel::SendError<crate::stats::ShareRecord>> for MinerError {
    fn from(e: crossbeam_channel::SendError<crate::stats::ShareRecord>) -> Self {
        MinerError::ChannelError(format!("Share record send failed: {}", e))
    }
}

/// Converts hex decoding errors into MinerError
///
/// Used when invalid hex data is encountered in job notifications.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts rustls errors into MinerError
impl From<tokio_rustls::rustls::Error> for MinerError {
    fn from(e: tokio_rustls::rustls::Error) -> Self {
        MinerError::TlsError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = MinerError::UnknownPool("ethash over carrier-pigeon".into());
        assert_eq!(
            err.to_string(),
            "No pool implementation for ethash over carrier-pigeon",
            "UnknownPool should render its context"
        );

        let err: MinerError = hex::decode("zz").unwrap_err().into();
        assert!(
            matches!(err, MinerError::InputError(_)),
            "hex failures should map to InputError"
        );
    }
}
