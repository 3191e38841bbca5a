//! Error types for the WS-Security signer.

use thiserror::Error;

/// Errors surfaced by token construction and envelope signing.
///
/// All variants are fatal for the current request: configuration and
/// structure errors signal caller bugs that must be fixed before retrying,
/// and entropy failures must never be papered over with a degraded nonce.
#[derive(Error, Debug)]
pub enum WsseError {
    /// Invalid credential configuration (empty username or password).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The envelope tree is malformed: unrecognized namespace, conflicting
    /// Header elements, or a shape the signer cannot splice into.
    #[error("invalid envelope structure: {0}")]
    Structure(String),

    /// The injected random source failed to produce nonce bytes.
    #[error("entropy source failure: {0}")]
    Entropy(String),

    /// XML parsing or serialization error.
    #[error("XML error: {0}")]
    Xml(String),
}

impl From<quick_xml::Error> for WsseError {
    fn from(err: quick_xml::Error) -> Self {
        WsseError::Xml(err.to_string())
    }
}
