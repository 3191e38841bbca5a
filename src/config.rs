//! Credential configuration for the UsernameToken signer.

use crate::error::WsseError;
use crate::xml::{SOAP_11_NS, SOAP_12_NS};
use serde::{Deserialize, Serialize};

/// Credentials and password mode for one UsernameToken signer.
///
/// Immutable once validated; the same configuration may back any number of
/// `sign` calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Username placed in the `Username` element.
    pub username: String,

    /// Password, either sent verbatim (PasswordText) or bound into the
    /// nonce/timestamp digest (PasswordDigest).
    pub password: String,

    /// Use the PasswordDigest encoding instead of plain PasswordText.
    #[serde(default)]
    pub use_digest: bool,
}

impl TokenConfig {
    /// Create a plain-text (PasswordText) configuration.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            use_digest: false,
        }
    }

    /// Switch the configuration to PasswordDigest mode.
    pub fn with_digest(mut self, use_digest: bool) -> Self {
        self.use_digest = use_digest;
        self
    }

    /// Reject empty credentials.
    pub fn validate(&self) -> Result<(), WsseError> {
        if self.username.is_empty() {
            return Err(WsseError::Configuration(
                "username must not be empty".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(WsseError::Configuration(
                "password must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    /// Map an Envelope namespace URI to a SOAP version.
    pub fn from_namespace(uri: &str) -> Option<Self> {
        match uri {
            SOAP_11_NS => Some(Self::Soap11),
            SOAP_12_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    /// The Envelope namespace URI for this version.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }
}
