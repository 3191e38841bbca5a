//! WS-Security UsernameToken signing for outgoing SOAP envelopes.
//!
//! Implements the UsernameToken Token Profile 1.0: given a built SOAP
//! envelope and a set of credentials, the signer locates or creates the
//! `Header`/`Security`/`UsernameToken` structure and writes the password
//! representation into it.
//!
//! # Features
//!
//! - PasswordText and PasswordDigest encodings
//! - SOAP 1.1 and 1.2 envelopes
//! - Header created as the Envelope's first child when absent
//! - Caller-prepared `Security`/`UsernameToken` placeholders populated in
//!   place, without redeclaring namespaces already in scope
//! - Injectable clock and entropy for reproducible digest output
//!
//! # Example
//!
//! ```ignore
//! use soap_wsse::{Document, TokenConfig, UsernameToken};
//! use std::collections::HashMap;
//!
//! let signer = UsernameToken::new(TokenConfig::new("michael", "geheim"))?;
//! let mut envelope = Document::parse(&request_xml)?;
//! let mut headers = HashMap::new();
//! signer.sign(&mut envelope, &mut headers)?;
//! transport.send(envelope.to_xml(), headers);
//! ```

pub mod config;
pub mod error;
pub mod header;
pub mod token;
pub mod xml;

pub use config::{SoapVersion, TokenConfig};
pub use error::WsseError;
pub use header::TokenTarget;
pub use token::{
    Clock, FixedClock, FixedEntropy, MessageTransform, OsEntropy, RandomSource, SystemClock,
    UsernameToken,
};
pub use xml::{Document, NodeId};
