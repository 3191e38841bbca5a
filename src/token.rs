//! UsernameToken construction and envelope signing.
//!
//! Implements the WS-Security UsernameToken Token Profile 1.0 password
//! encodings. In digest mode the password representation is
//! `base64(SHA1(nonce || created || password))`; the concatenation order
//! is fixed by the profile and interoperability breaks if it changes.

use crate::config::TokenConfig;
use crate::error::WsseError;
use crate::header::{ensure_header, ensure_username_token, TokenTarget};
use crate::xml::{Document, NodeId, PASSWORD_DIGEST_TYPE, PASSWORD_TEXT_TYPE, WSSE_NS, WSU_NS};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tracing::debug;

/// Nonce length drawn per digest-mode token.
const NONCE_LEN: usize = 16;

/// Source of the current UTC instant.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to one instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Source of cryptographically random nonce bytes.
pub trait RandomSource {
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, WsseError>;
}

/// Operating-system entropy via `OsRng`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl RandomSource for OsEntropy {
    fn random_bytes(&self, len: usize) -> Result<Vec<u8>, WsseError> {
        let mut buf = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| WsseError::Entropy(e.to_string()))?;
        Ok(buf)
    }
}

/// A random source returning fixed bytes, for deterministic tests.
#[derive(Debug, Clone)]
pub struct FixedEntropy(pub Vec<u8>);

impl RandomSource for FixedEntropy {
    fn random_bytes(&self, _len: usize) -> Result<Vec<u8>, WsseError> {
        Ok(self.0.clone())
    }
}

/// A pre-send transform applied to an outgoing SOAP message.
///
/// Transforms share one signature so a client can chain them: each
/// receives the envelope tree and the transport-level header map and
/// mutates what it needs.
pub trait MessageTransform {
    fn transform(
        &self,
        envelope: &mut Document,
        headers: &mut HashMap<String, String>,
    ) -> Result<(), WsseError>;
}

/// Signs outgoing envelopes with a WS-Security UsernameToken header.
///
/// Stateless besides its configuration; one instance may sign any number
/// of envelopes. Clock and entropy are injectable so digest-mode output
/// is reproducible under test.
///
/// Signing is not idempotent: a second `sign` call on an envelope whose
/// token was already populated adds a second, independent `Security`
/// block rather than replacing the first.
#[derive(Debug, Clone)]
pub struct UsernameToken<C = SystemClock, R = OsEntropy> {
    config: TokenConfig,
    clock: C,
    entropy: R,
}

impl UsernameToken {
    /// Create a signer with the wall clock and OS entropy.
    pub fn new(config: TokenConfig) -> Result<Self, WsseError> {
        Self::with_sources(config, SystemClock, OsEntropy)
    }
}

impl<C: Clock, R: RandomSource> UsernameToken<C, R> {
    /// Create a signer with explicit clock and random sources.
    pub fn with_sources(config: TokenConfig, clock: C, entropy: R) -> Result<Self, WsseError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            entropy,
        })
    }

    /// Sign one outgoing envelope.
    ///
    /// Locates or creates the `Header`/`Security`/`UsernameToken` chain,
    /// then writes the credential leaves into the token. The transport
    /// header map passes through untouched; it is part of the signature
    /// only so the signer composes with other [`MessageTransform`] steps.
    pub fn sign(
        &self,
        envelope: &mut Document,
        _headers: &mut HashMap<String, String>,
    ) -> Result<(), WsseError> {
        let header = ensure_header(envelope)?;
        let target = ensure_username_token(envelope, header)?;
        debug!(
            username = %self.config.username,
            use_digest = self.config.use_digest,
            prepared = matches!(target, TokenTarget::Prepared(_)),
            "populating UsernameToken"
        );
        self.encode_credentials(envelope, target.node())
    }

    /// Append the credential leaves to the target `UsernameToken`.
    fn encode_credentials(&self, doc: &mut Document, token: NodeId) -> Result<(), WsseError> {
        let username = doc.append_element(token, WSSE_NS, "Username");
        doc.set_text(username, self.config.username.clone());

        if !self.config.use_digest {
            let password = doc.append_element(token, WSSE_NS, "Password");
            doc.set_text(password, self.config.password.clone());
            doc.set_attribute(password, "Type", PASSWORD_TEXT_TYPE);
            return Ok(());
        }

        let nonce = self.entropy.random_bytes(NONCE_LEN)?;
        if nonce.is_empty() {
            return Err(WsseError::Entropy(
                "random source returned zero-length nonce".to_string(),
            ));
        }
        // RFC3339 UTC with explicit +00:00 offset and no fractional seconds.
        let created = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Secs, false);

        let mut hasher = Sha1::new();
        hasher.update(&nonce);
        hasher.update(created.as_bytes());
        hasher.update(self.config.password.as_bytes());
        let digest = STANDARD.encode(hasher.finalize());

        let password = doc.append_element(token, WSSE_NS, "Password");
        doc.set_text(password, digest);
        doc.set_attribute(password, "Type", PASSWORD_DIGEST_TYPE);

        let nonce_node = doc.append_element(token, WSSE_NS, "Nonce");
        doc.set_text(nonce_node, STANDARD.encode(&nonce));

        let created_node = doc.append_element(token, WSU_NS, "Created");
        doc.set_text(created_node, created);
        Ok(())
    }
}

impl<C: Clock, R: RandomSource> MessageTransform for UsernameToken<C, R> {
    fn transform(
        &self,
        envelope: &mut Document,
        headers: &mut HashMap<String, String>,
    ) -> Result<(), WsseError> {
        self.sign(envelope, headers)
    }
}
