//! Envelope/Header location and Security block construction.
//!
//! Finds or creates the `Header` / `Security` / `UsernameToken` chain the
//! encoder populates. Callers may pre-declare part of that structure (a
//! "prepared header"): an empty `UsernameToken` under a `Security` element
//! whose namespace prefix was declared at an ancestor scope. The builder
//! populates such placeholders in place instead of duplicating them.

use crate::config::SoapVersion;
use crate::error::WsseError;
use crate::xml::{Document, NodeId, WSSE_NS};
use tracing::debug;

/// Where the encoder will write the credential leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTarget {
    /// A fresh `UsernameToken` created by this call.
    Created(NodeId),
    /// A caller-supplied placeholder, reused in place.
    Prepared(NodeId),
}

impl TokenTarget {
    /// The `UsernameToken` node to populate.
    pub fn node(&self) -> NodeId {
        match *self {
            Self::Created(id) | Self::Prepared(id) => id,
        }
    }
}

/// Detect the envelope's SOAP version from its own namespace.
pub fn soap_version(doc: &Document) -> Result<SoapVersion, WsseError> {
    let root = doc.root();
    let ns = doc.namespace(root).ok_or_else(|| {
        WsseError::Structure("Envelope has no namespace".to_string())
    })?;
    SoapVersion::from_namespace(ns).ok_or_else(|| {
        WsseError::Structure(format!("unrecognized Envelope namespace: {ns}"))
    })
}

/// Find the SOAP Header, creating it as the Envelope's first child when
/// absent. Header must never follow Body.
pub fn ensure_header(doc: &mut Document) -> Result<NodeId, WsseError> {
    let version = soap_version(doc)?;
    let ns = version.namespace();
    let root = doc.root();

    let headers: Vec<NodeId> = doc
        .children(root)
        .iter()
        .copied()
        .filter(|&c| doc.local_name(c) == "Header" && doc.namespace(c) == Some(ns))
        .collect();

    match headers.as_slice() {
        [] => {
            debug!(soap_version = ?version, "creating Header at Envelope index 0");
            Ok(doc.insert_element(root, 0, ns, "Header"))
        }
        [header] => Ok(*header),
        _ => Err(WsseError::Structure(format!(
            "Envelope contains {} conflicting Header elements",
            headers.len()
        ))),
    }
}

/// Find or create the `Security`/`UsernameToken` pair under Header.
///
/// Three input shapes are distinguished:
/// - no `Security` element: a new one is created directly under Header
///   (wsse namespace declared locally unless already in scope) with a new
///   `UsernameToken` child;
/// - a `Security` with an empty `UsernameToken`: the placeholder is reused;
/// - a `Security` whose `UsernameToken` was populated by a prior call: a
///   second, independent `Security` block is created. Re-signing is
///   documented as non-idempotent.
pub fn ensure_username_token(
    doc: &mut Document,
    header: NodeId,
) -> Result<TokenTarget, WsseError> {
    if let Some(security) = doc.find_descendant(header, WSSE_NS, "Security") {
        match doc.find_child(security, WSSE_NS, "UsernameToken") {
            Some(token) if doc.children(token).is_empty() => {
                debug!("reusing prepared UsernameToken placeholder");
                return Ok(TokenTarget::Prepared(token));
            }
            Some(_) => {
                debug!("existing UsernameToken already populated, creating new Security block");
            }
            None => {
                debug!("reusing Security element without UsernameToken");
                let token = doc.append_element(security, WSSE_NS, "UsernameToken");
                return Ok(TokenTarget::Created(token));
            }
        }
    }

    let security = doc.append_element(header, WSSE_NS, "Security");
    let token = doc.append_element(security, WSSE_NS, "UsernameToken");
    Ok(TokenTarget::Created(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{SOAP_11_NS, SOAP_12_NS};

    const NO_HEADER: &str = r#"<soap-env:Envelope
        xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/">
      <soap-env:Body><op/></soap-env:Body>
    </soap-env:Envelope>"#;

    #[test]
    fn test_header_created_before_body() {
        let mut doc = Document::parse(NO_HEADER).unwrap();
        let header = ensure_header(&mut doc).unwrap();
        let root = doc.root();
        assert_eq!(doc.children(root)[0], header);
        assert_eq!(doc.local_name(header), "Header");
        assert_eq!(doc.namespace(header), Some(SOAP_11_NS));
        assert_eq!(doc.local_name(doc.children(root)[1]), "Body");
    }

    #[test]
    fn test_existing_header_reused() {
        let xml = r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
          <s:Header><meta/></s:Header>
          <s:Body/>
        </s:Envelope>"#;
        let mut doc = Document::parse(xml).unwrap();
        let header = ensure_header(&mut doc).unwrap();
        assert_eq!(doc.namespace(header), Some(SOAP_12_NS));
        assert_eq!(doc.children(doc.root()).len(), 2);
        // The pre-existing child survives.
        assert_eq!(doc.local_name(doc.children(header)[0]), "meta");
    }

    #[test]
    fn test_unrecognized_namespace_rejected() {
        let xml = r#"<e:Envelope xmlns:e="http://example.com/not-soap"><e:Body/></e:Envelope>"#;
        let mut doc = Document::parse(xml).unwrap();
        let err = ensure_header(&mut doc).unwrap_err();
        assert!(matches!(err, WsseError::Structure(_)));
    }

    #[test]
    fn test_missing_namespace_rejected() {
        let mut doc = Document::parse("<Envelope><Body/></Envelope>").unwrap();
        let err = ensure_header(&mut doc).unwrap_err();
        assert!(matches!(err, WsseError::Structure(_)));
    }

    #[test]
    fn test_conflicting_headers_rejected() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
          <s:Header/><s:Header/><s:Body/>
        </s:Envelope>"#;
        let mut doc = Document::parse(xml).unwrap();
        let err = ensure_header(&mut doc).unwrap_err();
        assert!(matches!(err, WsseError::Structure(_)));
    }

    #[test]
    fn test_security_block_created() {
        let mut doc = Document::parse(NO_HEADER).unwrap();
        let header = ensure_header(&mut doc).unwrap();
        let target = ensure_username_token(&mut doc, header).unwrap();
        assert!(matches!(target, TokenTarget::Created(_)));

        let security = doc.find_child(header, WSSE_NS, "Security").unwrap();
        assert_eq!(doc.children(security), &[target.node()]);
        // wsse was not in scope, so it is declared on the Security element.
        assert_eq!(
            doc.declarations(security),
            &[("wsse".to_string(), WSSE_NS.to_string())]
        );
        assert!(doc.declarations(target.node()).is_empty());
    }

    #[test]
    fn test_prepared_placeholder_reused() {
        let xml = format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
          <s:Header xmlns:sec="{WSSE_NS}">
            <sec:Security><sec:UsernameToken/></sec:Security>
          </s:Header>
          <s:Body/>
        </s:Envelope>"#
        );
        let mut doc = Document::parse(&xml).unwrap();
        let header = ensure_header(&mut doc).unwrap();
        let target = ensure_username_token(&mut doc, header).unwrap();
        assert!(matches!(target, TokenTarget::Prepared(_)));

        let security = doc.find_child(header, WSSE_NS, "Security").unwrap();
        assert_eq!(doc.children(security).len(), 1, "no duplicate UsernameToken");
        assert!(doc.declarations(target.node()).is_empty());
    }

    #[test]
    fn test_populated_token_triggers_new_security_block() {
        let xml = format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
          <s:Header xmlns:sec="{WSSE_NS}">
            <sec:Security>
              <sec:UsernameToken><sec:Username>old</sec:Username></sec:UsernameToken>
            </sec:Security>
          </s:Header>
          <s:Body/>
        </s:Envelope>"#
        );
        let mut doc = Document::parse(&xml).unwrap();
        let header = ensure_header(&mut doc).unwrap();
        let target = ensure_username_token(&mut doc, header).unwrap();
        assert!(matches!(target, TokenTarget::Created(_)));

        let security_blocks: Vec<_> = doc
            .children(header)
            .iter()
            .copied()
            .filter(|&c| doc.local_name(c) == "Security" && doc.namespace(c) == Some(WSSE_NS))
            .collect();
        assert_eq!(security_blocks.len(), 2);
    }

    #[test]
    fn test_security_without_token_gets_one_appended() {
        let xml = format!(
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
          <s:Header><sec:Security xmlns:sec="{WSSE_NS}"/></s:Header>
          <s:Body/>
        </s:Envelope>"#
        );
        let mut doc = Document::parse(&xml).unwrap();
        let header = ensure_header(&mut doc).unwrap();
        let target = ensure_username_token(&mut doc, header).unwrap();

        let security = doc.find_child(header, WSSE_NS, "Security").unwrap();
        assert_eq!(doc.children(security), &[target.node()]);
        assert_eq!(doc.local_name(target.node()), "UsernameToken");
    }
}
