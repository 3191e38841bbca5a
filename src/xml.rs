//! Namespace-aware XML element tree for envelope splicing.
//!
//! The signer needs a small set of tree operations the streaming reader
//! cannot provide: qualified element creation, ordered insertion at an
//! explicit index, and ancestor prefix lookup (to avoid redeclaring a
//! namespace a caller already put in scope). Parsing goes through
//! quick-xml, which is safe against XXE by default (doesn't expand
//! entities); DOCTYPE is rejected outright as belt-and-suspenders.

use crate::error::WsseError;
use quick_xml::events::Event;
use quick_xml::Reader;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// WS-Security namespace URIs.
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
/// UsernameToken Profile 1.0 password type URIs.
pub const PASSWORD_TEXT_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";
pub const PASSWORD_DIGEST_TYPE: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";

/// Handle to one element in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct NodeData {
    /// Serialization prefix ("" for unprefixed).
    prefix: String,
    local: String,
    /// Resolved namespace URI, if any.
    ns: Option<String>,
    /// Namespace declarations carried on this element: (prefix, uri),
    /// where an empty prefix is the default `xmlns`.
    decls: Vec<(String, String)>,
    /// Non-namespace attributes as written (raw name, unescaped value).
    attrs: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// An in-memory XML document owned by the caller and mutated by the signer.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Document {
    /// Parse an XML document with full prefix-scope resolution.
    pub fn parse(xml: &str) -> Result<Self, WsseError> {
        check_doctype(xml)?;

        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut doc = Document {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        let mut root: Option<NodeId> = None;
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(ref e) => {
                    let id = doc.open_element(e, stack.last().copied(), &mut root)?;
                    stack.push(id);
                }
                Event::Empty(ref e) => {
                    doc.open_element(e, stack.last().copied(), &mut root)?;
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(ref t) => {
                    let text = t
                        .unescape()
                        .map_err(|err| WsseError::Xml(err.to_string()))?;
                    if let Some(&id) = stack.last() {
                        match doc.nodes[id.0].text {
                            Some(ref mut existing) => existing.push_str(&text),
                            None => doc.nodes[id.0].text = Some(text.into_owned()),
                        }
                    }
                }
                Event::DocType(_) => {
                    return Err(WsseError::Xml(
                        "DOCTYPE declarations are not allowed".to_string(),
                    ));
                }
                Event::Eof => break,
                _ => {}
            }
        }

        doc.root = root.ok_or_else(|| WsseError::Xml("no root element".to_string()))?;
        Ok(doc)
    }

    fn open_element(
        &mut self,
        e: &quick_xml::events::BytesStart<'_>,
        parent: Option<NodeId>,
        root: &mut Option<NodeId>,
    ) -> Result<NodeId, WsseError> {
        let raw = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let (prefix, local) = match raw.split_once(':') {
            Some((p, l)) => (p.to_string(), l.to_string()),
            None => (String::new(), raw),
        };

        let mut decls = Vec::new();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| WsseError::Xml(err.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| WsseError::Xml(err.to_string()))?
                .into_owned();
            if key == "xmlns" {
                decls.push((String::new(), value));
            } else if let Some(p) = key.strip_prefix("xmlns:") {
                decls.push((p.to_string(), value));
            } else {
                attrs.push((key, value));
            }
        }

        if parent.is_none() && root.is_some() {
            return Err(WsseError::Xml("multiple root elements".to_string()));
        }

        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            prefix,
            local,
            ns: None,
            decls,
            attrs,
            text: None,
            children: Vec::new(),
            parent,
        });
        match parent {
            Some(p) => self.nodes[p.0].children.push(id),
            None => *root = Some(id),
        }

        // The element's own declarations participate in its resolution.
        let prefix = self.nodes[id.0].prefix.clone();
        let ns = self.lookup_uri(id, &prefix);
        self.nodes[id.0].ns = ns;
        Ok(id)
    }

    /// Root element of the document.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Local (unprefixed) element name.
    pub fn local_name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].local
    }

    /// Resolved namespace URI of the element, if any.
    pub fn namespace(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].ns.as_deref()
    }

    /// Serialization prefix of the element ("" if unprefixed).
    pub fn prefix(&self, id: NodeId) -> &str {
        &self.nodes[id.0].prefix
    }

    /// Accumulated text content of the element, if any.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.0].text.as_deref()
    }

    /// Replace the element's text content.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.nodes[id.0].text = Some(text.into());
    }

    /// Look up an attribute by its raw name.
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes[id.0]
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute.
    pub fn set_attribute(&mut self, id: NodeId, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        let attrs = &mut self.nodes[id.0].attrs;
        match attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => attrs.push((name, value)),
        }
    }

    /// Element children, in document order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Namespace declarations carried locally on this element.
    pub fn declarations(&self, id: NodeId) -> &[(String, String)] {
        &self.nodes[id.0].decls
    }

    /// First direct child matching (namespace URI, local name).
    pub fn find_child(&self, parent: NodeId, ns: &str, local: &str) -> Option<NodeId> {
        self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|&c| self.local_name(c) == local && self.namespace(c) == Some(ns))
    }

    /// First descendant (depth-first, document order) matching
    /// (namespace URI, local name). Does not consider `from` itself.
    pub fn find_descendant(&self, from: NodeId, ns: &str, local: &str) -> Option<NodeId> {
        let mut pending: Vec<NodeId> = self.nodes[from.0].children.iter().rev().copied().collect();
        while let Some(id) = pending.pop() {
            if self.local_name(id) == local && self.namespace(id) == Some(ns) {
                return Some(id);
            }
            pending.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        None
    }

    /// Resolve a namespace URI to an in-scope prefix, walking from `from`
    /// to the root. Declarations closer to `from` shadow outer ones, so a
    /// prefix rebound in between is never returned.
    pub fn resolve_prefix(&self, from: NodeId, uri: &str) -> Option<String> {
        let mut shadowed: Vec<&str> = Vec::new();
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            for (prefix, bound) in &self.nodes[id.0].decls {
                if shadowed.iter().any(|s| s == prefix) {
                    continue;
                }
                if bound == uri {
                    return Some(prefix.clone());
                }
                shadowed.push(prefix);
            }
            cursor = self.nodes[id.0].parent;
        }
        None
    }

    /// Resolve a prefix to its in-scope namespace URI, starting at `from`.
    fn lookup_uri(&self, from: NodeId, prefix: &str) -> Option<String> {
        let mut cursor = Some(from);
        while let Some(id) = cursor {
            for (p, uri) in &self.nodes[id.0].decls {
                if p == prefix {
                    // xmlns="" undeclares the default namespace.
                    if uri.is_empty() {
                        return None;
                    }
                    return Some(uri.clone());
                }
            }
            cursor = self.nodes[id.0].parent;
        }
        None
    }

    /// Append a namespace-qualified element as the last child of `parent`.
    pub fn append_element(&mut self, parent: NodeId, ns: &str, local: &str) -> NodeId {
        let index = self.nodes[parent.0].children.len();
        self.insert_element(parent, index, ns, local)
    }

    /// Insert a namespace-qualified element at an explicit child index.
    ///
    /// Reuses a prefix the caller already declared at an ancestor scope;
    /// otherwise declares the namespace locally on the new element under a
    /// stable preferred prefix.
    pub fn insert_element(&mut self, parent: NodeId, index: usize, ns: &str, local: &str) -> NodeId {
        let (prefix, decl) = match self.resolve_prefix(parent, ns) {
            Some(prefix) => (prefix, None),
            None => {
                let prefix = self.pick_prefix(parent, ns);
                (prefix.clone(), Some((prefix, ns.to_string())))
            }
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            prefix,
            local: local.to_string(),
            ns: Some(ns.to_string()),
            decls: decl.into_iter().collect(),
            attrs: Vec::new(),
            text: None,
            children: Vec::new(),
            parent: Some(parent),
        });

        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, id);
        id
    }

    /// Choose an unbound prefix for a namespace being declared locally.
    fn pick_prefix(&self, scope: NodeId, ns: &str) -> String {
        let preferred = match ns {
            WSSE_NS => "wsse",
            WSU_NS => "wsu",
            SOAP_11_NS | SOAP_12_NS => "soapenv",
            _ => "ns0",
        };
        if self.lookup_uri(scope, preferred).is_none() {
            return preferred.to_string();
        }
        let mut n = 0;
        loop {
            let candidate = format!("{preferred}{n}");
            if self.lookup_uri(scope, &candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Serialize the document. Text content precedes element children.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_node(self.root, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id.0];
        out.push('<');
        if !node.prefix.is_empty() {
            out.push_str(&node.prefix);
            out.push(':');
        }
        out.push_str(&node.local);
        for (prefix, uri) in &node.decls {
            if prefix.is_empty() {
                out.push_str(&format!(" xmlns=\"{}\"", xml_escape(uri)));
            } else {
                out.push_str(&format!(" xmlns:{}=\"{}\"", prefix, xml_escape(uri)));
            }
        }
        for (name, value) in &node.attrs {
            out.push_str(&format!(" {}=\"{}\"", name, xml_escape(value)));
        }
        if node.text.is_none() && node.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        if let Some(ref text) = node.text {
            out.push_str(&xml_escape(text));
        }
        for &child in &node.children {
            self.write_node(child, out);
        }
        out.push_str("</");
        if !node.prefix.is_empty() {
            out.push_str(&node.prefix);
            out.push(':');
        }
        out.push_str(&node.local);
        out.push('>');
    }
}

/// Reject DOCTYPE/entity declarations before parsing.
fn check_doctype(xml: &str) -> Result<(), WsseError> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") || xml.contains("<!ENTITY") {
        return Err(WsseError::Xml(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }
    Ok(())
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE: &str = r#"<soap-env:Envelope
        xmlns:soap-env="http://schemas.xmlsoap.org/soap/envelope/"
        xmlns:ns0="http://example.com/stockquote.xsd">
      <soap-env:Body>
        <ns0:TradePriceRequest>
          <tickerSymbol>foobar</tickerSymbol>
        </ns0:TradePriceRequest>
      </soap-env:Body>
    </soap-env:Envelope>"#;

    #[test]
    fn test_parse_resolves_namespaces() {
        let doc = Document::parse(ENVELOPE).unwrap();
        let root = doc.root();
        assert_eq!(doc.local_name(root), "Envelope");
        assert_eq!(doc.namespace(root), Some(SOAP_11_NS));

        let body = doc.find_child(root, SOAP_11_NS, "Body").unwrap();
        let request = doc
            .find_child(body, "http://example.com/stockquote.xsd", "TradePriceRequest")
            .unwrap();
        let symbol = doc.children(request)[0];
        assert_eq!(doc.local_name(symbol), "tickerSymbol");
        assert_eq!(doc.namespace(symbol), None, "unprefixed, no default xmlns");
        assert_eq!(doc.text(symbol), Some("foobar"));
    }

    #[test]
    fn test_resolve_prefix_walks_ancestors() {
        let doc = Document::parse(ENVELOPE).unwrap();
        let body = doc.find_child(doc.root(), SOAP_11_NS, "Body").unwrap();
        let request = doc.children(body)[0];
        assert_eq!(
            doc.resolve_prefix(request, SOAP_11_NS),
            Some("soap-env".to_string())
        );
        assert_eq!(doc.resolve_prefix(request, WSSE_NS), None);
    }

    #[test]
    fn test_resolve_prefix_respects_shadowing() {
        // ns0 is rebound on the inner element; the outer binding for
        // the wsse URI must not be returned from inside it.
        let xml = format!(
            r#"<a xmlns:ns0="{WSSE_NS}"><b xmlns:ns0="http://example.com/other"><c/></b></a>"#
        );
        let doc = Document::parse(&xml).unwrap();
        let b = doc.children(doc.root())[0];
        let c = doc.children(b)[0];
        assert_eq!(doc.resolve_prefix(c, WSSE_NS), None);
        assert_eq!(doc.resolve_prefix(doc.root(), WSSE_NS), Some("ns0".to_string()));
    }

    #[test]
    fn test_append_declares_namespace_locally() {
        let mut doc = Document::parse(ENVELOPE).unwrap();
        let root = doc.root();
        let security = doc.append_element(root, WSSE_NS, "Security");
        assert_eq!(doc.prefix(security), "wsse");
        assert_eq!(
            doc.declarations(security),
            &[("wsse".to_string(), WSSE_NS.to_string())]
        );

        // Children of the new element inherit the declared prefix.
        let token = doc.append_element(security, WSSE_NS, "UsernameToken");
        assert_eq!(doc.prefix(token), "wsse");
        assert!(doc.declarations(token).is_empty());
    }

    #[test]
    fn test_append_reuses_inherited_prefix() {
        let xml = format!(r#"<root xmlns:sec="{WSSE_NS}"><child/></root>"#);
        let mut doc = Document::parse(&xml).unwrap();
        let child = doc.children(doc.root())[0];
        let token = doc.append_element(child, WSSE_NS, "UsernameToken");
        assert_eq!(doc.prefix(token), "sec");
        assert!(doc.declarations(token).is_empty());
    }

    #[test]
    fn test_insert_at_index_zero() {
        let mut doc = Document::parse(ENVELOPE).unwrap();
        let root = doc.root();
        let header = doc.insert_element(root, 0, SOAP_11_NS, "Header");
        assert_eq!(doc.children(root)[0], header);
        assert_eq!(doc.local_name(doc.children(root)[1]), "Body");
    }

    #[test]
    fn test_serialize() {
        let xml = r#"<a xmlns:x="urn:x"><x:b attr="v&quot;1">text</x:b><c/></a>"#;
        let doc = Document::parse(xml).unwrap();
        assert_eq!(doc.to_xml(), xml);
    }

    #[test]
    fn test_doctype_rejected() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<a>&xxe;</a>"#;
        let err = Document::parse(xml).unwrap_err();
        assert!(matches!(err, WsseError::Xml(_)));
    }

    #[test]
    fn test_no_root_rejected() {
        let err = Document::parse("   ").unwrap_err();
        assert!(matches!(err, WsseError::Xml(_)));
    }
}
