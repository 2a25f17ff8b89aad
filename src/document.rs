//! Working-document model for inbound messages.
//!
//! Uses quick-xml which is safe against XXE by default (doesn't expand
//! entities); a pre-scan rejects DOCTYPE/ENTITY constructs outright.
//!
//! The parsed tree is the *working copy* for one processing pass: decryption
//! replaces ciphertext elements in place, and signature references are
//! resolved against the current state of the tree. Nothing here is shared
//! across messages.

use crate::error::{xml_escape, ProcessingError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
/// WS-Security extension and utility namespaces.
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSSE11_NS: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-wssecurity-secext-1.1.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
/// XML Digital Signature and XML Encryption namespaces.
pub const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";
/// WS-SecureConversation (derived key tokens).
pub const WSC_NS: &str = "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512";
pub const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// Default nesting depth cap for untrusted documents.
pub const DEFAULT_MAX_DEPTH: u32 = 64;

/// Detected SOAP envelope version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

/// An attribute as written in the source, name including any prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlAttribute {
    pub name: String,
    pub value: String,
}

/// A node in the working tree. Whitespace-only text is trimmed at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An element with its resolved namespace and owned children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// Prefix as written (`wsse` in `wsse:Security`), if any
    pub prefix: Option<String>,
    /// Local name
    pub local_name: String,
    /// Resolved namespace URI, if the prefix/default was in scope
    pub namespace: Option<String>,
    /// Attributes in source order, namespace declarations included
    pub attributes: Vec<XmlAttribute>,
    /// Child nodes in document order
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Create an element with no attributes or children.
    pub fn new(
        prefix: Option<&str>,
        local_name: &str,
        namespace: Option<&str>,
    ) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            local_name: local_name.to_string(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Qualified name as written in the source.
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local_name),
            None => self.local_name.clone(),
        }
    }

    /// True when this element has the given namespace URI and local name.
    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace.as_deref() == Some(namespace)
    }

    /// Value of the attribute with the given local name, ignoring prefixes
    /// and skipping namespace declarations.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes.iter().find_map(|a| {
            if a.name == "xmlns" || a.name.starts_with("xmlns:") {
                return None;
            }
            let local = a.name.rsplit(':').next().unwrap_or(&a.name);
            (local == local_name).then_some(a.value.as_str())
        })
    }

    /// Identifier of this element: `wsu:Id` or plain `Id`.
    pub fn id(&self) -> Option<&str> {
        self.attribute("Id")
    }

    /// Direct child elements, in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// First direct child with the given namespace and local name.
    pub fn find_child(&self, namespace: &str, local_name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.is(namespace, local_name))
    }

    /// First direct child with the given local name, any namespace.
    pub fn find_child_by_local(&self, local_name: &str) -> Option<&XmlElement> {
        self.child_elements().find(|e| e.local_name == local_name)
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let XmlNode::Text(t) = node {
                out.push_str(t);
            }
        }
        out
    }

    /// Text content of the first matching child, if present.
    pub fn child_text(&self, namespace: &str, local_name: &str) -> Option<String> {
        self.find_child(namespace, local_name).map(|e| e.text())
    }

    /// Depth-first search for a descendant (or self) with the given id.
    pub fn find_by_id(&self, id: &str) -> Option<&XmlElement> {
        if self.id() == Some(id) {
            return Some(self);
        }
        self.child_elements().find_map(|e| e.find_by_id(id))
    }

    /// Replace the descendant carrying `id` with `replacement`, in place.
    ///
    /// Returns true when a replacement happened. This is the single mutation
    /// point used by decryption; the security header itself is never
    /// rewritten.
    pub fn replace_by_id(&mut self, id: &str, replacement: XmlElement) -> bool {
        for node in &mut self.children {
            if let XmlNode::Element(e) = node {
                if e.id() == Some(id) {
                    *node = XmlNode::Element(replacement);
                    return true;
                }
                if e.replace_by_id(id, replacement.clone()) {
                    return true;
                }
            }
        }
        false
    }

    /// Stable canonical serialization of this element.
    ///
    /// Not interop-grade XML c14n: attributes are sorted by name, text is
    /// trimmed at parse time, and empty elements are expanded. Digests and
    /// signature values in this crate are computed over exactly these bytes,
    /// which is deterministic across parse/serialize round trips of the same
    /// fragment.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out.into_bytes()
    }

    fn write_canonical(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.qualified_name());
        let mut attrs: Vec<&XmlAttribute> = self.attributes.iter().collect();
        attrs.sort_by(|a, b| a.name.cmp(&b.name));
        for attr in attrs {
            out.push(' ');
            out.push_str(&attr.name);
            out.push_str("=\"");
            out.push_str(&xml_escape(&attr.value));
            out.push('"');
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write_canonical(out),
                XmlNode::Text(t) => out.push_str(&xml_escape(t)),
            }
        }
        out.push_str("</");
        out.push_str(&self.qualified_name());
        out.push('>');
    }
}

/// The mutable working document for one processing pass.
#[derive(Debug, Clone)]
pub struct WorkingDocument {
    pub root: XmlElement,
}

impl WorkingDocument {
    /// Parse raw bytes with the default depth cap.
    pub fn parse(data: &[u8]) -> Result<Self, ProcessingError> {
        Self::parse_with_depth_limit(data, DEFAULT_MAX_DEPTH)
    }

    /// Parse raw bytes, rejecting documents nested deeper than `max_depth`.
    pub fn parse_with_depth_limit(data: &[u8], max_depth: u32) -> Result<Self, ProcessingError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ProcessingError::MalformedDocument(format!("invalid UTF-8: {e}")))?;

        check_xxe_patterns(text)?;

        let mut reader = Reader::from_reader(data);
        reader.config_mut().trim_text(true);

        // Stack of elements under construction, parallel to a stack of
        // namespace scopes (prefix -> URI) introduced by each open element.
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut scopes: Vec<Vec<(Option<String>, String)>> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    if stack.len() as u32 >= max_depth {
                        return Err(ProcessingError::MalformedDocument(format!(
                            "nesting depth exceeds maximum {max_depth}"
                        )));
                    }
                    let (element, scope) = start_element(e, &scopes)?;
                    stack.push(element);
                    scopes.push(scope);
                }
                Ok(Event::Empty(ref e)) => {
                    let (element, _scope) = start_element(e, &scopes)?;
                    attach(&mut stack, &mut root, XmlNode::Element(element))?;
                }
                Ok(Event::End(_)) => {
                    let finished = stack.pop().ok_or_else(|| {
                        ProcessingError::MalformedDocument("unbalanced end tag".to_string())
                    })?;
                    scopes.pop();
                    attach(&mut stack, &mut root, XmlNode::Element(finished))?;
                }
                Ok(Event::Text(ref t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| {
                            ProcessingError::MalformedDocument(format!("bad text content: {e}"))
                        })?
                        .into_owned();
                    if let Some(top) = stack.last_mut() {
                        top.children.push(XmlNode::Text(text));
                    }
                }
                Ok(Event::CData(ref t)) => {
                    let text = String::from_utf8_lossy(t.as_ref()).into_owned();
                    if let Some(top) = stack.last_mut() {
                        top.children.push(XmlNode::Text(text));
                    }
                }
                Ok(Event::DocType(_)) => {
                    return Err(ProcessingError::MalformedDocument(
                        "DOCTYPE declarations are not allowed".to_string(),
                    ));
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(ProcessingError::MalformedDocument(format!(
                        "XML parse error: {e}"
                    )));
                }
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(ProcessingError::MalformedDocument(
                "unexpected end of document".to_string(),
            ));
        }

        let root = root.ok_or_else(|| {
            ProcessingError::MalformedDocument("no root element found".to_string())
        })?;

        Ok(Self { root })
    }

    /// Detected SOAP version, when the root is a recognized Envelope.
    pub fn soap_version(&self) -> Option<SoapVersion> {
        if self.root.local_name != "Envelope" {
            return None;
        }
        match self.root.namespace.as_deref() {
            Some(SOAP_11_NS) => Some(SoapVersion::Soap11),
            Some(SOAP_12_NS) => Some(SoapVersion::Soap12),
            _ => None,
        }
    }

    /// The SOAP Header element, if present.
    pub fn header(&self) -> Option<&XmlElement> {
        self.root.find_child_by_local("Header")
    }

    /// The SOAP Body element, if present.
    pub fn body(&self) -> Option<&XmlElement> {
        self.root.find_child_by_local("Body")
    }

    /// The `wsse:Security` header element, if present.
    pub fn security_header(&self) -> Option<&XmlElement> {
        self.header()?.find_child(WSSE_NS, "Security")
    }

    /// Depth-first lookup by `wsu:Id`/`Id`.
    pub fn find_by_id(&self, id: &str) -> Option<&XmlElement> {
        self.root.find_by_id(id)
    }

    /// Replace the element carrying `id`; see [`XmlElement::replace_by_id`].
    pub fn replace_by_id(&mut self, id: &str, replacement: XmlElement) -> bool {
        self.root.replace_by_id(id, replacement)
    }
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    node: XmlNode,
) -> Result<(), ProcessingError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    match node {
        XmlNode::Element(e) => {
            if root.is_some() {
                return Err(ProcessingError::MalformedDocument(
                    "multiple root elements".to_string(),
                ));
            }
            *root = Some(e);
            Ok(())
        }
        XmlNode::Text(_) => Ok(()),
    }
}

type NamespaceScope = Vec<(Option<String>, String)>;

fn start_element(
    e: &BytesStart<'_>,
    scopes: &[NamespaceScope],
) -> Result<(XmlElement, NamespaceScope), ProcessingError> {
    let mut attributes = Vec::new();
    let mut scope: NamespaceScope = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|e| {
            ProcessingError::MalformedDocument(format!("bad attribute: {e}"))
        })?;
        let name = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| ProcessingError::MalformedDocument(format!("bad attribute name: {e}")))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| ProcessingError::MalformedDocument(format!("bad attribute value: {e}")))?
            .into_owned();

        if name == "xmlns" {
            scope.push((None, value.clone()));
        } else if let Some(prefix) = name.strip_prefix("xmlns:") {
            scope.push((Some(prefix.to_string()), value.clone()));
        }
        attributes.push(XmlAttribute { name, value });
    }

    let raw_name = std::str::from_utf8(e.name().as_ref())
        .map_err(|e| ProcessingError::MalformedDocument(format!("bad element name: {e}")))?
        .to_string();
    let (prefix, local_name) = match raw_name.split_once(':') {
        Some((p, l)) => (Some(p.to_string()), l.to_string()),
        None => (None, raw_name),
    };

    let namespace = resolve_namespace(prefix.as_deref(), &scope, scopes);

    Ok((
        XmlElement {
            prefix,
            local_name,
            namespace,
            attributes,
            children: Vec::new(),
        },
        scope,
    ))
}

fn resolve_namespace(
    prefix: Option<&str>,
    own_scope: &NamespaceScope,
    scopes: &[NamespaceScope],
) -> Option<String> {
    let wanted = prefix.map(str::to_string);
    for (p, uri) in own_scope.iter().rev() {
        if *p == wanted {
            return Some(uri.clone());
        }
    }
    for scope in scopes.iter().rev() {
        for (p, uri) in scope.iter().rev() {
            if *p == wanted {
                return Some(uri.clone());
            }
        }
    }
    None
}

/// Check for XXE attack patterns before handing bytes to the event reader.
fn check_xxe_patterns(xml: &str) -> Result<(), ProcessingError> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(ProcessingError::MalformedDocument(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }
    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(ProcessingError::MalformedDocument(
            "entity declarations are not allowed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENVELOPE: &str = r#"<?xml version="1.0"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
      <wsu:Timestamp xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd" wsu:Id="ts-1">
        <wsu:Created>2025-01-01T00:00:00Z</wsu:Created>
      </wsu:Timestamp>
    </wsse:Security>
  </soap:Header>
  <soap:Body>
    <m:GetUser xmlns:m="http://example.org/users" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd" wsu:Id="body-1">
      <m:UserId>42</m:UserId>
    </m:GetUser>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_parse_envelope_structure() {
        let doc = WorkingDocument::parse(ENVELOPE.as_bytes()).unwrap();
        assert_eq!(doc.soap_version(), Some(SoapVersion::Soap11));
        assert!(doc.header().is_some());
        assert!(doc.body().is_some());

        let security = doc.security_header().unwrap();
        assert!(security.is(WSSE_NS, "Security"));
        let ts = security.find_child(WSU_NS, "Timestamp").unwrap();
        assert_eq!(ts.id(), Some("ts-1"));
        assert_eq!(
            ts.child_text(WSU_NS, "Created").as_deref(),
            Some("2025-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_namespace_resolution_is_scoped() {
        let xml = r#"<a xmlns="urn:outer"><b xmlns="urn:inner"><c/></b><d/></a>"#;
        let doc = WorkingDocument::parse(xml.as_bytes()).unwrap();
        let b = doc.root.find_child_by_local("b").unwrap();
        assert_eq!(b.namespace.as_deref(), Some("urn:inner"));
        let c = b.find_child_by_local("c").unwrap();
        assert_eq!(c.namespace.as_deref(), Some("urn:inner"));
        let d = doc.root.find_child_by_local("d").unwrap();
        assert_eq!(d.namespace.as_deref(), Some("urn:outer"));
    }

    #[test]
    fn test_find_by_id_matches_wsu_id_and_plain_id() {
        let doc = WorkingDocument::parse(ENVELOPE.as_bytes()).unwrap();
        assert!(doc.find_by_id("body-1").is_some());
        assert!(doc.find_by_id("ts-1").is_some());
        assert!(doc.find_by_id("nope").is_none());

        let xml = r#"<x><y Id="plain"/></x>"#;
        let doc = WorkingDocument::parse(xml.as_bytes()).unwrap();
        assert!(doc.find_by_id("plain").is_some());
    }

    #[test]
    fn test_replace_by_id_swaps_element_in_place() {
        let mut doc = WorkingDocument::parse(ENVELOPE.as_bytes()).unwrap();
        let replacement = XmlElement::new(None, "Replaced", Some("urn:r"));
        assert!(doc.replace_by_id("body-1", replacement));
        assert!(doc.find_by_id("body-1").is_none());
        let body = doc.body().unwrap();
        assert_eq!(body.child_elements().next().unwrap().local_name, "Replaced");
    }

    #[test]
    fn test_canonical_bytes_are_stable_across_reparse() {
        let fragment = r#"<m:Order xmlns:m="urn:shop" b="2" a="1">
  <m:Item>widget</m:Item>
</m:Order>"#;
        let first = WorkingDocument::parse(fragment.as_bytes()).unwrap();
        let canon = first.root.canonical_bytes();
        // Re-parse the canonical form; it must canonicalize identically.
        let second = WorkingDocument::parse(&canon).unwrap();
        assert_eq!(canon, second.root.canonical_bytes());
        // Attributes come out sorted regardless of source order.
        let text = String::from_utf8(canon).unwrap();
        assert!(text.starts_with(r#"<m:Order a="1" b="2" xmlns:m="urn:shop">"#));
    }

    #[test]
    fn test_canonical_bytes_escape_text() {
        let xml = r#"<v>a &lt; b &amp; c</v>"#;
        let doc = WorkingDocument::parse(xml.as_bytes()).unwrap();
        let canon = String::from_utf8(doc.root.canonical_bytes()).unwrap();
        assert_eq!(canon, "<v>a &lt; b &amp; c</v>");
    }

    #[test]
    fn test_doctype_rejected() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<a>&xxe;</a>"#;
        let err = WorkingDocument::parse(xml.as_bytes()).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_DOCUMENT");
    }

    #[test]
    fn test_depth_limit_enforced() {
        let xml = "<a><b><c><d><e>x</e></d></c></b></a>";
        assert!(WorkingDocument::parse_with_depth_limit(xml.as_bytes(), 3).is_err());
        assert!(WorkingDocument::parse_with_depth_limit(xml.as_bytes(), 10).is_ok());
    }

    #[test]
    fn test_unbalanced_document_rejected() {
        let err = WorkingDocument::parse(b"<a><b></a>").unwrap_err();
        assert_eq!(err.code(), "MALFORMED_DOCUMENT");
    }

    #[test]
    fn test_no_security_header_is_none() {
        let xml = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body><Op xmlns="urn:x"/></soap:Body>
</soap:Envelope>"#;
        let doc = WorkingDocument::parse(xml.as_bytes()).unwrap();
        assert!(doc.security_header().is_none());
    }
}
