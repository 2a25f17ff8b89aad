//! Typed model of the `wsse:Security` header contents.
//!
//! [`classify_security_header`] walks the header's children strictly in
//! document order and turns each into a typed element, rejecting
//! structurally broken tokens early with `MalformedToken`. The processor
//! applies the cryptographic work; this module only reads structure.

use crate::document::{XmlElement, DS_NS, SAML_NS, WSC_NS, WSSE11_NS, WSSE_NS, WSU_NS, XENC_NS};
use crate::error::ProcessingError;

/// Declared password type of a UsernameToken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordType {
    /// Digested password (SHA-1 over nonce, created and password)
    Digest,
    /// Plain text password
    Text,
}

/// Reference to key material from KeyInfo / SecurityTokenReference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReference {
    /// `<wsse:Reference URI="#id"/>`: points at an in-message element or a
    /// registered token id
    Reference { uri: String },
    /// `<wsse:KeyIdentifier>value</wsse:KeyIdentifier>`: names an external
    /// token id or keystore alias
    KeyIdentifier { value: String },
    /// No key information present
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampToken {
    pub id: Option<String>,
    pub created: String,
    pub expires: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsernameTokenElement {
    pub id: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub password_type: PasswordType,
    /// Base64 nonce, when present
    pub nonce: Option<String>,
    pub created: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReference {
    /// Referenced element id (leading `#` stripped)
    pub uri: String,
    pub digest_method: String,
    /// Base64 digest value
    pub digest_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureElement {
    pub id: Option<String>,
    pub c14n_method: String,
    pub signature_method: String,
    pub references: Vec<SignatureReference>,
    /// Base64 signature value
    pub signature_value: String,
    pub key_info: KeyReference,
    /// Canonical bytes of the SignedInfo element, captured before any
    /// document mutation (the header itself is never rewritten)
    pub signed_info_canonical: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedKeyElement {
    pub id: Option<String>,
    /// Key-wrap algorithm URI
    pub algorithm: String,
    pub key_info: KeyReference,
    /// Base64 wrapped key
    pub cipher_value: String,
    /// Ids of EncryptedData elements this key decrypts
    pub data_references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeyTokenElement {
    pub id: Option<String>,
    pub algorithm: String,
    pub base: KeyReference,
    pub label: Option<String>,
    /// Base64 nonce
    pub nonce: Option<String>,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryTokenElement {
    pub id: Option<String>,
    pub value_type: Option<String>,
    /// Base64 token data (typically a DER certificate)
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureConfirmationElement {
    pub id: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlAssertionElement {
    pub assertion_id: Option<String>,
}

/// One classified child of the security header, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityHeaderChild {
    Timestamp(TimestampToken),
    UsernameToken(UsernameTokenElement),
    Signature(SignatureElement),
    EncryptedKey(EncryptedKeyElement),
    /// Standalone `xenc:ReferenceList` of EncryptedData ids
    ReferenceList(Vec<String>),
    DerivedKeyToken(DerivedKeyTokenElement),
    BinarySecurityToken(BinaryTokenElement),
    SignatureConfirmation(SignatureConfirmationElement),
    SamlAssertion(SamlAssertionElement),
    Unknown { name: String },
}

/// Classify the children of a `wsse:Security` element, preserving document
/// order. Unknown children are reported as [`SecurityHeaderChild::Unknown`];
/// whether that is fatal is the processor's (configurable) decision.
pub fn classify_security_header(
    security: &XmlElement,
) -> Result<Vec<SecurityHeaderChild>, ProcessingError> {
    let mut children = Vec::new();
    for element in security.child_elements() {
        children.push(classify_child(element)?);
    }
    Ok(children)
}

fn classify_child(element: &XmlElement) -> Result<SecurityHeaderChild, ProcessingError> {
    let ns = element.namespace.as_deref();
    let child = match (ns, element.local_name.as_str()) {
        (Some(WSU_NS), "Timestamp") => SecurityHeaderChild::Timestamp(parse_timestamp(element)?),
        (Some(WSSE_NS), "UsernameToken") => {
            SecurityHeaderChild::UsernameToken(parse_username_token(element)?)
        }
        (Some(DS_NS), "Signature") => SecurityHeaderChild::Signature(parse_signature(element)?),
        (Some(XENC_NS), "EncryptedKey") => {
            SecurityHeaderChild::EncryptedKey(parse_encrypted_key(element)?)
        }
        (Some(XENC_NS), "ReferenceList") => {
            SecurityHeaderChild::ReferenceList(parse_reference_list(element))
        }
        (Some(WSC_NS), "DerivedKeyToken") => {
            SecurityHeaderChild::DerivedKeyToken(parse_derived_key_token(element)?)
        }
        (Some(WSSE_NS), "BinarySecurityToken") => {
            SecurityHeaderChild::BinarySecurityToken(BinaryTokenElement {
                id: element.id().map(str::to_string),
                value_type: element.attribute("ValueType").map(str::to_string),
                data: element.text().trim().to_string(),
            })
        }
        (Some(WSSE11_NS), "SignatureConfirmation") | (Some(WSSE_NS), "SignatureConfirmation") => {
            SecurityHeaderChild::SignatureConfirmation(SignatureConfirmationElement {
                id: element.id().map(str::to_string),
                value: element.attribute("Value").map(str::to_string),
            })
        }
        (Some(SAML_NS), "Assertion") => {
            SecurityHeaderChild::SamlAssertion(SamlAssertionElement {
                assertion_id: element
                    .attribute("ID")
                    .or_else(|| element.attribute("AssertionID"))
                    .map(str::to_string),
            })
        }
        _ => SecurityHeaderChild::Unknown {
            name: element.qualified_name(),
        },
    };
    Ok(child)
}

fn element_label(element: &XmlElement) -> String {
    element
        .id()
        .map(str::to_string)
        .unwrap_or_else(|| element.qualified_name())
}

fn malformed(element: &XmlElement, detail: impl Into<String>) -> ProcessingError {
    ProcessingError::MalformedToken {
        element: element_label(element),
        detail: detail.into(),
    }
}

fn parse_timestamp(element: &XmlElement) -> Result<TimestampToken, ProcessingError> {
    let created = element
        .child_text(WSU_NS, "Created")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(element, "Timestamp without Created"))?;
    let expires = element.child_text(WSU_NS, "Expires").filter(|s| !s.is_empty());
    Ok(TimestampToken {
        id: element.id().map(str::to_string),
        created,
        expires,
    })
}

fn parse_username_token(element: &XmlElement) -> Result<UsernameTokenElement, ProcessingError> {
    let username = element
        .child_text(WSSE_NS, "Username")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(element, "UsernameToken without Username"))?;

    let password_element = element.find_child(WSSE_NS, "Password");
    let password = password_element.map(|p| p.text());
    let password_type = match password_element.and_then(|p| p.attribute("Type")) {
        Some(t) if t.contains("PasswordDigest") => PasswordType::Digest,
        _ => PasswordType::Text,
    };

    Ok(UsernameTokenElement {
        id: element.id().map(str::to_string),
        username,
        password,
        password_type,
        nonce: element.child_text(WSSE_NS, "Nonce").filter(|s| !s.is_empty()),
        created: element.child_text(WSU_NS, "Created").filter(|s| !s.is_empty()),
    })
}

pub(crate) fn parse_key_reference(container: &XmlElement) -> KeyReference {
    let str_element = container
        .find_child(WSSE_NS, "SecurityTokenReference")
        .unwrap_or(container);

    if let Some(reference) = str_element.find_child(WSSE_NS, "Reference") {
        if let Some(uri) = reference.attribute("URI") {
            return KeyReference::Reference {
                uri: uri.trim_start_matches('#').to_string(),
            };
        }
    }
    if let Some(key_id) = str_element.find_child(WSSE_NS, "KeyIdentifier") {
        let value = key_id.text().trim().to_string();
        if !value.is_empty() {
            return KeyReference::KeyIdentifier { value };
        }
    }
    KeyReference::None
}

fn parse_signature(element: &XmlElement) -> Result<SignatureElement, ProcessingError> {
    let signed_info = element
        .find_child(DS_NS, "SignedInfo")
        .ok_or_else(|| malformed(element, "Signature without SignedInfo"))?;

    let c14n_method = signed_info
        .find_child(DS_NS, "CanonicalizationMethod")
        .and_then(|e| e.attribute("Algorithm").map(str::to_string))
        .unwrap_or_else(|| crate::crypto::algorithms::C14N_EXCLUSIVE.to_string());

    let signature_method = signed_info
        .find_child(DS_NS, "SignatureMethod")
        .and_then(|e| e.attribute("Algorithm").map(str::to_string))
        .ok_or_else(|| malformed(element, "SignedInfo without SignatureMethod"))?;

    let mut references = Vec::new();
    for reference in signed_info
        .child_elements()
        .filter(|e| e.is(DS_NS, "Reference"))
    {
        let uri = reference
            .attribute("URI")
            .ok_or_else(|| malformed(element, "Reference without URI"))?;
        if !uri.starts_with('#') {
            return Err(malformed(
                element,
                format!("unsupported non-fragment Reference URI '{uri}'"),
            ));
        }
        let digest_method = reference
            .find_child(DS_NS, "DigestMethod")
            .and_then(|e| e.attribute("Algorithm").map(str::to_string))
            .ok_or_else(|| malformed(element, "Reference without DigestMethod"))?;
        let digest_value = reference
            .child_text(DS_NS, "DigestValue")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed(element, "Reference without DigestValue"))?;
        references.push(SignatureReference {
            uri: uri.trim_start_matches('#').to_string(),
            digest_method,
            digest_value,
        });
    }

    let signature_value = element
        .child_text(DS_NS, "SignatureValue")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(element, "Signature without SignatureValue"))?;

    let key_info = element
        .find_child(DS_NS, "KeyInfo")
        .map(parse_key_reference)
        .unwrap_or(KeyReference::None);

    Ok(SignatureElement {
        id: element.id().map(str::to_string),
        c14n_method,
        signature_method,
        references,
        signature_value,
        key_info,
        signed_info_canonical: signed_info.canonical_bytes(),
    })
}

fn parse_encrypted_key(element: &XmlElement) -> Result<EncryptedKeyElement, ProcessingError> {
    let algorithm = element
        .find_child(XENC_NS, "EncryptionMethod")
        .and_then(|e| e.attribute("Algorithm").map(str::to_string))
        .ok_or_else(|| malformed(element, "EncryptedKey without EncryptionMethod"))?;

    let cipher_value = element
        .find_child(XENC_NS, "CipherData")
        .and_then(|cd| cd.child_text(XENC_NS, "CipherValue"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed(element, "EncryptedKey without CipherValue"))?;

    let key_info = element
        .find_child(DS_NS, "KeyInfo")
        .map(parse_key_reference)
        .unwrap_or(KeyReference::None);

    let data_references = element
        .find_child(XENC_NS, "ReferenceList")
        .map(parse_reference_list)
        .unwrap_or_default();

    Ok(EncryptedKeyElement {
        id: element.id().map(str::to_string),
        algorithm,
        key_info,
        cipher_value,
        data_references,
    })
}

fn parse_reference_list(element: &XmlElement) -> Vec<String> {
    element
        .child_elements()
        .filter(|e| e.is(XENC_NS, "DataReference"))
        .filter_map(|e| e.attribute("URI"))
        .map(|uri| uri.trim_start_matches('#').to_string())
        .collect()
}

fn parse_derived_key_token(
    element: &XmlElement,
) -> Result<DerivedKeyTokenElement, ProcessingError> {
    let base = parse_key_reference(element);
    if base == KeyReference::None {
        return Err(malformed(element, "DerivedKeyToken without a base token reference"));
    }

    let parse_usize = |name: &str| -> Result<Option<usize>, ProcessingError> {
        match element.child_text(WSC_NS, name) {
            Some(text) => text
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| malformed(element, format!("bad {name} value '{}'", text.trim()))),
            None => Ok(None),
        }
    };

    Ok(DerivedKeyTokenElement {
        id: element.id().map(str::to_string),
        algorithm: element
            .attribute("Algorithm")
            .map(str::to_string)
            .unwrap_or_else(|| crate::crypto::algorithms::DK_P_SHA1.to_string()),
        base,
        label: element.child_text(WSC_NS, "Label").filter(|s| !s.is_empty()),
        nonce: element.child_text(WSC_NS, "Nonce").filter(|s| !s.is_empty()),
        offset: parse_usize("Offset")?.unwrap_or(0),
        length: parse_usize("Length")?.unwrap_or(32),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::WorkingDocument;

    fn security_element(inner: &str) -> XmlElement {
        let xml = format!(
            r#"<wsse:Security
                 xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd"
                 xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd"
                 xmlns:ds="http://www.w3.org/2000/09/xmldsig#"
                 xmlns:xenc="http://www.w3.org/2001/04/xmlenc#"
                 xmlns:wsc="http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512">{inner}</wsse:Security>"#
        );
        WorkingDocument::parse(xml.as_bytes()).unwrap().root
    }

    #[test]
    fn test_classify_preserves_document_order() {
        let security = security_element(
            r#"<wsse:UsernameToken><wsse:Username>alice</wsse:Username></wsse:UsernameToken>
               <wsu:Timestamp><wsu:Created>2025-01-01T00:00:00Z</wsu:Created></wsu:Timestamp>"#,
        );
        let children = classify_security_header(&security).unwrap();
        assert_eq!(children.len(), 2);
        assert!(matches!(children[0], SecurityHeaderChild::UsernameToken(_)));
        assert!(matches!(children[1], SecurityHeaderChild::Timestamp(_)));
    }

    #[test]
    fn test_timestamp_requires_created() {
        let security = security_element(
            r#"<wsu:Timestamp><wsu:Expires>2025-01-01T00:05:00Z</wsu:Expires></wsu:Timestamp>"#,
        );
        let err = classify_security_header(&security).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_TOKEN");
    }

    #[test]
    fn test_username_token_password_types() {
        let security = security_element(
            r#"<wsse:UsernameToken wsu:Id="ut-1">
                 <wsse:Username>alice</wsse:Username>
                 <wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">aGFzaA==</wsse:Password>
                 <wsse:Nonce>bm9uY2U=</wsse:Nonce>
                 <wsu:Created>2025-01-01T00:00:00Z</wsu:Created>
               </wsse:UsernameToken>"#,
        );
        let children = classify_security_header(&security).unwrap();
        let SecurityHeaderChild::UsernameToken(token) = &children[0] else {
            panic!("expected username token");
        };
        assert_eq!(token.username, "alice");
        assert_eq!(token.password_type, PasswordType::Digest);
        assert_eq!(token.nonce.as_deref(), Some("bm9uY2U="));
        assert_eq!(token.id.as_deref(), Some("ut-1"));
    }

    #[test]
    fn test_signature_parsing_and_key_reference() {
        let security = security_element(
            r##"<ds:Signature wsu:Id="sig-1">
                 <ds:SignedInfo>
                   <ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/>
                   <ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#hmac-sha256"/>
                   <ds:Reference URI="#body-1">
                     <ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/>
                     <ds:DigestValue>ZGlnZXN0</ds:DigestValue>
                   </ds:Reference>
                 </ds:SignedInfo>
                 <ds:SignatureValue>c2ln</ds:SignatureValue>
                 <ds:KeyInfo>
                   <wsse:SecurityTokenReference>
                     <wsse:KeyIdentifier>session-1</wsse:KeyIdentifier>
                   </wsse:SecurityTokenReference>
                 </ds:KeyInfo>
               </ds:Signature>"##,
        );
        let children = classify_security_header(&security).unwrap();
        let SecurityHeaderChild::Signature(sig) = &children[0] else {
            panic!("expected signature");
        };
        assert_eq!(
            sig.signature_method,
            crate::crypto::algorithms::SIG_HMAC_SHA256
        );
        assert_eq!(sig.references.len(), 1);
        assert_eq!(sig.references[0].uri, "body-1");
        assert_eq!(
            sig.key_info,
            KeyReference::KeyIdentifier {
                value: "session-1".to_string()
            }
        );
        assert!(!sig.signed_info_canonical.is_empty());
    }

    #[test]
    fn test_signature_without_signature_value_is_malformed() {
        let security = security_element(
            r#"<ds:Signature>
                 <ds:SignedInfo>
                   <ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#hmac-sha256"/>
                 </ds:SignedInfo>
               </ds:Signature>"#,
        );
        assert!(classify_security_header(&security).is_err());
    }

    #[test]
    fn test_encrypted_key_parsing() {
        let security = security_element(
            r##"<xenc:EncryptedKey Id="ek-1">
                 <xenc:EncryptionMethod Algorithm="http://www.w3.org/2009/xmlenc11#aes256-gcm"/>
                 <ds:KeyInfo>
                   <wsse:SecurityTokenReference>
                     <wsse:KeyIdentifier>session-1</wsse:KeyIdentifier>
                   </wsse:SecurityTokenReference>
                 </ds:KeyInfo>
                 <xenc:CipherData><xenc:CipherValue>Y2lwaGVy</xenc:CipherValue></xenc:CipherData>
                 <xenc:ReferenceList>
                   <xenc:DataReference URI="#enc-1"/>
                   <xenc:DataReference URI="#enc-2"/>
                 </xenc:ReferenceList>
               </xenc:EncryptedKey>"##,
        );
        let children = classify_security_header(&security).unwrap();
        let SecurityHeaderChild::EncryptedKey(ek) = &children[0] else {
            panic!("expected encrypted key");
        };
        assert_eq!(ek.id.as_deref(), Some("ek-1"));
        assert_eq!(ek.data_references, vec!["enc-1", "enc-2"]);
        assert_eq!(
            ek.key_info,
            KeyReference::KeyIdentifier {
                value: "session-1".to_string()
            }
        );
    }

    #[test]
    fn test_derived_key_token_defaults() {
        let security = security_element(
            r##"<wsc:DerivedKeyToken wsu:Id="dk-1">
                 <wsse:SecurityTokenReference>
                   <wsse:Reference URI="#ek-1"/>
                 </wsse:SecurityTokenReference>
                 <wsc:Nonce>bm9uY2U=</wsc:Nonce>
               </wsc:DerivedKeyToken>"##,
        );
        let children = classify_security_header(&security).unwrap();
        let SecurityHeaderChild::DerivedKeyToken(dk) = &children[0] else {
            panic!("expected derived key token");
        };
        assert_eq!(dk.algorithm, crate::crypto::algorithms::DK_P_SHA1);
        assert_eq!(
            dk.base,
            KeyReference::Reference {
                uri: "ek-1".to_string()
            }
        );
        assert_eq!(dk.offset, 0);
        assert_eq!(dk.length, 32);
    }

    #[test]
    fn test_derived_key_token_without_base_is_malformed() {
        let security = security_element(
            r#"<wsc:DerivedKeyToken wsu:Id="dk-1">
                 <wsc:Nonce>bm9uY2U=</wsc:Nonce>
               </wsc:DerivedKeyToken>"#,
        );
        assert!(classify_security_header(&security).is_err());
    }

    #[test]
    fn test_unknown_child_is_reported_not_fatal() {
        let security = security_element(r#"<wsse:FancyNewToken>x</wsse:FancyNewToken>"#);
        let children = classify_security_header(&security).unwrap();
        // wsse:FancyNewToken is not a recognized wsse element.
        assert!(matches!(
            &children[0],
            SecurityHeaderChild::Unknown { name } if name == "wsse:FancyNewToken"
        ));
    }

    #[test]
    fn test_saml_assertion_detected() {
        let xml = r#"<wsse:Security
             xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
             <saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="a-1"/>
           </wsse:Security>"#;
        let root = WorkingDocument::parse(xml.as_bytes()).unwrap().root;
        let children = classify_security_header(&root).unwrap();
        assert!(matches!(
            &children[0],
            SecurityHeaderChild::SamlAssertion(a) if a.assertion_id.as_deref() == Some("a-1")
        ));
    }
}
