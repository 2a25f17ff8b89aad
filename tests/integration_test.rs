//! Integration tests for the wsse-engine crate.
//!
//! These tests exercise the public API surface end-to-end: building real
//! envelopes with computed digests, signatures, and ciphertexts, then
//! running them through the engine's parse → process → validate pipeline.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
use rsa::RsaPrivateKey;

use wsse_engine::config::{EngineConfig, KeystoreConfig};
use wsse_engine::crypto::{self, algorithms};
use wsse_engine::document::WorkingDocument;
use wsse_engine::engine::fault_response;
use wsse_engine::{
    AlgorithmSuite, Binding, Layout, PartsRequirement, PolicyViolationCode, ProcessingError,
    ResultKind, SecurityEngine, SecurityFault, SecurityPolicy, TokenEntry, TokenStore,
    TokenStoreResolver,
};

const SOAP_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const XENC_NS: &str = "http://www.w3.org/2001/04/xmlenc#";

// ============================================================================
// Fixture helpers
// ============================================================================

/// Canonical bytes of a standalone fragment, exactly as the verifier will
/// compute them for the same element inside a message. Signed elements in
/// these fixtures declare their namespaces on themselves so the standalone
/// and in-envelope forms canonicalize identically.
fn canon(fragment: &str) -> Vec<u8> {
    WorkingDocument::parse(fragment.as_bytes())
        .unwrap()
        .root
        .canonical_bytes()
}

fn operation_element() -> String {
    format!(
        r#"<m:GetUser xmlns:m="urn:example:users" xmlns:wsu="{WSU_NS}" wsu:Id="body-1"><m:UserId>42</m:UserId></m:GetUser>"#
    )
}

fn body_element(content: &str) -> String {
    format!(
        r#"<soap:Body xmlns:soap="{SOAP_NS}" xmlns:wsu="{WSU_NS}" wsu:Id="the-body">{content}</soap:Body>"#
    )
}

fn timestamp_fragment() -> String {
    let now = chrono::Utc::now();
    let expires = now + chrono::Duration::minutes(5);
    format!(
        r#"<wsu:Timestamp xmlns:wsu="{WSU_NS}" wsu:Id="ts-1"><wsu:Created>{}</wsu:Created><wsu:Expires>{}</wsu:Expires></wsu:Timestamp>"#,
        now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        expires.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    )
}

fn signed_info_fragment(signature_method: &str, reference_uri: &str, covered: &[u8]) -> String {
    let digest = BASE64.encode(crypto::sha256_digest(covered));
    format!(
        r##"<ds:SignedInfo xmlns:ds="{DS_NS}"><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"></ds:CanonicalizationMethod><ds:SignatureMethod Algorithm="{signature_method}"></ds:SignatureMethod><ds:Reference URI="#{reference_uri}"><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"></ds:DigestMethod><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##
    )
}

fn signature_fragment(signed_info: &str, signature_value_b64: &str, key_ref: &str) -> String {
    format!(
        r#"<ds:Signature xmlns:ds="{DS_NS}" xmlns:wsu="{WSU_NS}" wsu:Id="sig-1">{signed_info}<ds:SignatureValue>{signature_value_b64}</ds:SignatureValue><ds:KeyInfo><wsse:SecurityTokenReference xmlns:wsse="{WSSE_NS}"><wsse:KeyIdentifier>{key_ref}</wsse:KeyIdentifier></wsse:SecurityTokenReference></ds:KeyInfo></ds:Signature>"#
    )
}

fn hmac_signature(key: &[u8], reference_uri: &str, covered: &[u8], key_ref: &str) -> String {
    let signed_info = signed_info_fragment(algorithms::SIG_HMAC_SHA256, reference_uri, covered);
    let value = BASE64.encode(crypto::hmac_sha256(key, &canon(&signed_info)));
    signature_fragment(&signed_info, &value, key_ref)
}

fn encrypted_data_fragment(id: &str, cipher_value_b64: &str) -> String {
    format!(
        r#"<xenc:EncryptedData xmlns:xenc="{XENC_NS}" Id="{id}"><xenc:EncryptionMethod Algorithm="{}"></xenc:EncryptionMethod><xenc:CipherData><xenc:CipherValue>{cipher_value_b64}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedData>"#,
        algorithms::ENC_AES256_GCM
    )
}

fn encrypted_key_fragment(
    algorithm: &str,
    key_ref: &str,
    cipher_value_b64: &str,
    data_reference: &str,
) -> String {
    format!(
        r##"<xenc:EncryptedKey xmlns:xenc="{XENC_NS}" xmlns:ds="{DS_NS}" Id="ek-1"><xenc:EncryptionMethod Algorithm="{algorithm}"></xenc:EncryptionMethod><ds:KeyInfo><wsse:SecurityTokenReference xmlns:wsse="{WSSE_NS}"><wsse:KeyIdentifier>{key_ref}</wsse:KeyIdentifier></wsse:SecurityTokenReference></ds:KeyInfo><xenc:CipherData><xenc:CipherValue>{cipher_value_b64}</xenc:CipherValue></xenc:CipherData><xenc:ReferenceList><xenc:DataReference URI="#{data_reference}"></xenc:DataReference></xenc:ReferenceList></xenc:EncryptedKey>"##
    )
}

fn envelope(security_children: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="{SOAP_NS}">
  <soap:Header>
    <wsse:Security xmlns:wsse="{WSSE_NS}">
{security_children}
    </wsse:Security>
  </soap:Header>
  {body}
</soap:Envelope>"#
    )
}

fn symmetric_config(token_id: &str, key: &[u8]) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.keystores.insert(
        "default".to_string(),
        KeystoreConfig {
            symmetric_keys: [(token_id.to_string(), BASE64.encode(key))]
                .into_iter()
                .collect(),
            ..Default::default()
        },
    );
    config
}

fn session_resolver(token_id: &str, key: &[u8]) -> TokenStoreResolver {
    let store = TokenStore::new();
    store.put(token_id, TokenEntry::new(key.to_vec()));
    TokenStoreResolver::new(store)
        .with_passwords(|user| (user == "alice").then(|| "wonderland".to_string()))
}

// ============================================================================
// Symmetric binding: encrypted body + signature over decrypted content
// ============================================================================

fn symmetric_scenario_policy() -> SecurityPolicy {
    SecurityPolicy {
        binding: Binding::Symmetric,
        layout: Layout::LaxTimestampFirst,
        required_tokens: [ResultKind::Timestamp, ResultKind::Signature]
            .into_iter()
            .collect(),
        signed_parts: PartsRequirement::of(["Body"]),
        encrypted_parts: PartsRequirement::of(["GetUser"]),
        require_timestamp: true,
        freshness_window_secs: 300,
        algorithms: AlgorithmSuite {
            signature: [algorithms::SIG_HMAC_SHA256.to_string()].into_iter().collect(),
            encryption: [algorithms::ENC_AES256_GCM.to_string()].into_iter().collect(),
            key_wrap: [algorithms::ENC_AES256_GCM.to_string()].into_iter().collect(),
            ..Default::default()
        },
    }
}

/// Assemble the full symmetric scenario: a shared secret wraps a content key,
/// the content key encrypts the body operation, and the signature covers the
/// Body as it looks after decryption.
fn symmetric_scenario_envelope(shared_secret: &[u8]) -> String {
    let cek: Vec<u8> = (0u8..32).collect();

    let plaintext_operation = operation_element();
    let sealed = crypto::aes256_gcm_seal(&cek, plaintext_operation.as_bytes()).unwrap();
    let encrypted_data = encrypted_data_fragment("enc-1", &BASE64.encode(sealed));

    let wrapped_cek = crypto::aes256_gcm_seal(shared_secret, &cek).unwrap();
    let encrypted_key = encrypted_key_fragment(
        algorithms::ENC_AES256_GCM,
        "session-1",
        &BASE64.encode(wrapped_cek),
        "enc-1",
    );

    // The signature digest covers the Body in its decrypted form.
    let decrypted_body = body_element(&plaintext_operation);
    let signature = hmac_signature(shared_secret, "the-body", &canon(&decrypted_body), "session-1");

    let security = format!("{}\n{encrypted_key}\n{signature}", timestamp_fragment());
    envelope(&security, &body_element(&encrypted_data))
}

#[test]
fn test_symmetric_binding_scenario_accepts() {
    let shared_secret = [0x42u8; 32];
    let xml = symmetric_scenario_envelope(&shared_secret);

    let engine = SecurityEngine::new(
        &symmetric_config("unused", &[0u8; 32]),
        symmetric_scenario_policy(),
    )
    .unwrap();
    let resolver = session_resolver("session-1", &shared_secret);

    let outcome = engine.process_inbound(xml.as_bytes(), &resolver).unwrap();

    // The ciphertext was replaced by the decrypted operation.
    assert!(outcome.document.find_by_id("enc-1").is_none());
    assert!(outcome.document.find_by_id("body-1").is_some());

    // Result order mirrors the header: Timestamp, EncryptedKey,
    // EncryptedParts, Signature.
    let kinds: Vec<ResultKind> = outcome.results.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ResultKind::Timestamp,
            ResultKind::EncryptedKey,
            ResultKind::EncryptedParts,
            ResultKind::Signature,
        ]
    );

    let signature = outcome
        .results
        .first_of_kind(ResultKind::Signature)
        .unwrap();
    assert!(signature.covered_elements.contains("Body"));
    assert_eq!(signature.subject.root_id(), Some("session-1"));
}

#[test]
fn test_symmetric_scenario_tampered_ciphertext_rejected() {
    let shared_secret = [0x42u8; 32];
    let xml = symmetric_scenario_envelope(&shared_secret);

    // Flip one byte inside the encrypted body's CipherValue.
    let marker = "<xenc:CipherValue>";
    let start = xml.rfind(marker).unwrap() + marker.len();
    let mut tampered = xml.clone();
    let original = tampered.as_bytes()[start + 10] as char;
    let replacement = if original == 'A' { 'B' } else { 'A' };
    tampered.replace_range(start + 10..start + 11, &replacement.to_string());

    let engine = SecurityEngine::new(
        &symmetric_config("unused", &[0u8; 32]),
        symmetric_scenario_policy(),
    )
    .unwrap();
    let resolver = session_resolver("session-1", &shared_secret);

    let fault = engine
        .process_inbound(tampered.as_bytes(), &resolver)
        .unwrap_err();
    // Authenticated encryption surfaces tampering as a decryption failure,
    // never a silent pass. (A corrupted base64 char may also be caught as a
    // malformed token; both reject the message outright.)
    assert!(matches!(
        fault,
        SecurityFault::Processing(
            ProcessingError::DecryptionFailure { .. } | ProcessingError::MalformedToken { .. }
        )
    ));
}

#[test]
fn test_symmetric_scenario_wrong_session_key_rejected() {
    let shared_secret = [0x42u8; 32];
    let xml = symmetric_scenario_envelope(&shared_secret);

    let engine = SecurityEngine::new(
        &symmetric_config("unused", &[0u8; 32]),
        symmetric_scenario_policy(),
    )
    .unwrap();
    // The resolver serves a different key for session-1.
    let resolver = session_resolver("session-1", &[0x43u8; 32]);

    let fault = engine.process_inbound(xml.as_bytes(), &resolver).unwrap_err();
    assert_eq!(fault.code(), "DECRYPTION_FAILURE");
}

// ============================================================================
// Order sensitivity
// ============================================================================

#[test]
fn test_timestamp_after_signature_violates_lax_timestamp_first() {
    let shared_secret = [0x42u8; 32];
    let body = body_element(&operation_element());
    let signature = hmac_signature(&shared_secret, "the-body", &canon(&body), "session-1");

    // Signature before Timestamp: both operations verify fine individually.
    let security = format!("{signature}\n{}", timestamp_fragment());
    let xml = envelope(&security, &body);

    let policy = SecurityPolicy {
        binding: Binding::Symmetric,
        layout: Layout::LaxTimestampFirst,
        require_timestamp: true,
        ..Default::default()
    };
    let engine = SecurityEngine::new(&symmetric_config("unused", &[0u8; 32]), policy).unwrap();
    let resolver = session_resolver("session-1", &shared_secret);

    let fault = engine.process_inbound(xml.as_bytes(), &resolver).unwrap_err();
    match fault {
        SecurityFault::Policy(violation) => {
            assert_eq!(violation.code, PolicyViolationCode::LayoutMismatch);
        }
        other => panic!("expected a policy violation, got {other:?}"),
    }
}

#[test]
fn test_same_message_accepted_under_lax_layout() {
    let shared_secret = [0x42u8; 32];
    let body = body_element(&operation_element());
    let signature = hmac_signature(&shared_secret, "the-body", &canon(&body), "session-1");
    let security = format!("{signature}\n{}", timestamp_fragment());
    let xml = envelope(&security, &body);

    let policy = SecurityPolicy {
        binding: Binding::Symmetric,
        layout: Layout::Lax,
        require_timestamp: true,
        ..Default::default()
    };
    let engine = SecurityEngine::new(&symmetric_config("unused", &[0u8; 32]), policy).unwrap();
    let resolver = session_resolver("session-1", &shared_secret);

    engine.process_inbound(xml.as_bytes(), &resolver).unwrap();
}

// ============================================================================
// Username tokens
// ============================================================================

fn username_token_fragment(username: &str, password: &str) -> String {
    let nonce = b"fedcba9876543210";
    let created = "2025-06-01T12:00:00Z";
    let digest = crypto::password_digest(nonce, created, password);
    format!(
        r#"<wsse:UsernameToken xmlns:wsse="{WSSE_NS}" xmlns:wsu="{WSU_NS}" wsu:Id="ut-1"><wsse:Username>{username}</wsse:Username><wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{digest}</wsse:Password><wsse:Nonce>{}</wsse:Nonce><wsu:Created>{created}</wsu:Created></wsse:UsernameToken>"#,
        BASE64.encode(nonce)
    )
}

#[test]
fn test_unknown_username_is_unknown_credential_not_generic() {
    let xml = envelope(
        &username_token_fragment("mallory", "anything"),
        &body_element(&operation_element()),
    );

    let policy = SecurityPolicy {
        binding: Binding::Transport,
        ..Default::default()
    };
    let engine = SecurityEngine::new(&symmetric_config("unused", &[0u8; 32]), policy).unwrap();
    let resolver = session_resolver("session-1", &[0x42u8; 32]);

    let fault = engine.process_inbound(xml.as_bytes(), &resolver).unwrap_err();
    assert_eq!(fault.code(), "UNKNOWN_CREDENTIAL");
    assert!(matches!(
        fault,
        SecurityFault::Processing(ProcessingError::UnknownCredential { identifier }) if identifier == "mallory"
    ));
}

#[test]
fn test_username_token_authenticates_and_exposes_principal() {
    let xml = envelope(
        &username_token_fragment("alice", "wonderland"),
        &body_element(&operation_element()),
    );

    let policy = SecurityPolicy {
        binding: Binding::Transport,
        required_tokens: [ResultKind::UsernameToken].into_iter().collect(),
        ..Default::default()
    };
    let engine = SecurityEngine::new(&symmetric_config("unused", &[0u8; 32]), policy).unwrap();
    let resolver = session_resolver("session-1", &[0x42u8; 32]);

    let outcome = engine.process_inbound(xml.as_bytes(), &resolver).unwrap();
    assert_eq!(outcome.principal.as_deref(), Some("alice"));
}

// ============================================================================
// No security header
// ============================================================================

#[test]
fn test_document_without_security_header_yields_empty_results() {
    let xml = envelope("", &body_element(&operation_element()))
        .replace(
            &format!(
                "<wsse:Security xmlns:wsse=\"{WSSE_NS}\">\n\n    </wsse:Security>"
            ),
            "",
        );

    let policy = SecurityPolicy {
        binding: Binding::Transport,
        ..Default::default()
    };
    let engine = SecurityEngine::new(&symmetric_config("unused", &[0u8; 32]), policy).unwrap();
    let resolver = session_resolver("session-1", &[0x42u8; 32]);

    let outcome = engine.process_inbound(xml.as_bytes(), &resolver).unwrap();
    assert!(outcome.results.is_empty());
}

// ============================================================================
// Asymmetric binding
// ============================================================================

struct AsymmetricFixture {
    config: EngineConfig,
    signing_pkcs8: Vec<u8>,
    encryption_spki: Vec<u8>,
}

fn asymmetric_fixture(signature_alias: &str, encryption_alias: &str) -> AsymmetricFixture {
    let signing_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
    let encryption_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();

    let signing_spki = signing_key
        .to_public_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    let encryption_spki = encryption_key
        .to_public_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    let signing_pkcs8 = signing_key.to_pkcs8_der().unwrap().as_bytes().to_vec();
    let encryption_pkcs8 = encryption_key.to_pkcs8_der().unwrap().as_bytes().to_vec();

    let mut config = EngineConfig::default();
    config.keystores.insert(
        "default".to_string(),
        KeystoreConfig {
            verification_keys: [(signature_alias.to_string(), BASE64.encode(&signing_spki))]
                .into_iter()
                .collect(),
            private_keys: [(encryption_alias.to_string(), BASE64.encode(&encryption_pkcs8))]
                .into_iter()
                .collect(),
            ..Default::default()
        },
    );

    AsymmetricFixture {
        config,
        signing_pkcs8,
        encryption_spki,
    }
}

fn asymmetric_envelope(fixture: &AsymmetricFixture, sig_alias: &str, enc_alias: &str) -> String {
    let cek: Vec<u8> = (100u8..132).collect();

    let plaintext_operation = operation_element();
    let sealed = crypto::aes256_gcm_seal(&cek, plaintext_operation.as_bytes()).unwrap();
    let encrypted_data = encrypted_data_fragment("enc-1", &BASE64.encode(sealed));

    let wrapped_cek = crypto::rsa_oaep_encrypt(&fixture.encryption_spki, &cek).unwrap();
    let encrypted_key = encrypted_key_fragment(
        algorithms::KW_RSA_OAEP,
        enc_alias,
        &BASE64.encode(wrapped_cek),
        "enc-1",
    );

    let decrypted_body = body_element(&plaintext_operation);
    let signed_info =
        signed_info_fragment(algorithms::SIG_RSA_SHA256, "the-body", &canon(&decrypted_body));
    let value = BASE64
        .encode(crypto::rsa_sha256_sign(&fixture.signing_pkcs8, &canon(&signed_info)).unwrap());
    let signature = signature_fragment(&signed_info, &value, sig_alias);

    let security = format!("{}\n{encrypted_key}\n{signature}", timestamp_fragment());
    envelope(&security, &body_element(&encrypted_data))
}

fn asymmetric_policy() -> SecurityPolicy {
    SecurityPolicy {
        binding: Binding::Asymmetric,
        layout: Layout::LaxTimestampFirst,
        signed_parts: PartsRequirement::of(["Body"]),
        encrypted_parts: PartsRequirement::of(["GetUser"]),
        require_timestamp: true,
        ..Default::default()
    }
}

#[test]
fn test_asymmetric_binding_scenario_accepts() {
    let fixture = asymmetric_fixture("svc-signing", "svc-encryption");
    let xml = asymmetric_envelope(&fixture, "svc-signing", "svc-encryption");

    let engine = SecurityEngine::new(&fixture.config, asymmetric_policy()).unwrap();
    let resolver = TokenStoreResolver::new(TokenStore::new());

    let outcome = engine.process_inbound(xml.as_bytes(), &resolver).unwrap();
    assert!(outcome.document.find_by_id("body-1").is_some());

    let signature = outcome
        .results
        .first_of_kind(ResultKind::Signature)
        .unwrap();
    assert_eq!(
        signature.algorithm.as_deref(),
        Some(algorithms::SIG_RSA_SHA256)
    );
}

#[test]
fn test_asymmetric_binding_rejects_shared_signing_and_encryption_key() {
    // One alias serves both signing and decryption: the binding requires
    // distinct key pairs.
    let signing_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
    let spki = signing_key
        .to_public_key()
        .to_public_key_der()
        .unwrap()
        .as_bytes()
        .to_vec();
    let pkcs8 = signing_key.to_pkcs8_der().unwrap().as_bytes().to_vec();

    let mut config = EngineConfig::default();
    config.keystores.insert(
        "default".to_string(),
        KeystoreConfig {
            verification_keys: [("svc".to_string(), BASE64.encode(&spki))]
                .into_iter()
                .collect(),
            private_keys: [("svc".to_string(), BASE64.encode(&pkcs8))]
                .into_iter()
                .collect(),
            ..Default::default()
        },
    );

    let fixture = AsymmetricFixture {
        config,
        signing_pkcs8: pkcs8,
        encryption_spki: spki,
    };
    let xml = asymmetric_envelope(&fixture, "svc", "svc");

    let engine = SecurityEngine::new(&fixture.config, asymmetric_policy()).unwrap();
    let resolver = TokenStoreResolver::new(TokenStore::new());

    let fault = engine.process_inbound(xml.as_bytes(), &resolver).unwrap_err();
    match fault {
        SecurityFault::Policy(violation) => {
            assert_eq!(violation.code, PolicyViolationCode::BindingMismatch);
        }
        other => panic!("expected a policy violation, got {other:?}"),
    }
}

// ============================================================================
// Configuration-driven engine
// ============================================================================

#[test]
fn test_engine_from_yaml_config() {
    let shared_secret = [0x42u8; 32];
    let yaml = format!(
        r#"
processing:
  unknown_elements: strict
  credential_timeout_ms: 1000
crypto:
  signature_keystore: service
keystores:
  service:
    symmetric_keys:
      session-1: "{}"
"#,
        BASE64.encode(shared_secret)
    );
    let config: EngineConfig = serde_yaml::from_str(&yaml).unwrap();

    let policy = SecurityPolicy {
        binding: Binding::Symmetric,
        signed_parts: PartsRequirement::of(["Body"]),
        ..Default::default()
    };
    let engine = SecurityEngine::new(&config, policy).unwrap();

    // The keystore (not the session resolver) supplies the key here.
    let body = body_element(&operation_element());
    let signature = hmac_signature(&shared_secret, "the-body", &canon(&body), "session-1");
    let xml = envelope(&signature, &body);

    let resolver = TokenStoreResolver::new(TokenStore::new());
    let outcome = engine.process_inbound(xml.as_bytes(), &resolver).unwrap();
    assert_eq!(outcome.results.len(), 1);
}

// ============================================================================
// Fault rendering
// ============================================================================

#[test]
fn test_rejected_message_renders_soap_fault() {
    let policy = SecurityPolicy {
        binding: Binding::Transport,
        require_timestamp: true,
        ..Default::default()
    };
    let engine = SecurityEngine::new(&symmetric_config("unused", &[0u8; 32]), policy).unwrap();
    let resolver = session_resolver("session-1", &[0x42u8; 32]);

    let xml = envelope("", &body_element(&operation_element()));
    let fault = engine.process_inbound(xml.as_bytes(), &resolver).unwrap_err();

    let doc = WorkingDocument::parse(xml.as_bytes()).unwrap();
    let body = fault_response(&fault, doc.soap_version());
    assert!(body.contains("STALE_OR_MISSING_TIMESTAMP"));
    assert!(body.contains("soap:Fault"));
}
