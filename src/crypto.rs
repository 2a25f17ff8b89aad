//! Cryptographic primitives, keystores, and per-binding provider resolution.
//!
//! Primitives are thin wrappers over the RustCrypto crates:
//! - AES-256-GCM for content decryption and symmetric key unwrap,
//!   framed as `nonce || ciphertext || tag`
//! - HMAC-SHA1/SHA256 for symmetric signatures and P_SHA1 derivation
//! - RSA PKCS#1 v1.5 + SHA-256 signatures and RSA-OAEP-SHA256 key transport
//! - SHA-1 password digests per the UsernameToken profile
//!
//! Key material lives in [`Keystore`]s resolved by name through the
//! [`CryptoProviderResolver`] into a [`BindingStrategy`], once per
//! configuration rather than per header element.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{pkcs1v15, Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::policy::Binding;

/// Algorithm URIs recorded on results and checked against the policy suite.
pub mod algorithms {
    /// Exclusive canonicalization (recorded, not policed).
    pub const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
    /// HMAC-SHA256 signature.
    pub const SIG_HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";
    /// RSA PKCS#1 v1.5 with SHA-256 signature.
    pub const SIG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
    /// SHA-1 digest.
    pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
    /// SHA-256 digest.
    pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
    /// AES-256-GCM content encryption (also used for symmetric key wrap).
    pub const ENC_AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";
    /// RSA-OAEP key transport.
    pub const KW_RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
    /// P_SHA1 key derivation (WS-SecureConversation).
    pub const DK_P_SHA1: &str =
        "http://docs.oasis-open.org/ws-sx/ws-secureconversation/200512/dk/p_sha1";
    /// HKDF with SHA-256 key derivation.
    pub const DK_HKDF_SHA256: &str = "http://www.w3.org/2021/04/xmldsig-more#hkdf";
}

/// Nonce size for AES-GCM (96 bits).
const GCM_NONCE_SIZE: usize = 12;
/// GCM authentication tag size.
const GCM_TAG_SIZE: usize = 16;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Failures inside a cryptographic primitive or keystore lookup.
///
/// The processor maps these onto its own error taxonomy; nothing here is
/// exposed to callers of the engine directly.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("unknown keystore '{0}'")]
    UnknownKeystore(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("key derivation failed: {0}")]
    DerivationFailed(String),

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),
}

// ---------------------------------------------------------------------------
// Digests and MACs
// ---------------------------------------------------------------------------

/// SHA-1 digest (UsernameToken password digests, legacy references).
pub fn sha1_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// SHA-256 digest.
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Digest dispatch by algorithm URI.
pub fn digest(algorithm: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match algorithm {
        algorithms::DIGEST_SHA1 => Ok(sha1_digest(data)),
        algorithms::DIGEST_SHA256 => Ok(sha256_digest(data)),
        other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// HMAC-SHA1 (P_SHA1 building block).
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// HMAC-SHA256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// UsernameToken password digest: `Base64(SHA-1(nonce || created || password))`.
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// AES-256-GCM
// ---------------------------------------------------------------------------

/// Encrypt with AES-256-GCM; output framed as `nonce || ciphertext || tag`.
pub fn aes256_gcm_seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(format!("bad AES-256 key: {e}")))?;

    let mut nonce_bytes = [0u8; GCM_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut out = Vec::with_capacity(GCM_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt AES-256-GCM data framed as `nonce || ciphertext || tag`.
///
/// GCM is authenticated: any tampering with the ciphertext fails here rather
/// than producing garbled plaintext.
pub fn aes256_gcm_open(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(
            "ciphertext too short".to_string(),
        ));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(format!("bad AES-256 key: {e}")))?;

    let (nonce_bytes, ciphertext) = data.split_at(GCM_NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".to_string()))
}

// ---------------------------------------------------------------------------
// RSA
// ---------------------------------------------------------------------------

fn rsa_public_key(spki_der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| CryptoError::InvalidKey(format!("bad RSA public key: {e}")))
}

fn rsa_private_key(pkcs8_der: &[u8]) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::from_pkcs8_der(pkcs8_der)
        .map_err(|e| CryptoError::InvalidKey(format!("bad RSA private key: {e}")))
}

/// Verify an RSA PKCS#1 v1.5 + SHA-256 signature against an SPKI DER key.
pub fn rsa_sha256_verify(spki_der: &[u8], msg: &[u8], sig: &[u8]) -> Result<(), CryptoError> {
    let key = rsa_public_key(spki_der)?;
    let vk = pkcs1v15::VerifyingKey::<Sha256>::new(key);
    let signature = pkcs1v15::Signature::try_from(sig)
        .map_err(|e| CryptoError::VerificationFailed(format!("bad signature bytes: {e}")))?;
    vk.verify(msg, &signature)
        .map_err(|_| CryptoError::VerificationFailed("signature verification failed".to_string()))
}

/// Produce an RSA PKCS#1 v1.5 + SHA-256 signature with a PKCS#8 DER key.
pub fn rsa_sha256_sign(pkcs8_der: &[u8], msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_private_key(pkcs8_der)?;
    let sk = pkcs1v15::SigningKey::<Sha256>::new(key);
    Ok(sk.sign(msg).to_vec())
}

/// RSA-OAEP-SHA256 key transport encryption (for fixture building and
/// outbound-capable callers).
pub fn rsa_oaep_encrypt(spki_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_public_key(spki_der)?;
    key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// RSA-OAEP-SHA256 key transport decryption.
pub fn rsa_oaep_decrypt(pkcs8_der: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = rsa_private_key(pkcs8_der)?;
    key.decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed("OAEP decryption failed".to_string()))
}

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// P_SHA1 pseudo-random function from TLS, as used by WS-SecureConversation
/// derived keys. Returns `length` bytes starting at `offset` of the stream.
pub fn p_sha1(secret: &[u8], seed: &[u8], offset: usize, length: usize) -> Vec<u8> {
    let needed = offset + length;
    let mut output = Vec::with_capacity(needed + 20);
    let mut a = hmac_sha1(secret, seed);
    while output.len() < needed {
        let mut block_input = a.clone();
        block_input.extend_from_slice(seed);
        output.extend_from_slice(&hmac_sha1(secret, &block_input));
        a = hmac_sha1(secret, &a);
    }
    output[offset..needed].to_vec()
}

/// HKDF-SHA256 expansion.
pub fn hkdf_sha256(
    secret: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let salt = (!salt.is_empty()).then_some(salt);
    let hk = Hkdf::<Sha256>::new(salt, secret);
    let mut okm = vec![0u8; length];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::DerivationFailed(e.to_string()))?;
    Ok(okm)
}

/// Derive key material from a base secret per the declared algorithm.
///
/// The derivation seed is `label || nonce` for P_SHA1; HKDF uses the nonce
/// as salt and the label as info.
pub fn derive_key(
    algorithm: &str,
    secret: &[u8],
    label: &[u8],
    nonce: &[u8],
    offset: usize,
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    match algorithm {
        algorithms::DK_P_SHA1 => {
            let mut seed = label.to_vec();
            seed.extend_from_slice(nonce);
            Ok(p_sha1(secret, &seed, offset, length))
        }
        algorithms::DK_HKDF_SHA256 => {
            let okm = hkdf_sha256(secret, nonce, label, offset + length)?;
            Ok(okm[offset..].to_vec())
        }
        other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Signature keys
// ---------------------------------------------------------------------------

/// Key material resolved for verifying one signature.
#[derive(Debug, Clone)]
pub enum SignatureKey {
    /// Symmetric secret for HMAC signatures
    Hmac(Vec<u8>),
    /// SPKI DER public key for RSA signatures
    RsaSpki(Vec<u8>),
}

/// Verify a signature value per the declared signature method.
pub fn verify_signature_value(
    algorithm: &str,
    key: &SignatureKey,
    data: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    match (algorithm, key) {
        (algorithms::SIG_HMAC_SHA256, SignatureKey::Hmac(secret)) => {
            let computed = hmac_sha256(secret, data);
            if constant_time_eq(&computed, signature) {
                Ok(())
            } else {
                Err(CryptoError::VerificationFailed(
                    "HMAC value mismatch".to_string(),
                ))
            }
        }
        (algorithms::SIG_RSA_SHA256, SignatureKey::RsaSpki(spki)) => {
            rsa_sha256_verify(spki, data, signature)
        }
        (algorithms::SIG_HMAC_SHA256, _) | (algorithms::SIG_RSA_SHA256, _) => Err(
            CryptoError::VerificationFailed("key type does not match signature method".to_string()),
        ),
        (other, _) => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Keystores and binding resolution
// ---------------------------------------------------------------------------

/// Resolved key material for one named keystore.
#[derive(Debug, Clone, Default)]
pub struct Keystore {
    symmetric_keys: HashMap<String, Vec<u8>>,
    verification_keys: HashMap<String, Vec<u8>>,
    private_keys: HashMap<String, Vec<u8>>,
    trusted_certs: Vec<Vec<u8>>,
}

/// Outcome of evaluating a certificate against a keystore's trust anchors.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// SubjectPublicKeyInfo DER extracted from the certificate
    pub spki_der: Vec<u8>,
    /// Subject distinguished name
    pub subject: String,
    /// Whether the certificate matched or chained to a trust anchor
    pub trusted: bool,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a symmetric key under a token identifier.
    pub fn add_symmetric_key(&mut self, id: impl Into<String>, key: Vec<u8>) {
        self.symmetric_keys.insert(id.into(), key);
    }

    /// Register an SPKI DER verification key under an alias.
    pub fn add_verification_key(&mut self, alias: impl Into<String>, spki_der: Vec<u8>) {
        self.verification_keys.insert(alias.into(), spki_der);
    }

    /// Register a PKCS#8 DER private key under an alias.
    pub fn add_private_key(&mut self, alias: impl Into<String>, pkcs8_der: Vec<u8>) {
        self.private_keys.insert(alias.into(), pkcs8_der);
    }

    /// Register a DER certificate as a trust anchor.
    pub fn add_trusted_cert(&mut self, der: Vec<u8>) {
        self.trusted_certs.push(der);
    }

    pub fn symmetric_key(&self, id: &str) -> Option<&[u8]> {
        self.symmetric_keys.get(id).map(Vec::as_slice)
    }

    pub fn verification_key(&self, alias: &str) -> Option<&[u8]> {
        self.verification_keys.get(alias).map(Vec::as_slice)
    }

    pub fn private_key(&self, alias: &str) -> Option<&[u8]> {
        self.private_keys.get(alias).map(Vec::as_slice)
    }

    /// Any private key, for key-transport decryption when the message does
    /// not name an alias. Deterministic only with a single configured key,
    /// which is the common deployment.
    pub fn any_private_key(&self) -> Option<&[u8]> {
        self.private_keys.values().next().map(Vec::as_slice)
    }

    /// Parse a DER certificate and judge trust against the anchors.
    ///
    /// Trusted when the certificate is byte-identical to an anchor, or its
    /// issuer DN equals an anchor's subject DN.
    pub fn evaluate_certificate(&self, der: &[u8]) -> Result<CertificateInfo, CryptoError> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| CryptoError::InvalidKey(format!("bad certificate: {e}")))?;

        let spki_der = cert.tbs_certificate.subject_pki.raw.to_vec();
        let subject = cert.tbs_certificate.subject.to_string();
        let issuer = cert.tbs_certificate.issuer.to_string();

        let mut trusted = self.trusted_certs.iter().any(|anchor| anchor == der);
        if !trusted {
            for anchor in &self.trusted_certs {
                if let Ok((_, anchor_cert)) = x509_parser::parse_x509_certificate(anchor) {
                    if anchor_cert.tbs_certificate.subject.to_string() == issuer {
                        trusted = true;
                        break;
                    }
                }
            }
        }

        Ok(CertificateInfo {
            spki_der,
            subject,
            trusted,
        })
    }
}

/// Resolved providers for one message exchange, selected once from the
/// policy binding rather than re-branched per header element.
#[derive(Debug, Clone)]
pub enum BindingStrategy {
    /// One shared-secret keystore covers signing and decryption.
    Symmetric { keystore: Keystore },
    /// Separate signature (trust anchors, verification keys) and encryption
    /// (private decryption keys) keystores.
    Asymmetric {
        signature: Keystore,
        encryption: Keystore,
    },
    /// Trust delegated to the channel; no message-level crypto providers.
    Transport,
}

impl BindingStrategy {
    pub fn binding(&self) -> Binding {
        match self {
            Self::Symmetric { .. } => Binding::Symmetric,
            Self::Asymmetric { .. } => Binding::Asymmetric,
            Self::Transport => Binding::Transport,
        }
    }
}

/// Resolves named keystores into per-binding providers.
#[derive(Debug, Clone, Default)]
pub struct CryptoProviderResolver {
    keystores: HashMap<String, Keystore>,
}

impl CryptoProviderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keystore(mut self, name: impl Into<String>, keystore: Keystore) -> Self {
        self.keystores.insert(name.into(), keystore);
        self
    }

    pub fn keystore(&self, name: &str) -> Option<&Keystore> {
        self.keystores.get(name)
    }

    /// Resolve the providers for a binding.
    ///
    /// The symmetric binding uses a single keystore; the asymmetric binding
    /// additionally resolves an encryption-only keystore (falling back to
    /// the signature keystore when none is named).
    pub fn resolve(
        &self,
        binding: Binding,
        signature_keystore: &str,
        encryption_keystore: Option<&str>,
    ) -> Result<BindingStrategy, CryptoError> {
        let lookup = |name: &str| {
            self.keystores
                .get(name)
                .cloned()
                .ok_or_else(|| CryptoError::UnknownKeystore(name.to_string()))
        };

        match binding {
            Binding::Symmetric => Ok(BindingStrategy::Symmetric {
                keystore: lookup(signature_keystore)?,
            }),
            Binding::Asymmetric => {
                let signature = lookup(signature_keystore)?;
                let encryption = match encryption_keystore {
                    Some(name) => lookup(name)?,
                    None => signature.clone(),
                };
                Ok(BindingStrategy::Asymmetric {
                    signature,
                    encryption,
                })
            }
            Binding::Transport => Ok(BindingStrategy::Transport),
        }
    }
}
