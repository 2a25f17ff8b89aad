//! Inbound WS-Security processing for SOAP endpoints.
//!
//! Verifies a message's security header and checks the verified operations
//! against a resolved security policy before the message reaches
//! application logic.
//!
//! # Features
//!
//! - Security-header processing in strict document order (timestamp,
//!   username token, signature, encrypted key/data, derived key token,
//!   SAML assertion, signature confirmation)
//! - Decrypt-then-verify ordering: decrypted plaintext replaces ciphertext
//!   in the working document before later signatures are checked
//! - Policy validation: binding, required tokens, signed/encrypted
//!   coverage, header layout, timestamp freshness, algorithm suite
//! - Symmetric (shared secret), asymmetric (certificate trust), and
//!   transport bindings, selected once per configuration
//! - Concurrency-safe token store for session secrets and nonce replay
//!   caching
//! - XXE prevention and depth limits on untrusted documents
//! - SOAP Fault body rendering for rejected messages
//!
//! # Example
//!
//! ```ignore
//! use wsse_engine::{SecurityEngine, SecurityPolicy, TokenStoreResolver, TokenStore};
//!
//! let engine = SecurityEngine::new(&config, policy)?;
//! let resolver = TokenStoreResolver::new(session_store);
//! match engine.process_inbound(&raw_message, &resolver) {
//!     Ok(outcome) => handle(outcome.document, outcome.principal),
//!     Err(fault) => reject(fault),
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod document;
pub mod engine;
pub mod error;
pub mod header;
pub mod policy;
pub mod processor;
pub mod resolver;
pub mod results;
pub mod store;
pub mod validator;

pub use config::{EngineConfig, ProcessingConfig, UnknownElementPolicy};
pub use engine::{fault_response, InboundOutcome, SecurityEngine};
pub use error::{
    PolicyViolation, PolicyViolationCode, ProcessingError, SecurityFault, SoapFaultVersion,
};
pub use policy::{AlgorithmSuite, Binding, Layout, PartsRequirement, SecurityPolicy};
pub use processor::SecurityHeaderProcessor;
pub use resolver::{CredentialClaim, CredentialResolver, ResolveError, Secret, TokenStoreResolver};
pub use results::{ResultKind, ResultSequence, ResultSubject, SecurityResult};
pub use store::{TokenEntry, TokenStore};
pub use validator::PolicyValidator;
