//! Free functions for driving ceremonies from a load test script.
//!
//! A script typically creates one [RelyingParty] up front, then per virtual
//! user:
//!
//! ```no_run
//! # fn main() -> virtual_passkey::error::Result<()> {
//! # let (creation_options, request_options) = (String::new(), String::new());
//! use virtual_passkey::passkeys::*;
//!
//! let rp = new_relying_party("WebAuthn Demo", "localhost", "http://localhost:8080")?;
//! let mut credential = new_credential()?;
//!
//! // POST this to the registration finish endpoint.
//! let _attestation = create_attestation_response(&rp, &mut credential, &creation_options)?;
//! // ... and later, this to the login finish endpoint.
//! let _assertion = create_assertion_response(&rp, &mut credential, "alice", &request_options)?;
//! # Ok(())
//! # }
//! ```
use crate::assertion::AssertionBuilder;
use crate::attestation::AttestationBuilder;
use crate::authenticator::{AuthenticatorOptions, VirtualAuthenticator};
use crate::crypto::COSEAlgorithm;
use crate::error::Result;
use crate::relying_party::RelyingParty;

pub fn new_relying_party(name: &str, id: &str, origin: &str) -> Result<RelyingParty> {
    RelyingParty::new(name, id, origin)
}

/// A fresh ES256 credential with default options.
pub fn new_credential() -> Result<VirtualAuthenticator> {
    VirtualAuthenticator::new()
}

pub fn new_credential_with(
    alg: COSEAlgorithm,
    options: AuthenticatorOptions,
) -> Result<VirtualAuthenticator> {
    VirtualAuthenticator::with_options(alg, options)
}

/// Registration response JSON for `options_json`, with `"none"` attestation.
pub fn create_attestation_response(
    rp: &RelyingParty,
    credential: &mut VirtualAuthenticator,
    options_json: &str,
) -> Result<String> {
    AttestationBuilder::new().build(rp, credential, options_json)
}

/// Login response JSON for `options_json`.
pub fn create_assertion_response(
    rp: &RelyingParty,
    credential: &mut VirtualAuthenticator,
    username: &str,
    options_json: &str,
) -> Result<String> {
    AssertionBuilder::new().build(rp, credential, username, options_json)
}
