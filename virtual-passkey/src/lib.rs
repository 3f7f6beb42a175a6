//! virtual-passkey is a virtual WebAuthn authenticator, for load testing
//! relying parties that use passkeys.
//!
//! It performs the actions that would be taken by both a browser and a
//! platform authenticator: given the JSON options a relying party issues at
//! the start of a registration or login ceremony, it builds the response
//! JSON a real browser would send back, so that a load generator can drive
//! the relying party's WebAuthn endpoints at volume.
//!
//! There is no user, no device and no UI. User presence is always asserted,
//! and user verification and backup state are static
//! [options](crate::authenticator::AuthenticatorOptions).
//!
//! **This is for testing only.** Private keys live in process memory, and
//! can be exported in the clear with
//! [VirtualAuthenticator::to_token](crate::authenticator::VirtualAuthenticator::to_token).
//!
//! ## Usage
//!
//! The [passkeys] module has a small function-based surface which mirrors
//! what a load test script needs. For more control, use
//! [AttestationBuilder](crate::attestation::AttestationBuilder) and
//! [AssertionBuilder](crate::assertion::AssertionBuilder) directly.
//!
//! ## Supported algorithms
//!
//! * ES256 (P-256)
//! * ES384 (P-384)
//! * RS256 (2048 bit RSA)
//! * EdDSA (Ed25519)

// #![deny(warnings)]
#![warn(unused_extern_crates)]
// #![warn(missing_docs)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
// #![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

pub(crate) use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_ENGINE;

pub mod assertion;
pub mod attestation;
pub mod authenticator;
pub mod authenticator_data;
pub mod client_data;
pub mod crypto;
pub mod error;
pub mod passkeys;
pub mod proto;
pub mod relying_party;

pub mod prelude {
    pub use crate::assertion::AssertionBuilder;
    pub use crate::attestation::{AttestationBuilder, AttestationFormat};
    pub use crate::authenticator::{
        AuthenticatorOptions, VirtualAuthenticator, ICLOUD_KEYCHAIN_AAGUID,
    };
    pub use crate::crypto::COSEAlgorithm;
    pub use crate::error::{PasskeyError, Result};
    pub use crate::proto::{PublicKeyCredential, RegisterPublicKeyCredential};
    pub use crate::relying_party::RelyingParty;
}
