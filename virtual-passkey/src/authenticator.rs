//! A single software credential and the authenticator state around it.
use base64::Engine;
use base64urlsafedata::Base64UrlSafeData;
use openssl::rand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authenticator_data::AuthenticatorFlags;
use crate::crypto::{COSEAlgorithm, KeyPair};
use crate::error::{PasskeyError, Result};
use crate::BASE64_ENGINE;

/// The AAGUID Apple's iCloud Keychain reports for synced passkeys.
pub const ICLOUD_KEYCHAIN_AAGUID: Uuid = uuid::uuid!("fbfc3007-154e-4ecc-8c0b-6e020557d7bd");

const MIN_CREDENTIAL_ID_LEN: usize = 16;
const MAX_CREDENTIAL_ID_LEN: usize = 1023;

/// Static policy for what a [VirtualAuthenticator] reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorOptions {
    pub aaguid: Uuid,
    /// Report the UV flag. There is no real user, so this is a claim only.
    pub user_verified: bool,
    pub backup_eligible: bool,
    /// Only reported when `backup_eligible` is also set.
    pub backup_state: bool,
    /// Length of generated credential ids, clamped to 16..=1023.
    pub credential_id_len: usize,
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        AuthenticatorOptions {
            aaguid: Uuid::nil(),
            user_verified: true,
            backup_eligible: false,
            backup_state: false,
            credential_id_len: 32,
        }
    }
}

impl AuthenticatorOptions {
    /// Looks like a synced passkey from iCloud Keychain.
    pub fn icloud_keychain() -> Self {
        AuthenticatorOptions::default()
            .with_aaguid(ICLOUD_KEYCHAIN_AAGUID)
            .with_backup_state(true)
    }

    pub fn with_aaguid(mut self, aaguid: Uuid) -> Self {
        self.aaguid = aaguid;
        self
    }

    pub fn with_user_verified(mut self, user_verified: bool) -> Self {
        self.user_verified = user_verified;
        self
    }

    pub fn with_backup_eligible(mut self, backup_eligible: bool) -> Self {
        self.backup_eligible = backup_eligible;
        if !backup_eligible {
            self.backup_state = false;
        }
        self
    }

    /// A backed up credential is implicitly backup eligible.
    pub fn with_backup_state(mut self, backup_state: bool) -> Self {
        self.backup_state = backup_state;
        if backup_state {
            self.backup_eligible = true;
        }
        self
    }

    pub fn with_credential_id_len(mut self, len: usize) -> Self {
        self.credential_id_len = len;
        self
    }

    fn clamped_credential_id_len(&self) -> usize {
        self.credential_id_len
            .clamp(MIN_CREDENTIAL_ID_LEN, MAX_CREDENTIAL_ID_LEN)
    }
}

/// A virtual authenticator holding exactly one credential.
///
/// The key pair is generated on construction, but only becomes bound to a
/// relying party once an attestation has been built with it. Until then,
/// the key may be replaced to satisfy the relying party's algorithm
/// preferences.
///
/// This is `Send`, so separate instances can be driven from separate
/// threads. It is deliberately not `Clone`: two copies would reuse the
/// signature counter.
#[derive(Debug, Serialize, Deserialize)]
#[serde(try_from = "AuthenticatorState")]
pub struct VirtualAuthenticator {
    credential_id: Base64UrlSafeData,
    key: KeyPair,
    sign_count: u32,
    options: AuthenticatorOptions,
    rp_id: Option<String>,
}

/// The unchecked serialised form of a [VirtualAuthenticator].
#[derive(Deserialize)]
struct AuthenticatorState {
    credential_id: Base64UrlSafeData,
    key: KeyPair,
    sign_count: u32,
    options: AuthenticatorOptions,
    #[serde(default)]
    rp_id: Option<String>,
}

impl TryFrom<AuthenticatorState> for VirtualAuthenticator {
    type Error = PasskeyError;

    fn try_from(state: AuthenticatorState) -> Result<Self> {
        let credential_id: &[u8] = state.credential_id.as_ref();
        let len = credential_id.len();
        if !(MIN_CREDENTIAL_ID_LEN..=MAX_CREDENTIAL_ID_LEN).contains(&len) {
            error!(len, "stored credential id has an invalid length");
            return Err(PasskeyError::InvalidToken(format!(
                "credential id length {len} out of range"
            )));
        }

        Ok(VirtualAuthenticator {
            credential_id: state.credential_id,
            key: state.key,
            sign_count: state.sign_count,
            options: state.options,
            rp_id: state.rp_id,
        })
    }
}

impl VirtualAuthenticator {
    /// An ES256 authenticator with default options.
    pub fn new() -> Result<Self> {
        Self::with_algorithm(COSEAlgorithm::ES256)
    }

    pub fn with_algorithm(alg: COSEAlgorithm) -> Result<Self> {
        Self::with_options(alg, AuthenticatorOptions::default())
    }

    pub fn with_options(alg: COSEAlgorithm, options: AuthenticatorOptions) -> Result<Self> {
        let mut credential_id = vec![0; options.clamped_credential_id_len()];
        rand::rand_bytes(credential_id.as_mut_slice())?;
        let key = KeyPair::generate(alg)?;

        let auth = VirtualAuthenticator {
            credential_id: credential_id.into(),
            key,
            sign_count: 0,
            options,
            rp_id: None,
        };
        debug!(credential_id = %auth.credential_id_b64(), %alg, "created virtual authenticator");
        Ok(auth)
    }

    pub fn credential_id(&self) -> &[u8] {
        self.credential_id.as_ref()
    }

    /// The credential id as it appears in the `id` member of a response.
    pub fn credential_id_b64(&self) -> String {
        BASE64_ENGINE.encode(self.credential_id())
    }

    pub fn algorithm(&self) -> COSEAlgorithm {
        self.key.algorithm()
    }

    /// The last signature counter value reported to the relying party.
    pub fn sign_count(&self) -> u32 {
        self.sign_count
    }

    pub fn options(&self) -> &AuthenticatorOptions {
        &self.options
    }

    /// Whether this credential has been registered with a relying party.
    pub fn is_attested(&self) -> bool {
        self.rp_id.is_some()
    }

    /// The RP ID this credential was registered with. Assertions are only
    /// produced for that relying party.
    pub fn rp_id(&self) -> Option<&str> {
        self.rp_id.as_deref()
    }

    pub(crate) fn key(&self) -> &KeyPair {
        &self.key
    }

    /// Flags for the next `authenticatorData`. UP is always reported.
    pub fn flags(&self, attested_data: bool) -> AuthenticatorFlags {
        let mut flags = AuthenticatorFlags::USER_PRESENT;
        flags.set(
            AuthenticatorFlags::USER_VERIFIED,
            self.options.user_verified,
        );
        flags.set(
            AuthenticatorFlags::BACKUP_ELIGIBLE,
            self.options.backup_eligible,
        );
        flags.set(
            AuthenticatorFlags::BACKUP_STATE,
            self.options.backup_eligible && self.options.backup_state,
        );
        flags.set(AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA, attested_data);
        flags
    }

    /// Settles on a signature algorithm from the relying party's offer.
    ///
    /// The current key is kept if its algorithm is offered. Otherwise an
    /// unregistered credential gets a new key for the first offered
    /// algorithm we support. A registered credential cannot change its key.
    pub fn negotiate_algorithm(&mut self, offered: &[i64]) -> Result<COSEAlgorithm> {
        let current = self.key.algorithm();
        if offered.contains(&i64::from(current)) {
            trace!(%current, "keeping current algorithm");
            return Ok(current);
        }

        if self.is_attested() {
            error!(%current, ?offered, "attested credential algorithm is not offered");
            return Err(PasskeyError::UnsupportedAlgorithm);
        }

        let alg = COSEAlgorithm::select(offered)?;
        debug!(from = %current, to = %alg, "regenerating key for negotiated algorithm");
        self.key = KeyPair::generate(alg)?;
        Ok(alg)
    }

    /// The counter value the next assertion will report. Nothing changes
    /// until [Self::commit_sign_count] is called.
    pub(crate) fn next_sign_count(&self) -> Result<u32> {
        self.sign_count.checked_add(1).ok_or_else(|| {
            error!("signature counter would overflow");
            PasskeyError::CounterExhausted
        })
    }

    pub(crate) fn commit_sign_count(&mut self, count: u32) {
        trace!(from = self.sign_count, to = count, "committing signature counter");
        self.sign_count = count;
    }

    pub(crate) fn mark_attested(&mut self, rp_id: &str) {
        debug!(credential_id = %self.credential_id_b64(), rp_id, "credential registered");
        self.rp_id = Some(rp_id.to_string());
    }

    /// Serialise this authenticator, private key included, to a JSON token.
    pub fn to_token(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            error!("VirtualAuthenticator.to_token: {:?}", e);
            PasskeyError::Json
        })
    }

    pub fn from_token(token: &str) -> Result<Self> {
        serde_json::from_str(token).map_err(|e| {
            error!("VirtualAuthenticator::from_token: {:?}", e);
            PasskeyError::InvalidToken(e.to_string())
        })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        serde_cbor_2::to_vec(self).map_err(|e| {
            error!("VirtualAuthenticator.to_cbor: {:?}", e);
            PasskeyError::Cbor
        })
    }

    pub fn from_cbor(v: &[u8]) -> Result<Self> {
        serde_cbor_2::from_slice(v).map_err(|e| {
            error!("VirtualAuthenticator::from_cbor: {:?}", e);
            PasskeyError::InvalidToken(e.to_string())
        })
    }
}
