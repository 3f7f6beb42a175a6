//! JSON protocol structs exchanged with the relying party.
//!
//! Options types are lenient: they accept what common relying party
//! libraries emit (wrapped in `{"publicKey": ...}` or not), and ignore
//! members this crate has no use for. Response types serialise to the shape
//! a browser's `PublicKeyCredential.toJSON()` produces.

use base64urlsafedata::Base64UrlSafeData;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::crypto::COSEAlgorithm;
use crate::error::{PasskeyError, Result};

/// Defines the User Authenticator Verification policy.
/// <https://w3c.github.io/webauthn/#enumdef-userverificationrequirement>
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationPolicy {
    Required,
    #[default]
    Preferred,
    Discouraged,
    /// Values added by later revisions are treated as "preferred".
    #[serde(other)]
    Unknown,
}

/// Relying Party Entity. `id` may be absent, in which case the client uses
/// the effective domain.
#[derive(Debug, Serialize, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelyingPartyEntity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

/// User Entity
#[derive(Debug, Serialize, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: Base64UrlSafeData,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Public key cryptographic parameters
#[derive(Debug, Serialize, Clone, Deserialize)]
pub struct PubKeyCredParams {
    #[serde(rename = "type")]
    pub type_: String,
    /// The algorithm in use defined by COSE.
    pub alg: i64,
}

/// <https://www.w3.org/TR/webauthn/#dictdef-publickeycredentialdescriptor>
#[derive(Debug, Serialize, Clone, Deserialize)]
pub struct PublicKeyCredentialDescriptor {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: Base64UrlSafeData,
    /// Hint only, never enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

impl PublicKeyCredentialDescriptor {
    fn matches(&self, credential_id: &[u8]) -> bool {
        let id: &[u8] = self.id.as_ref();
        self.type_ == "public-key" && id == credential_id
    }
}

/// <https://www.w3.org/TR/webauthn/#dictdef-authenticatorselectioncriteria>
#[derive(Debug, Serialize, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    #[serde(default)]
    pub authenticator_attachment: Option<String>,
    #[serde(default)]
    pub resident_key: Option<String>,
    #[serde(default)]
    pub require_resident_key: Option<bool>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_verification: UserVerificationPolicy,
}

/// <https://w3c.github.io/webauthn/#dictionary-makecredentialoptions>
#[derive(Debug, Serialize, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialCreationOptions {
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    /// The one-time challenge for the credential to sign.
    pub challenge: Base64UrlSafeData,
    /// The set of cryptographic types allowed by this server.
    pub pub_key_cred_params: Vec<PubKeyCredParams>,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub attestation: Option<String>,
    #[serde(default)]
    pub exclude_credentials: Option<Vec<PublicKeyCredentialDescriptor>>,
    #[serde(default)]
    pub authenticator_selection: Option<AuthenticatorSelectionCriteria>,
}

impl PublicKeyCredentialCreationOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        from_server_json(json)
    }

    /// COSE algorithm identifiers offered for `public-key` credentials, in
    /// the server's order of preference. An empty `pubKeyCredParams` means
    /// the WebAuthn defaults.
    pub fn offered_algorithms(&self) -> Vec<i64> {
        if self.pub_key_cred_params.is_empty() {
            return COSEAlgorithm::WEBAUTHN_DEFAULTS
                .iter()
                .map(|alg| i64::from(*alg))
                .collect();
        }
        self.pub_key_cred_params
            .iter()
            .filter(|param| param.type_ == "public-key")
            .map(|param| param.alg)
            .collect()
    }

    pub fn excludes(&self, credential_id: &[u8]) -> bool {
        self.exclude_credentials
            .iter()
            .flatten()
            .any(|d| d.matches(credential_id))
    }

    pub fn user_verification(&self) -> UserVerificationPolicy {
        self.authenticator_selection
            .as_ref()
            .map(|s| s.user_verification)
            .unwrap_or_default()
    }
}

/// The requested options for the authentication
#[derive(Debug, Serialize, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialRequestOptions {
    pub challenge: Base64UrlSafeData,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub rp_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_verification: UserVerificationPolicy,
}

impl PublicKeyCredentialRequestOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        from_server_json(json)
    }

    /// An empty allow list means any credential scoped to the RP may answer.
    pub fn allows(&self, credential_id: &[u8]) -> bool {
        self.allow_credentials.is_empty()
            || self
                .allow_credentials
                .iter()
                .any(|d| d.matches(credential_id))
    }
}

/// Reads an explicit `null` the same as an absent member.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses an options payload, unwrapping `{"publicKey": ...}` if present.
fn from_server_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    let mut value: serde_json::Value = serde_json::from_str(json).map_err(|e| {
        error!("server options are not JSON -> {:?}", e);
        PasskeyError::MalformedServerOptions(e.to_string())
    })?;

    if let Some(inner) = value.get_mut("publicKey") {
        value = inner.take();
    }

    if !value.is_object() {
        error!("server options are not a JSON object");
        return Err(PasskeyError::MalformedServerOptions(
            "expected a JSON object".to_string(),
        ));
    }

    serde_json::from_value(value).map_err(|e| {
        error!("server options -> {:?}", e);
        PasskeyError::MalformedServerOptions(e.to_string())
    })
}

/// Client extension outputs. Nothing is ever requested of the virtual
/// authenticator, so this is always empty.
#[derive(Debug, Serialize, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ClientExtensionResults {}

/// <https://w3c.github.io/webauthn/#authenticatorattestationresponse>
#[derive(Debug, Serialize, Clone, Deserialize)]
pub struct AuthenticatorAttestationResponseRaw {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlSafeData,
    #[serde(rename = "attestationObject")]
    pub attestation_object: Base64UrlSafeData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
    /// DER `SubjectPublicKeyInfo`, as `getPublicKey()` returns it.
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Base64UrlSafeData>,
    #[serde(
        rename = "publicKeyAlgorithm",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_key_algorithm: Option<i64>,
}

/// A client response to a registration challenge.
/// <https://w3c.github.io/webauthn/#iface-pkcredential>
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterPublicKeyCredential {
    /// base64url of `raw_id`.
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: Base64UrlSafeData,
    #[serde(rename = "type")]
    pub type_: String,
    pub response: AuthenticatorAttestationResponseRaw,
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: String,
    #[serde(rename = "clientExtensionResults", default)]
    pub extensions: ClientExtensionResults,
}

/// <https://w3c.github.io/webauthn/#authenticatorassertionresponse>
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthenticatorAssertionResponseRaw {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlSafeData,
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: Base64UrlSafeData,
    pub signature: Base64UrlSafeData,
    #[serde(rename = "userHandle", skip_serializing_if = "Option::is_none", default)]
    pub user_handle: Option<Base64UrlSafeData>,
}

/// A client response to an authentication challenge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublicKeyCredential {
    pub id: String,
    #[serde(rename = "rawId")]
    pub raw_id: Base64UrlSafeData,
    #[serde(rename = "type")]
    pub type_: String,
    pub response: AuthenticatorAssertionResponseRaw,
    #[serde(rename = "authenticatorAttachment")]
    pub authenticator_attachment: String,
    #[serde(rename = "clientExtensionResults", default)]
    pub extensions: ClientExtensionResults,
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        error!("response JSON -> {:?}", e);
        PasskeyError::Json
    })
}
