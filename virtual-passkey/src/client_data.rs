//! `clientDataJSON` construction and hashing.
use serde::Serialize;

use crate::crypto::{compute_sha256, SHA256Hash};
use crate::error::{PasskeyError, Result};
use crate::BASE64_ENGINE;
use base64::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClientDataType {
    #[serde(rename = "webauthn.create")]
    Create,
    #[serde(rename = "webauthn.get")]
    Get,
}

/// The client data a browser collects and the authenticator signs over.
///
/// Field order is the one browsers emit: `type`, `challenge`, `origin`.
/// <https://www.w3.org/TR/webauthn-2/#dictdef-collectedclientdata>
#[derive(Debug, Clone, Serialize)]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub type_: ClientDataType,
    /// base64url (unpadded) of the challenge bytes.
    pub challenge: String,
    pub origin: String,
    #[serde(rename = "crossOrigin", skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<bool>,
}

impl CollectedClientData {
    pub fn new(type_: ClientDataType, challenge: &[u8], origin: &str) -> Self {
        CollectedClientData {
            type_,
            challenge: BASE64_ENGINE.encode(challenge),
            origin: origin.to_string(),
            cross_origin: None,
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            error!("client data JSON -> {:?}", e);
            PasskeyError::Json
        })
    }
}

/// Serialised client data and its hash. The hash must be taken over exactly
/// the bytes that are sent to the relying party.
pub(crate) struct ClientDataHashed {
    pub json: Vec<u8>,
    pub hash: SHA256Hash,
}

pub(crate) fn creation_to_clientdata(challenge: &[u8], origin: &str) -> Result<ClientDataHashed> {
    hashed(CollectedClientData::new(ClientDataType::Create, challenge, origin))
}

pub(crate) fn get_to_clientdata(challenge: &[u8], origin: &str) -> Result<ClientDataHashed> {
    hashed(CollectedClientData::new(ClientDataType::Get, challenge, origin))
}

fn hashed(client_data: CollectedClientData) -> Result<ClientDataHashed> {
    let json = client_data.to_json_bytes()?;
    let hash = compute_sha256(&json);
    Ok(ClientDataHashed { json, hash })
}
