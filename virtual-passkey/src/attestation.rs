//! Registration: turns creation options into an attestation response.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_cbor_2::Value;

use crate::authenticator::VirtualAuthenticator;
use crate::authenticator_data::{AttestedCredentialData, AuthenticatorData};
use crate::client_data::creation_to_clientdata;
use crate::error::{PasskeyError, Result};
use crate::proto::{
    to_json, AuthenticatorAttestationResponseRaw, ClientExtensionResults,
    PublicKeyCredentialCreationOptions, RegisterPublicKeyCredential, UserVerificationPolicy,
};
use crate::relying_party::RelyingParty;

/// Attestation statement format of generated attestation objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationFormat {
    /// `fmt: "none"` with an empty statement.
    #[default]
    None,
    /// Self attestation: `attStmt` carries a signature by the credential key
    /// itself, and no certificate chain.
    Packed,
}

impl AttestationFormat {
    fn as_str(self) -> &'static str {
        match self {
            AttestationFormat::None => "none",
            AttestationFormat::Packed => "packed",
        }
    }
}

/// Builds registration responses. Holds no per-ceremony state, so one
/// builder may be shared freely.
#[derive(Debug, Clone, Default)]
pub struct AttestationBuilder {
    format: AttestationFormat,
}

impl AttestationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(format: AttestationFormat) -> Self {
        AttestationBuilder { format }
    }

    pub fn format(&self) -> AttestationFormat {
        self.format
    }

    /// Build the JSON body for the relying party's registration finish
    /// endpoint from its creation options JSON.
    pub fn build(
        &self,
        rp: &RelyingParty,
        auth: &mut VirtualAuthenticator,
        options_json: &str,
    ) -> Result<String> {
        let credential = self.build_credential(rp, auth, options_json)?;
        to_json(&credential)
    }

    /// As [Self::build], returning the response unserialised.
    ///
    /// On success the authenticator is bound to `rp`, which fixes its
    /// algorithm. A credential that is already bound is refused. On any error it is left as it was, apart from a possible
    /// key regeneration during algorithm negotiation.
    pub fn build_credential(
        &self,
        rp: &RelyingParty,
        auth: &mut VirtualAuthenticator,
        options_json: &str,
    ) -> Result<RegisterPublicKeyCredential> {
        let options = PublicKeyCredentialCreationOptions::from_json(options_json)?;
        trace!(?options);

        rp.check_rp_id(options.rp.id.as_deref())?;

        if let Some(registered) = auth.rp_id() {
            error!(
                credential_id = %auth.credential_id_b64(),
                registered,
                "credential is already registered"
            );
            return Err(PasskeyError::AlreadyRegistered(registered.to_string()));
        }

        if options.excludes(auth.credential_id()) {
            warn!(credential_id = %auth.credential_id_b64(), "credential is in excludeCredentials");
            return Err(PasskeyError::CredentialExcluded);
        }

        if options.user_verification() == UserVerificationPolicy::Required
            && !auth.options().user_verified
        {
            error!("user verification required, but this authenticator does not verify");
            return Err(PasskeyError::UserVerificationRequired);
        }

        let alg = auth.negotiate_algorithm(&options.offered_algorithms())?;

        let client_data = creation_to_clientdata(options.challenge.as_ref(), rp.origin())?;

        let credential_public_key = auth.key().cose_public_key_bytes()?;
        let auth_data = AuthenticatorData {
            rp_id_hash: *rp.rp_id_hash(),
            flags: auth.flags(true),
            sign_count: auth.sign_count(),
            attested_credential_data: Some(AttestedCredentialData {
                aaguid: auth.options().aaguid,
                credential_id: auth.credential_id().to_vec(),
                credential_public_key,
            }),
        }
        .to_bytes()?;

        let mut att_stmt = BTreeMap::new();
        if self.format == AttestationFormat::Packed {
            let verification_data: Vec<u8> = auth_data
                .iter()
                .chain(client_data.hash.iter())
                .copied()
                .collect();
            let signature = auth.key().sign(&verification_data)?;
            att_stmt.insert(
                Value::Text("alg".to_string()),
                Value::Integer(i64::from(alg).into()),
            );
            att_stmt.insert(Value::Text("sig".to_string()), Value::Bytes(signature));
        }

        let mut attest_map = BTreeMap::new();
        attest_map.insert(
            Value::Text("fmt".to_string()),
            Value::Text(self.format.as_str().to_string()),
        );
        attest_map.insert(Value::Text("attStmt".to_string()), Value::Map(att_stmt));
        attest_map.insert(
            Value::Text("authData".to_string()),
            Value::Bytes(auth_data),
        );

        let ao_bytes = serde_cbor_2::to_vec(&Value::Map(attest_map)).map_err(|e| {
            error!("AO CBOR -> {:x?}", e);
            PasskeyError::Cbor
        })?;

        let public_key = auth.key().public_key_der()?;

        // Nothing can fail from here on.
        auth.mark_attested(rp.id());
        debug!(
            credential_id = %auth.credential_id_b64(),
            %alg,
            fmt = self.format.as_str(),
            "built attestation"
        );

        Ok(RegisterPublicKeyCredential {
            id: auth.credential_id_b64(),
            raw_id: auth.credential_id().to_vec().into(),
            type_: "public-key".to_string(),
            response: AuthenticatorAttestationResponseRaw {
                client_data_json: client_data.json.into(),
                attestation_object: ao_bytes.into(),
                transports: vec!["internal".to_string()],
                public_key: Some(public_key.into()),
                public_key_algorithm: Some(alg.into()),
            },
            authenticator_attachment: "platform".to_string(),
            extensions: ClientExtensionResults::default(),
        })
    }
}

/// Decodes an attestation object and returns `(fmt, attStmt, authData)`.
#[cfg(test)]
pub(crate) fn decode_attestation_object(ao: &[u8]) -> (String, BTreeMap<Value, Value>, Vec<u8>) {
    let Value::Map(mut m) = serde_cbor_2::from_slice::<Value>(ao).unwrap() else {
        panic!("attestation object is not a map");
    };
    let (
        Some(Value::Text(fmt)),
        Some(Value::Map(att_stmt)),
        Some(Value::Bytes(auth_data)),
    ) = (
        m.remove(&Value::Text("fmt".to_string())),
        m.remove(&Value::Text("attStmt".to_string())),
        m.remove(&Value::Text("authData".to_string())),
    )
    else {
        panic!("attestation object is missing members");
    };
    assert!(m.is_empty());
    (fmt, att_stmt, auth_data)
}

/// The COSE public key embedded in a registration response.
#[cfg(test)]
pub(crate) fn attested_public_key(credential: &RegisterPublicKeyCredential) -> Value {
    let (_, _, auth_data) =
        decode_attestation_object(credential.response.attestation_object.as_ref());
    let cred_id_len = u16::from_be_bytes([auth_data[53], auth_data[54]]) as usize;
    serde_cbor_2::from_slice(&auth_data[55 + cred_id_len..]).unwrap()
}
