//! Login: turns request options into an assertion response.
use crate::authenticator::VirtualAuthenticator;
use crate::authenticator_data::AuthenticatorData;
use crate::client_data::get_to_clientdata;
use crate::error::{PasskeyError, Result};
use crate::proto::{
    to_json, AuthenticatorAssertionResponseRaw, ClientExtensionResults, PublicKeyCredential,
    PublicKeyCredentialRequestOptions, UserVerificationPolicy,
};
use crate::relying_party::RelyingParty;

/// Builds authentication responses. Stateless; all state lives in the
/// [VirtualAuthenticator].
#[derive(Debug, Clone, Default)]
pub struct AssertionBuilder {}

impl AssertionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the JSON body for the relying party's login finish endpoint.
    ///
    /// `username` becomes the `userHandle` of the response, and is omitted
    /// when empty.
    pub fn build(
        &self,
        rp: &RelyingParty,
        auth: &mut VirtualAuthenticator,
        username: &str,
        options_json: &str,
    ) -> Result<String> {
        let credential = self.build_credential(rp, auth, username, options_json)?;
        to_json(&credential)
    }

    /// As [Self::build], returning the response unserialised. The signature
    /// counter only advances if this succeeds.
    pub fn build_credential(
        &self,
        rp: &RelyingParty,
        auth: &mut VirtualAuthenticator,
        username: &str,
        options_json: &str,
    ) -> Result<PublicKeyCredential> {
        let options = PublicKeyCredentialRequestOptions::from_json(options_json)?;
        trace!(?options);

        match auth.rp_id() {
            None => {
                error!(credential_id = %auth.credential_id_b64(), "credential was never registered");
                return Err(PasskeyError::UnknownCredential);
            }
            Some(registered) if registered != rp.id() => {
                error!(
                    credential_id = %auth.credential_id_b64(),
                    registered,
                    rp_id = rp.id(),
                    "credential is registered with another relying party"
                );
                return Err(PasskeyError::UnknownCredential);
            }
            Some(_) => {}
        }

        if !options.allows(auth.credential_id()) {
            error!(credential_id = %auth.credential_id_b64(), "Credential ID not found in allowCredentials");
            return Err(PasskeyError::UnknownCredential);
        }

        rp.check_rp_id(options.rp_id.as_deref())?;

        if options.user_verification == UserVerificationPolicy::Required
            && !auth.options().user_verified
        {
            error!("user verification required, but this authenticator does not verify");
            return Err(PasskeyError::UserVerificationRequired);
        }

        let client_data = get_to_clientdata(options.challenge.as_ref(), rp.origin())?;

        let counter = auth.next_sign_count()?;
        let auth_data = AuthenticatorData {
            rp_id_hash: *rp.rp_id_hash(),
            flags: auth.flags(false),
            sign_count: counter,
            attested_credential_data: None,
        }
        .to_bytes()?;

        let verification_data: Vec<u8> = auth_data
            .iter()
            .chain(client_data.hash.iter())
            .copied()
            .collect();
        let signature = auth.key().sign(&verification_data)?;

        auth.commit_sign_count(counter);
        debug!(
            credential_id = %auth.credential_id_b64(),
            alg = %auth.algorithm(),
            counter,
            "built assertion"
        );

        let user_handle = if username.is_empty() {
            None
        } else {
            Some(username.as_bytes().to_vec().into())
        };

        Ok(PublicKeyCredential {
            id: auth.credential_id_b64(),
            raw_id: auth.credential_id().to_vec().into(),
            type_: "public-key".to_string(),
            response: AuthenticatorAssertionResponseRaw {
                client_data_json: client_data.json.into(),
                authenticator_data: auth_data.into(),
                signature: signature.into(),
                user_handle,
            },
            authenticator_attachment: "platform".to_string(),
            extensions: ClientExtensionResults::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{attested_public_key, AttestationBuilder};
    use crate::authenticator::AuthenticatorOptions;
    use crate::crypto::{compute_sha256, verify_with_cose_key, COSEAlgorithm};
    use crate::BASE64_ENGINE;
    use base64::Engine;
    use serde_cbor_2::Value;

    const CREATION: &str = r#"{"publicKey": {
        "rp": {"name": "WebAuthn Demo", "id": "localhost"},
        "user": {"name": "alice", "displayName": "alice", "id": "YWxpY2U"},
        "challenge": "cmVnaXN0ZXI",
        "pubKeyCredParams": [
            {"type": "public-key", "alg": -7},
            {"type": "public-key", "alg": -35},
            {"type": "public-key", "alg": -257},
            {"type": "public-key", "alg": -8}
        ]
    }}"#;

    fn demo_rp() -> RelyingParty {
        RelyingParty::new("WebAuthn Demo", "localhost", "http://localhost:8080").unwrap()
    }

    fn register(rp: &RelyingParty, alg: COSEAlgorithm) -> (VirtualAuthenticator, Value) {
        let mut auth = VirtualAuthenticator::with_algorithm(alg).unwrap();
        let credential = AttestationBuilder::new()
            .build_credential(rp, &mut auth, CREATION)
            .unwrap();
        assert_eq!(auth.algorithm(), alg);
        (auth, attested_public_key(&credential))
    }

    fn request_json(challenge: &[u8], allow: &[&[u8]]) -> String {
        let allow: Vec<String> = allow
            .iter()
            .map(|id| {
                format!(
                    r#"{{"type": "public-key", "id": "{}"}}"#,
                    BASE64_ENGINE.encode(id)
                )
            })
            .collect();
        format!(
            r#"{{"publicKey": {{
                "challenge": "{}",
                "timeout": 300000,
                "rpId": "localhost",
                "allowCredentials": [{}],
                "userVerification": "preferred"
            }}}}"#,
            BASE64_ENGINE.encode(challenge),
            allow.join(", ")
        )
    }

    fn check_signature(cose: &Value, credential: &PublicKeyCredential) -> bool {
        let client_data_hash = compute_sha256(credential.response.client_data_json.as_ref());
        let auth_data: &[u8] = credential.response.authenticator_data.as_ref();
        let signed: Vec<u8> = auth_data
            .iter()
            .chain(client_data_hash.iter())
            .copied()
            .collect();
        verify_with_cose_key(cose, &signed, credential.response.signature.as_ref())
    }

    #[test]
    fn demo_login() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        let (mut auth, cose) = register(&rp, COSEAlgorithm::ES256);

        let request = request_json(b"challenge", &[auth.credential_id()]);
        let json = AssertionBuilder::new()
            .build(&rp, &mut auth, "alice", &request)
            .unwrap();

        let body: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(body["type"], "public-key");
        assert_eq!(body["id"], auth.credential_id_b64());
        assert_eq!(body["response"]["userHandle"], "YWxpY2U");
        assert_eq!(body["clientExtensionResults"], serde_json::json!({}));

        let credential: PublicKeyCredential = serde_json::from_str(&json).unwrap();
        let client_data_json: &[u8] = credential.response.client_data_json.as_ref();
        assert_eq!(
            client_data_json,
            br#"{"type":"webauthn.get","challenge":"Y2hhbGxlbmdl","origin":"http://localhost:8080"}"#
        );

        let auth_data: &[u8] = credential.response.authenticator_data.as_ref();
        assert_eq!(auth_data.len(), 37);
        assert_eq!(&auth_data[..32], &compute_sha256(b"localhost"));
        assert_eq!(auth_data[32], 0x05);
        assert_eq!(&auth_data[33..37], &[0, 0, 0, 1]);
        assert!(check_signature(&cose, &credential));
    }

    #[test]
    fn counter_advances_by_one() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        let (mut auth, cose) = register(&rp, COSEAlgorithm::ES256);
        let builder = AssertionBuilder::new();

        for n in 1..=5u32 {
            let credential = builder
                .build_credential(&rp, &mut auth, "alice", &request_json(b"c", &[]))
                .unwrap();
            let auth_data: &[u8] = credential.response.authenticator_data.as_ref();
            assert_eq!(&auth_data[33..37], &n.to_be_bytes());
            assert_eq!(auth.sign_count(), n);
            assert!(check_signature(&cose, &credential));
        }
    }

    #[test]
    fn every_algorithm_verifies() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        for alg in [
            COSEAlgorithm::ES256,
            COSEAlgorithm::ES384,
            COSEAlgorithm::RS256,
            COSEAlgorithm::EDDSA,
        ] {
            let (mut auth, cose) = register(&rp, alg);
            for challenge in [&b"first"[..], &[0u8; 64][..], &[0xfb, 0xff][..]] {
                let credential = AssertionBuilder::new()
                    .build_credential(&rp, &mut auth, "alice", &request_json(challenge, &[]))
                    .unwrap();
                assert!(check_signature(&cose, &credential), "{alg}");
            }
        }
    }

    #[test]
    fn unknown_credentials() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        let builder = AssertionBuilder::new();

        let mut fresh = VirtualAuthenticator::new().unwrap();
        assert_eq!(
            builder
                .build(&rp, &mut fresh, "alice", &request_json(b"c", &[]))
                .unwrap_err(),
            PasskeyError::UnknownCredential
        );

        let (mut auth, _) = register(&rp, COSEAlgorithm::ES256);
        assert_eq!(
            builder
                .build(&rp, &mut auth, "alice", &request_json(b"c", &[&[1u8; 32][..]]))
                .unwrap_err(),
            PasskeyError::UnknownCredential
        );
        // The credential may appear anywhere in the list.
        let id = auth.credential_id().to_vec();
        assert!(builder
            .build(&rp, &mut auth, "alice", &request_json(b"c", &[&[1u8; 32][..], &id[..]]))
            .is_ok());
        assert_eq!(auth.sign_count(), 1);
    }

    #[test]
    fn scoped_to_registering_rp() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp_a = RelyingParty::new("A", "a.example", "https://a.example").unwrap();
        let rp_b = RelyingParty::new("B", "b.example", "https://b.example").unwrap();
        let mut auth = VirtualAuthenticator::new().unwrap();
        let creation = CREATION.replace(r#""id": "localhost""#, r#""id": "a.example""#);
        AttestationBuilder::new()
            .build(&rp_a, &mut auth, &creation)
            .unwrap();

        let bare = r#"{"challenge":"Y2hhbGxlbmdl"}"#;
        assert_eq!(
            AssertionBuilder::new().build(&rp_b, &mut auth, "alice", bare),
            Err(PasskeyError::UnknownCredential)
        );
        assert_eq!(auth.sign_count(), 0);

        let restored = auth.to_token().unwrap();
        let mut restored = VirtualAuthenticator::from_token(&restored).unwrap();
        assert_eq!(
            AssertionBuilder::new().build(&rp_b, &mut restored, "alice", bare),
            Err(PasskeyError::UnknownCredential)
        );
        assert!(AssertionBuilder::new()
            .build(&rp_a, &mut restored, "alice", bare)
            .is_ok());
        assert_eq!(restored.sign_count(), 1);
    }

    #[test]
    fn null_optional_members() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        let (mut auth, cose) = register(&rp, COSEAlgorithm::ES256);
        let request = r#"{"challenge":"Y2hhbGxlbmdl","rpId":"localhost","allowCredentials":null,"userVerification":null}"#;
        let credential = AssertionBuilder::new()
            .build_credential(&rp, &mut auth, "alice", request)
            .unwrap();
        assert!(check_signature(&cose, &credential));
        assert_eq!(auth.sign_count(), 1);
    }

    #[test]
    fn failures_leave_counter_alone() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        let (mut auth, _) = register(&rp, COSEAlgorithm::ES256);
        let builder = AssertionBuilder::new();

        let other_rp = request_json(b"c", &[]).replace("\"localhost\"", "\"example.com\"");
        assert!(matches!(
            builder.build(&rp, &mut auth, "alice", &other_rp),
            Err(PasskeyError::RelyingPartyMismatch { .. })
        ));
        assert!(matches!(
            builder.build(&rp, &mut auth, "alice", r#"{"publicKey": {"rpId": "localhost"}}"#),
            Err(PasskeyError::MalformedServerOptions(_))
        ));
        assert_eq!(auth.sign_count(), 0);
    }

    #[test]
    fn user_handle_and_verification() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        let mut auth = VirtualAuthenticator::with_options(
            COSEAlgorithm::ES256,
            AuthenticatorOptions::default().with_user_verified(false),
        )
        .unwrap();
        AttestationBuilder::new()
            .build_credential(&rp, &mut auth, CREATION)
            .unwrap();

        let credential = AssertionBuilder::new()
            .build_credential(&rp, &mut auth, "", &request_json(b"c", &[]))
            .unwrap();
        assert!(credential.response.user_handle.is_none());
        let auth_data: &[u8] = credential.response.authenticator_data.as_ref();
        assert_eq!(auth_data[32], 0x01);

        let json = AssertionBuilder::new()
            .build(&rp, &mut auth, "", &request_json(b"c", &[]))
            .unwrap();
        assert!(!json.contains("userHandle"));

        let required = request_json(b"c", &[]).replace("preferred", "required");
        assert_eq!(
            AssertionBuilder::new()
                .build(&rp, &mut auth, "alice", &required)
                .unwrap_err(),
            PasskeyError::UserVerificationRequired
        );
        assert_eq!(auth.sign_count(), 2);
    }

    #[test]
    fn survives_token_round_trip() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = demo_rp();
        let (mut auth, cose) = register(&rp, COSEAlgorithm::RS256);
        AssertionBuilder::new()
            .build_credential(&rp, &mut auth, "alice", &request_json(b"c", &[]))
            .unwrap();

        let token = auth.to_token().unwrap();
        drop(auth);
        let mut restored = VirtualAuthenticator::from_token(&token).unwrap();
        let id = restored.credential_id().to_vec();

        let credential = AssertionBuilder::new()
            .build_credential(&rp, &mut restored, "alice", &request_json(b"c", &[&id[..]]))
            .unwrap();
        let auth_data: &[u8] = credential.response.authenticator_data.as_ref();
        assert_eq!(&auth_data[33..37], &[0, 0, 0, 2]);
        assert!(check_signature(&cose, &credential));
    }
}
