//! Binary `authenticatorData` encoding.
//!
//! Reference: <https://www.w3.org/TR/webauthn-2/#sctn-authenticator-data>
use bitflags::bitflags;
use uuid::Uuid;

use crate::crypto::SHA256Hash;
use crate::error::{PasskeyError, Result};

bitflags! {
    /// Flags byte of `authenticatorData`.
    #[derive(Default)]
    pub struct AuthenticatorFlags: u8 {
        const USER_PRESENT = 0x01;
        const USER_VERIFIED = 0x04;
        const BACKUP_ELIGIBLE = 0x08;
        const BACKUP_STATE = 0x10;
        const ATTESTED_CREDENTIAL_DATA = 0x40;
        const EXTENSION_DATA = 0x80;
    }
}

/// <https://www.w3.org/TR/webauthn-2/#sctn-attested-credential-data>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: Uuid,
    pub credential_id: Vec<u8>,
    /// CBOR encoded COSE_Key.
    pub credential_public_key: Vec<u8>,
}

impl AttestedCredentialData {
    fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        let cred_id_len: u16 = u16::try_from(self.credential_id.len()).map_err(|e| {
            error!("credential id len is not u16 -> {:x?}", e);
            PasskeyError::Cbor
        })?;

        out.extend_from_slice(self.aaguid.as_bytes());
        out.extend_from_slice(&cred_id_len.to_be_bytes());
        out.extend_from_slice(&self.credential_id);
        out.extend_from_slice(&self.credential_public_key);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: SHA256Hash,
    pub flags: AuthenticatorFlags,
    pub sign_count: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    /// `rpIdHash || flags || signCount || [attestedCredentialData]`
    ///
    /// The AT flag is derived from whether attested credential data is
    /// present, so the two can never disagree.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut flags = self.flags;
        flags.set(
            AuthenticatorFlags::ATTESTED_CREDENTIAL_DATA,
            self.attested_credential_data.is_some(),
        );
        // We never emit extension outputs.
        flags.remove(AuthenticatorFlags::EXTENSION_DATA);

        let mut out = Vec::with_capacity(37);
        out.extend_from_slice(&self.rp_id_hash);
        out.push(flags.bits());
        out.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(acd) = &self.attested_credential_data {
            acd.write(&mut out)?;
        }
        Ok(out)
    }
}
