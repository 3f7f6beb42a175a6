//! Key generation, signing and COSE key encoding for virtual credentials.
use std::collections::BTreeMap;
use std::fmt;

use base64urlsafedata::Base64UrlSafeData;
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
    sha::Sha256,
    sign::Signer,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_cbor_2::Value;

use crate::error::{PasskeyError, Result};

pub type SHA256Hash = [u8; 32];

/// Modulus size for generated RS256 keys. Relying parties commonly reject
/// anything other than a 256 byte `n`.
const RSA_KEY_BITS: u32 = 2048;

// COSE_Key labels, <https://www.iana.org/assignments/cose/cose.xhtml>
const COSE_KTY: i128 = 1;
const COSE_ALG: i128 = 3;
const COSE_CRV_OR_N: i128 = -1;
const COSE_X_OR_E: i128 = -2;
const COSE_Y: i128 = -3;

const KTY_OKP: i128 = 1;
const KTY_EC2: i128 = 2;
const KTY_RSA: i128 = 3;

const CRV_P256: i128 = 1;
const CRV_P384: i128 = 2;
const CRV_ED25519: i128 = 6;

pub fn compute_sha256(data: &[u8]) -> SHA256Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finish()
}

/// The signature algorithms a virtual credential can be minted with.
///
/// Identifiers are the registered COSE algorithm values, which is also what
/// relying parties advertise in `pubKeyCredParams`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum COSEAlgorithm {
    /// ECDSA on P-256 with SHA-256.
    ES256,
    /// ECDSA on P-384 with SHA-384.
    ES384,
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    RS256,
    /// Ed25519.
    EDDSA,
}

impl COSEAlgorithm {
    /// The algorithms a client falls back to when `pubKeyCredParams` is empty.
    pub const WEBAUTHN_DEFAULTS: [COSEAlgorithm; 2] = [COSEAlgorithm::ES256, COSEAlgorithm::RS256];

    /// Picks the first algorithm in `offered` that this crate can generate
    /// keys for. `offered` is in the relying party's order of preference.
    pub fn select(offered: &[i64]) -> Result<COSEAlgorithm> {
        offered
            .iter()
            .find_map(|alg| COSEAlgorithm::try_from(*alg).ok())
            .ok_or_else(|| {
                error!(?offered, "none of the offered algorithms are supported");
                PasskeyError::UnsupportedAlgorithm
            })
    }

    fn curve(self) -> Option<(Nid, i128, usize)> {
        match self {
            COSEAlgorithm::ES256 => Some((Nid::X9_62_PRIME256V1, CRV_P256, 32)),
            COSEAlgorithm::ES384 => Some((Nid::SECP384R1, CRV_P384, 48)),
            COSEAlgorithm::RS256 | COSEAlgorithm::EDDSA => None,
        }
    }

    fn digest(self) -> Option<MessageDigest> {
        match self {
            COSEAlgorithm::ES256 | COSEAlgorithm::RS256 => Some(MessageDigest::sha256()),
            COSEAlgorithm::ES384 => Some(MessageDigest::sha384()),
            // Ed25519 hashes internally.
            COSEAlgorithm::EDDSA => None,
        }
    }
}

impl TryFrom<i64> for COSEAlgorithm {
    type Error = PasskeyError;

    fn try_from(alg: i64) -> Result<Self> {
        match alg {
            -7 => Ok(COSEAlgorithm::ES256),
            -35 => Ok(COSEAlgorithm::ES384),
            -257 => Ok(COSEAlgorithm::RS256),
            -8 => Ok(COSEAlgorithm::EDDSA),
            _ => Err(PasskeyError::UnsupportedAlgorithm),
        }
    }
}

impl From<COSEAlgorithm> for i64 {
    fn from(alg: COSEAlgorithm) -> i64 {
        match alg {
            COSEAlgorithm::ES256 => -7,
            COSEAlgorithm::ES384 => -35,
            COSEAlgorithm::RS256 => -257,
            COSEAlgorithm::EDDSA => -8,
        }
    }
}

impl fmt::Display for COSEAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, i64::from(*self))
    }
}

fn get_group(nid: Nid) -> Result<EcGroup> {
    Ok(EcGroup::from_curve_name(nid)?)
}

/// An asymmetric signing key, bound to the algorithm it was generated for.
///
/// The private half never leaves this type except through [Serialize], which
/// exists so that an authenticator can survive the gap between registration
/// and login.
pub struct KeyPair {
    alg: COSEAlgorithm,
    pkey: PKey<Private>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh key for `alg`. Entropy comes from OpenSSL; if that
    /// fails, the error is returned rather than falling back to anything
    /// weaker.
    pub fn generate(alg: COSEAlgorithm) -> Result<Self> {
        let pkey = match alg {
            COSEAlgorithm::ES256 | COSEAlgorithm::ES384 => {
                let (nid, _, _) = alg.curve().ok_or(PasskeyError::UnsupportedAlgorithm)?;
                let group = get_group(nid)?;
                let eckey = EcKey::generate(&group)?;
                PKey::from_ec_key(eckey)?
            }
            COSEAlgorithm::RS256 => PKey::from_rsa(Rsa::generate(RSA_KEY_BITS)?)?,
            COSEAlgorithm::EDDSA => PKey::generate_ed25519()?,
        };
        trace!(%alg, "generated key pair");
        Ok(KeyPair { alg, pkey })
    }

    /// Restore a key from PKCS#8 DER, checking it really is a key for `alg`.
    pub fn from_pkcs8(alg: COSEAlgorithm, der: &[u8]) -> Result<Self> {
        let pkey = PKey::private_key_from_pkcs8(der)
            .map_err(|e| PasskeyError::InvalidToken(format!("private key: {e}")))?;

        let matches = match alg {
            COSEAlgorithm::ES256 | COSEAlgorithm::ES384 => {
                let expected = alg.curve().map(|(nid, _, _)| nid);
                pkey.id() == Id::EC
                    && pkey
                        .ec_key()
                        .ok()
                        .and_then(|k| k.group().curve_name())
                        == expected
            }
            COSEAlgorithm::RS256 => pkey.id() == Id::RSA,
            COSEAlgorithm::EDDSA => pkey.id() == Id::ED25519,
        };

        if !matches {
            error!(%alg, key_id = ?pkey.id(), "stored key does not match its algorithm");
            return Err(PasskeyError::InvalidToken(format!(
                "private key is not a {alg} key"
            )));
        }

        Ok(KeyPair { alg, pkey })
    }

    pub fn algorithm(&self) -> COSEAlgorithm {
        self.alg
    }

    /// Sign `data` with this key. ECDSA signatures are ASN.1 DER encoded, as
    /// WebAuthn requires.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signature = match self.alg.digest() {
            Some(md) => {
                let mut signer = Signer::new(md, &self.pkey)?;
                signer
                    .update(data)
                    .and_then(|_| signer.sign_to_vec())?
            }
            None => {
                let mut signer = Signer::new_without_digest(&self.pkey)?;
                signer.sign_oneshot_to_vec(data)?
            }
        };
        Ok(signature)
    }

    /// The public key as a COSE_Key map.
    pub fn cose_public_key(&self) -> Result<Value> {
        let mut map = BTreeMap::new();
        map.insert(Value::Integer(COSE_ALG), Value::Integer(i64::from(self.alg).into()));

        match self.alg {
            COSEAlgorithm::ES256 | COSEAlgorithm::ES384 => {
                let (_, crv, coord_len) =
                    self.alg.curve().ok_or(PasskeyError::UnsupportedAlgorithm)?;
                let eckey = self.pkey.ec_key()?;

                let mut ctx = BigNumContext::new()?;
                let mut xbn = BigNum::new()?;
                let mut ybn = BigNum::new()?;
                eckey.public_key().affine_coordinates_gfp(
                    eckey.group(),
                    &mut xbn,
                    &mut ybn,
                    &mut ctx,
                )?;

                // Coordinates are fixed width, left padded with zeros.
                let pad = coord_len as i32;
                map.insert(Value::Integer(COSE_KTY), Value::Integer(KTY_EC2));
                map.insert(Value::Integer(COSE_CRV_OR_N), Value::Integer(crv));
                map.insert(Value::Integer(COSE_X_OR_E), Value::Bytes(xbn.to_vec_padded(pad)?));
                map.insert(Value::Integer(COSE_Y), Value::Bytes(ybn.to_vec_padded(pad)?));
            }
            COSEAlgorithm::RS256 => {
                let rsa = self.pkey.rsa()?;
                let n_len = rsa.size() as i32;
                map.insert(Value::Integer(COSE_KTY), Value::Integer(KTY_RSA));
                map.insert(
                    Value::Integer(COSE_CRV_OR_N),
                    Value::Bytes(rsa.n().to_vec_padded(n_len)?),
                );
                map.insert(Value::Integer(COSE_X_OR_E), Value::Bytes(rsa.e().to_vec()));
            }
            COSEAlgorithm::EDDSA => {
                map.insert(Value::Integer(COSE_KTY), Value::Integer(KTY_OKP));
                map.insert(Value::Integer(COSE_CRV_OR_N), Value::Integer(CRV_ED25519));
                map.insert(
                    Value::Integer(COSE_X_OR_E),
                    Value::Bytes(self.pkey.raw_public_key()?),
                );
            }
        }

        Ok(Value::Map(map))
    }

    /// The public key as DER `SubjectPublicKeyInfo`.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.pkey.public_key_to_der()?)
    }

    /// The CBOR encoding of [KeyPair::cose_public_key], as embedded in
    /// attested credential data.
    pub fn cose_public_key_bytes(&self) -> Result<Vec<u8>> {
        let cose = self.cose_public_key()?;
        serde_cbor_2::to_vec(&cose).map_err(|e| {
            error!("PK CBOR -> {:x?}", e);
            PasskeyError::Cbor
        })
    }
}

#[derive(Serialize, Deserialize)]
struct KeyPairDef {
    alg: COSEAlgorithm,
    pkcs8: Base64UrlSafeData,
}

impl Serialize for KeyPair {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let der = self
            .pkey
            .private_key_to_pkcs8()
            .map_err(serde::ser::Error::custom)?;
        KeyPairDef {
            alg: self.alg,
            pkcs8: der.into(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let def = KeyPairDef::deserialize(deserializer)?;
        let der: &[u8] = def.pkcs8.as_ref();
        KeyPair::from_pkcs8(def.alg, der).map_err(serde::de::Error::custom)
    }
}

/// Rebuilds a public key from a COSE_Key map and checks `signature` over
/// `data`. This deliberately shares nothing with the encoding side, so that
/// tests check the wire format rather than the code that produced it.
#[cfg(test)]
pub(crate) fn verify_with_cose_key(cose: &Value, data: &[u8], signature: &[u8]) -> bool {
    use openssl::{ec::EcPoint, pkey::Public, sign::Verifier};

    let Value::Map(m) = cose else {
        return false;
    };
    let int = |k: i128| match m.get(&Value::Integer(k)) {
        Some(Value::Integer(i)) => Some(*i),
        _ => None,
    };
    let bytes = |k: i128| match m.get(&Value::Integer(k)) {
        Some(Value::Bytes(b)) => Some(b.clone()),
        _ => None,
    };

    let (pkey, md): (PKey<Public>, Option<MessageDigest>) = match (int(COSE_KTY), int(COSE_ALG)) {
        (Some(KTY_EC2), Some(alg)) => {
            let (nid, md) = match (int(COSE_CRV_OR_N), alg) {
                (Some(CRV_P256), -7) => (Nid::X9_62_PRIME256V1, MessageDigest::sha256()),
                (Some(CRV_P384), -35) => (Nid::SECP384R1, MessageDigest::sha384()),
                _ => return false,
            };
            let (Some(x), Some(y)) = (bytes(COSE_X_OR_E), bytes(COSE_Y)) else {
                return false;
            };
            let group = EcGroup::from_curve_name(nid).expect("group");
            let mut ctx = BigNumContext::new().expect("ctx");
            // SEC1 uncompressed point: 0x04 || x || y
            let sec1: Vec<u8> = std::iter::once(0x04).chain(x).chain(y).collect();
            let Ok(point) = EcPoint::from_bytes(&group, &sec1, &mut ctx) else {
                return false;
            };
            let eckey = EcKey::from_public_key(&group, &point).expect("eckey");
            (PKey::from_ec_key(eckey).expect("pkey"), Some(md))
        }
        (Some(KTY_RSA), Some(-257)) => {
            let (Some(n), Some(e)) = (bytes(COSE_CRV_OR_N), bytes(COSE_X_OR_E)) else {
                return false;
            };
            let rsa = Rsa::from_public_components(
                BigNum::from_slice(&n).expect("n"),
                BigNum::from_slice(&e).expect("e"),
            )
            .expect("rsa");
            (PKey::from_rsa(rsa).expect("pkey"), Some(MessageDigest::sha256()))
        }
        (Some(KTY_OKP), Some(-8)) => {
            let Some(x) = bytes(COSE_X_OR_E) else {
                return false;
            };
            (
                PKey::public_key_from_raw_bytes(&x, Id::ED25519).expect("pkey"),
                None,
            )
        }
        _ => return false,
    };

    match md {
        Some(md) => {
            let mut verifier = Verifier::new(md, &pkey).expect("verifier");
            verifier.update(data).expect("update");
            verifier.verify(signature).unwrap_or(false)
        }
        None => {
            let mut verifier = Verifier::new_without_digest(&pkey).expect("verifier");
            verifier.verify_oneshot(signature, data).unwrap_or(false)
        }
    }
}
