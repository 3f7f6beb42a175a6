//! The relying party a virtual authenticator performs ceremonies against.
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::crypto::{compute_sha256, SHA256Hash};
use crate::error::{PasskeyError, Result};

/// Name, ID (effective domain) and origin of a relying party.
///
/// This is immutable once constructed, and is shared read-only by every
/// ceremony. The RP ID hash is computed once here, rather than per ceremony.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelyingParty {
    name: String,
    id: String,
    origin: String,
    #[serde(skip)]
    rp_id_hash: SHA256Hash,
}

impl RelyingParty {
    /// Create a relying party descriptor.
    ///
    /// `origin` must be an absolute URL, and its host must be `id` or a
    /// sub-domain of `id`. Paths and trailing slashes are dropped, so that
    /// `origin` matches what a browser would put in `clientDataJSON`.
    pub fn new(name: &str, id: &str, origin: &str) -> Result<Self> {
        if id.is_empty() {
            error!("relying party id is empty");
            return Err(PasskeyError::InvalidRelyingParty(
                "id must not be empty".to_string(),
            ));
        }

        let url = Url::parse(origin).map_err(|e| {
            error!(?origin, "origin is not a URL: {:?}", e);
            PasskeyError::InvalidRelyingParty(format!("origin {origin:?} is not a URL: {e}"))
        })?;

        let origin = url.origin();
        if !origin.is_tuple() {
            error!(%url, "origin is opaque");
            return Err(PasskeyError::InvalidRelyingParty(format!(
                "origin {url} has no scheme/host/port"
            )));
        }

        let host = url.host_str().unwrap_or_default();
        trace!("effective domain -> {:x?}", host);
        trace!("relying party id -> {:x?}", id);

        if !is_registrable_suffix(host, id) {
            error!("relying party id domain is not a suffix of the effective domain.");
            return Err(PasskeyError::InvalidRelyingParty(format!(
                "{id:?} is not a suffix of {host:?}"
            )));
        }

        Ok(RelyingParty {
            name: name.to_string(),
            id: id.to_string(),
            origin: origin.ascii_serialization(),
            rp_id_hash: compute_sha256(id.as_bytes()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The origin as it appears in `clientDataJSON`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// SHA-256 of the RP ID, the first 32 bytes of every `authenticatorData`.
    pub fn rp_id_hash(&self) -> &SHA256Hash {
        &self.rp_id_hash
    }

    /// Checks that a relying party ID supplied by the server agrees with
    /// this descriptor. An absent ID defaults to ours.
    pub(crate) fn check_rp_id(&self, found: Option<&str>) -> Result<()> {
        match found {
            Some(found) if found != self.id => {
                error!(expected = %self.id, %found, "server relying party id does not match");
                Err(PasskeyError::RelyingPartyMismatch {
                    expected: self.id.clone(),
                    found: found.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn is_registrable_suffix(host: &str, id: &str) -> bool {
    host == id
        || host
            .strip_suffix(id)
            .map(|prefix| prefix.ends_with('.'))
            .unwrap_or(false)
}

#[derive(Deserialize)]
struct RelyingPartyDef {
    name: String,
    id: String,
    origin: String,
}

impl<'de> Deserialize<'de> for RelyingParty {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let def = RelyingPartyDef::deserialize(deserializer)?;
        RelyingParty::new(&def.name, &def.id, &def.origin).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_relying_party() {
        let _ = tracing_subscriber::fmt::try_init();
        let rp = RelyingParty::new("WebAuthn Demo", "localhost", "http://localhost:8080").unwrap();
        assert_eq!(rp.name(), "WebAuthn Demo");
        assert_eq!(rp.id(), "localhost");
        assert_eq!(rp.origin(), "http://localhost:8080");
        assert_eq!(rp.rp_id_hash(), &compute_sha256(b"localhost"));
    }

    #[test]
    fn origin_is_normalised() {
        let rp = RelyingParty::new("x", "example.com", "https://login.example.com/").unwrap();
        assert_eq!(rp.origin(), "https://login.example.com");
        // Default ports are elided, like a browser does.
        let rp = RelyingParty::new("x", "example.com", "https://example.com:443/path").unwrap();
        assert_eq!(rp.origin(), "https://example.com");
    }

    #[test]
    fn rejects_bad_input() {
        let _ = tracing_subscriber::fmt::try_init();
        assert!(matches!(
            RelyingParty::new("x", "", "http://localhost"),
            Err(PasskeyError::InvalidRelyingParty(_))
        ));
        assert!(matches!(
            RelyingParty::new("x", "localhost", "not a url"),
            Err(PasskeyError::InvalidRelyingParty(_))
        ));
        assert!(matches!(
            RelyingParty::new("x", "localhost", "data:text/plain,hello"),
            Err(PasskeyError::InvalidRelyingParty(_))
        ));
        assert!(matches!(
            RelyingParty::new("x", "example.com", "https://example.org"),
            Err(PasskeyError::InvalidRelyingParty(_))
        ));
        // A suffix must fall on a label boundary.
        assert!(matches!(
            RelyingParty::new("x", "example.com", "https://badexample.com"),
            Err(PasskeyError::InvalidRelyingParty(_))
        ));
    }

    #[test]
    fn rp_id_check() {
        let rp = RelyingParty::new("x", "localhost", "http://localhost:8080").unwrap();
        assert!(rp.check_rp_id(None).is_ok());
        assert!(rp.check_rp_id(Some("localhost")).is_ok());
        assert_eq!(
            rp.check_rp_id(Some("example.com")),
            Err(PasskeyError::RelyingPartyMismatch {
                expected: "localhost".to_string(),
                found: "example.com".to_string(),
            })
        );
    }

    #[test]
    fn serde_round_trip_revalidates() {
        let rp = RelyingParty::new("WebAuthn Demo", "localhost", "http://localhost:8080").unwrap();
        let json = serde_json::to_string(&rp).unwrap();
        assert_eq!(
            json,
            r#"{"name":"WebAuthn Demo","id":"localhost","origin":"http://localhost:8080"}"#
        );
        let restored: RelyingParty = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, rp);

        let bad = r#"{"name":"x","id":"example.com","origin":"http://localhost"}"#;
        assert!(serde_json::from_str::<RelyingParty>(bad).is_err());
    }
}
