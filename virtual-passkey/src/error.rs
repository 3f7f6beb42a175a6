//! Error types for virtual authenticator ceremonies.

pub type Result<T> = std::result::Result<T, PasskeyError>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PasskeyError {
    /// The server's options payload was missing a required field, or a field
    /// could not be decoded.
    #[error("malformed server options: {0}")]
    MalformedServerOptions(String),
    /// None of the algorithms in `pubKeyCredParams` are supported, or an
    /// attested credential's algorithm is no longer offered.
    #[error("no mutually supported signature algorithm")]
    UnsupportedAlgorithm,
    /// An assertion was requested for a credential that was never attested,
    /// that belongs to another relying party, or that the server did not
    /// list in `allowCredentials`.
    #[error("unknown credential")]
    UnknownCredential,
    /// The relying party descriptor could not be constructed.
    #[error("invalid relying party: {0}")]
    InvalidRelyingParty(String),
    /// The server asked for a ceremony against a different relying party ID.
    #[error("relying party id mismatch: expected {expected:?}, found {found:?}")]
    RelyingPartyMismatch { expected: String, found: String },
    /// The credential was already registered, possibly with another relying
    /// party. A virtual authenticator holds exactly one registration.
    #[error("credential is already registered with {0:?}")]
    AlreadyRegistered(String),
    /// The credential is listed in `excludeCredentials`.
    #[error("credential is excluded by the relying party")]
    CredentialExcluded,
    /// User verification was required, but this authenticator is configured
    /// not to report it.
    #[error("user verification required but not available")]
    UserVerificationRequired,
    /// The signature counter cannot be incremented any further.
    #[error("signature counter exhausted")]
    CounterExhausted,
    /// A serialized authenticator token could not be restored.
    #[error("invalid authenticator token: {0}")]
    InvalidToken(String),
    #[error("JSON serialisation failed")]
    Json,
    #[error("CBOR serialisation failed")]
    Cbor,
    #[error("OpenSSL error: {0}")]
    OpenSSL(String),
}

impl PasskeyError {
    /// Ceremony construction is deterministic for a given input, so no
    /// failure is worth retrying with the same payload.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl From<openssl::error::ErrorStack> for PasskeyError {
    fn from(v: openssl::error::ErrorStack) -> Self {
        Self::OpenSSL(v.to_string())
    }
}
