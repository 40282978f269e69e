//! Error types for the custody core.

use thiserror::Error;

/// Errors raised while parsing or encoding documents.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input was not valid JSON.
    #[error("parse error: {0}")]
    Parse(String),

    /// A value could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A hex-encoded hash had the wrong shape.
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    /// A document identifier could not be parsed.
    #[error("invalid document id: {0}")]
    InvalidDocumentId(String),
}

/// Errors from the evidence signer and verifier.
#[derive(Debug, Error)]
pub enum SigningError {
    /// No signing key is available (key service down, ring empty).
    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),

    /// The token names a key that is not in the published key set.
    #[error("unknown key id: {0}")]
    UnknownKey(String),

    /// The token is not a well-formed EdDSA JWT.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The signature does not validate against the key set.
    #[error("signature invalid")]
    SignatureInvalid,

    /// The recovered payload could not be decoded.
    #[error("payload error: {0}")]
    Payload(String),
}

impl From<CoreError> for SigningError {
    fn from(e: CoreError) -> Self {
        SigningError::Payload(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
