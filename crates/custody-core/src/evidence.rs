//! Evidence tokens: portable, signed attestations of a document's content.
//!
//! A token is an EdDSA-signed JWT whose claims are the canonical JSON of an
//! [`EvidencePayload`], carried byte for byte. The header names the signing
//! key (`kid`), so tokens stay verifiable after the key is rotated out of
//! active use. Tokens never expire.
//!
//! Signing and verification are capabilities ([`EvidenceSigner`],
//! [`EvidenceVerifier`]). [`KeyRing`] is the in-process implementation;
//! a key-management service can stand behind the same traits.

use std::sync::RwLock;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, KeyAlgorithm, OctetKeyPairParameters,
    OctetKeyPairType, PublicKeyUse,
};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

pub use jsonwebtoken::jwk::{Jwk, JwkSet};

use crate::canonical::to_canonical_bytes;
use crate::crypto::{Ed25519PublicKey, Keypair};
use crate::error::SigningError;
use crate::types::{ContentHash, DocumentId};

/// What a document's evidence token attests to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidencePayload {
    pub document_id: DocumentId,
    pub content_hash: ContentHash,
    pub timestamp: DateTime<Utc>,
}

impl EvidencePayload {
    pub fn new(document_id: DocumentId, content_hash: ContentHash, timestamp: DateTime<Utc>) -> Self {
        Self {
            document_id,
            content_hash,
            timestamp,
        }
    }

    /// The exact bytes handed to the signer.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, SigningError> {
        Ok(to_canonical_bytes(self)?)
    }

    /// Decode a payload recovered from a token.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        serde_json::from_slice(bytes).map_err(|e| SigningError::Payload(e.to_string()))
    }
}

/// A freshly issued token and the key that signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub token: String,
    pub key_id: String,
}

/// Turns canonical payload bytes into a signed token.
#[async_trait]
pub trait EvidenceSigner: Send + Sync {
    /// Sign `payload`, a JSON document. Deterministic for a given key and payload.
    async fn sign(&self, payload: &[u8]) -> Result<SignedToken, SigningError>;
}

/// Validates tokens against the currently published key set.
#[async_trait]
pub trait EvidenceVerifier: Send + Sync {
    /// Verify `token` and return the payload bytes it carries.
    async fn verify(&self, token: &str) -> Result<Vec<u8>, SigningError>;

    /// The key set tokens are checked against.
    async fn key_set(&self) -> Result<JwkSet, SigningError>;

    /// Verify a document evidence token and decode its payload.
    async fn verify_evidence(&self, token: &str) -> Result<EvidencePayload, SigningError> {
        let bytes = self.verify(token).await?;
        EvidencePayload::from_bytes(&bytes)
    }
}

/// Published form of an Ed25519 verification key.
fn to_jwk(pk: &Ed25519PublicKey) -> Jwk {
    Jwk {
        common: CommonParameters {
            public_key_use: Some(PublicKeyUse::Signature),
            key_algorithm: Some(KeyAlgorithm::EdDSA),
            key_id: Some(pk.key_id()),
            ..Default::default()
        },
        algorithm: AlgorithmParameters::OctetKeyPair(OctetKeyPairParameters {
            key_type: OctetKeyPairType::OctetKeyPair,
            curve: EllipticCurve::Ed25519,
            x: URL_SAFE_NO_PAD.encode(pk.as_bytes()),
        }),
    }
}

/// Accept only Ed25519 keys that carry a `kid`.
fn check_jwk(jwk: &Jwk) -> Result<(), SigningError> {
    if jwk.common.key_id.is_none() {
        return Err(SigningError::MalformedToken("published key has no kid".into()));
    }
    let AlgorithmParameters::OctetKeyPair(params) = &jwk.algorithm else {
        return Err(SigningError::MalformedToken("published key is not an octet key pair".into()));
    };
    if params.curve != EllipticCurve::Ed25519 {
        return Err(SigningError::MalformedToken(format!(
            "unsupported curve {:?}",
            params.curve
        )));
    }
    let x = URL_SAFE_NO_PAD
        .decode(&params.x)
        .map_err(|e| SigningError::MalformedToken(e.to_string()))?;
    if x.len() != 32 {
        return Err(SigningError::MalformedToken("public key must be 32 bytes".into()));
    }
    Ok(())
}

fn kid_of(jwk: &Jwk) -> Option<&str> {
    jwk.common.key_id.as_deref()
}

fn token_error(e: jsonwebtoken::errors::Error) -> SigningError {
    match e.kind() {
        ErrorKind::InvalidSignature => SigningError::SignatureInvalid,
        ErrorKind::InvalidEddsaKey | ErrorKind::InvalidKeyFormat => {
            SigningError::KeyUnavailable(e.to_string())
        }
        _ => SigningError::MalformedToken(e.to_string()),
    }
}

/// No expiry or audience: evidence is checked against the key set only.
fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation
}

struct KeyRingInner {
    active: Option<Keypair>,
    /// Every key a token may legitimately name, active one included.
    published: Vec<Jwk>,
}

/// In-process signer/verifier with rotation.
///
/// Rotating installs a new active key and keeps the previous public key
/// published, so tokens issued before rotation still verify. Retiring a key
/// removes it from the published set; its tokens then fail with
/// [`SigningError::UnknownKey`].
pub struct KeyRing {
    inner: RwLock<KeyRingInner>,
}

impl KeyRing {
    /// A ring that signs with `keypair`.
    pub fn new(keypair: Keypair) -> Self {
        let jwk = to_jwk(&keypair.public_key());
        Self {
            inner: RwLock::new(KeyRingInner {
                active: Some(keypair),
                published: vec![jwk],
            }),
        }
    }

    /// A verify-only ring built from a published key set.
    pub fn from_key_set(set: &JwkSet) -> Result<Self, SigningError> {
        for jwk in &set.keys {
            check_jwk(jwk)?;
        }
        Ok(Self {
            inner: RwLock::new(KeyRingInner {
                active: None,
                published: set.keys.clone(),
            }),
        })
    }

    /// Make `keypair` the signing key, keeping older keys verifiable.
    pub fn rotate(&self, keypair: Keypair) -> Result<(), SigningError> {
        let mut inner = self.write()?;
        let jwk = to_jwk(&keypair.public_key());
        if !inner.published.iter().any(|k| kid_of(k) == kid_of(&jwk)) {
            inner.published.push(jwk);
        }
        inner.active = Some(keypair);
        Ok(())
    }

    /// Stop accepting tokens signed by `key_id`.
    ///
    /// Retiring the active key also stops signing until the next rotation.
    pub fn retire(&self, key_id: &str) -> Result<(), SigningError> {
        let mut inner = self.write()?;
        inner.published.retain(|k| kid_of(k) != Some(key_id));
        if inner
            .active
            .as_ref()
            .is_some_and(|kp| kp.public_key().key_id() == key_id)
        {
            inner.active = None;
        }
        Ok(())
    }

    /// Identifier of the current signing key, if any.
    pub fn active_key_id(&self) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.active.as_ref().map(|kp| kp.public_key().key_id()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, KeyRingInner>, SigningError> {
        self.inner
            .write()
            .map_err(|_| SigningError::KeyUnavailable("key ring lock poisoned".into()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, KeyRingInner>, SigningError> {
        self.inner
            .read()
            .map_err(|_| SigningError::KeyUnavailable("key ring lock poisoned".into()))
    }

    fn sign_now(&self, payload: &[u8]) -> Result<SignedToken, SigningError> {
        let claims = std::str::from_utf8(payload)
            .map_err(|e| SigningError::Payload(e.to_string()))
            .and_then(|text| {
                RawValue::from_string(text.to_owned())
                    .map_err(|e| SigningError::Payload(e.to_string()))
            })?;

        let inner = self.read()?;
        let keypair = inner
            .active
            .as_ref()
            .ok_or_else(|| SigningError::KeyUnavailable("no active signing key".into()))?;
        let key_id = keypair.public_key().key_id();
        let key = EncodingKey::from_ed_der(&keypair.to_pkcs8_der()?);

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(key_id.clone());
        let token = encode(&header, &claims, &key).map_err(token_error)?;

        Ok(SignedToken { token, key_id })
    }

    fn verify_now(&self, token: &str) -> Result<Vec<u8>, SigningError> {
        let header = decode_header(token).map_err(token_error)?;
        if header.alg != Algorithm::EdDSA {
            return Err(SigningError::MalformedToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| SigningError::MalformedToken("token has no kid".into()))?;

        let key = {
            let inner = self.read()?;
            let jwk = inner
                .published
                .iter()
                .find(|k| kid_of(k) == Some(kid.as_str()))
                .ok_or_else(|| SigningError::UnknownKey(kid.clone()))?;
            DecodingKey::from_jwk(jwk).map_err(token_error)?
        };

        let data = decode::<Box<RawValue>>(token, &key, &validation()).map_err(token_error)?;
        Ok(data.claims.get().as_bytes().to_vec())
    }
}

#[async_trait]
impl EvidenceSigner for KeyRing {
    async fn sign(&self, payload: &[u8]) -> Result<SignedToken, SigningError> {
        self.sign_now(payload)
    }
}

#[async_trait]
impl EvidenceVerifier for KeyRing {
    async fn verify(&self, token: &str) -> Result<Vec<u8>, SigningError> {
        self.verify_now(token)
    }

    async fn key_set(&self) -> Result<JwkSet, SigningError> {
        let inner = self.read()?;
        Ok(JwkSet {
            keys: inner.published.clone(),
        })
    }
}
