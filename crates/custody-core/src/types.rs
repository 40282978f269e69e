//! Strong type definitions for custody.
//!
//! All identifiers are newtypes to prevent misuse at compile time. A
//! [`ContentHash`] and a [`ChainHash`] are both 32-byte SHA-256 digests, but
//! they are never interchangeable.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::crypto::sha256;
use crate::error::CoreError;

/// Identifier of a stored document.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CoreError::InvalidDocumentId(e.to_string()))
    }
}

fn decode_digest(s: &str) -> Result<[u8; 32], CoreError> {
    let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHash(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::InvalidHash(format!("expected 32 bytes, got {}", s.len() / 2)))
}

/// SHA-256 of a document's canonical content. The idempotency key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hash the given content.
    pub fn compute(content: &[u8]) -> Self {
        Self(sha256(content))
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding, as stored and as fed into the chain.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_digest(s).map(Self)
    }
}

/// A ledger chain value.
///
/// `hash = SHA256(previous_hex || content_hex)` when there is a predecessor,
/// `SHA256(content_hex)` for the very first entry. Both operands are the
/// lowercase hex encodings, concatenated as ASCII.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainHash(pub [u8; 32]);

impl ChainHash {
    /// Compute the chain value linking `content` onto `previous`.
    pub fn link(previous: Option<&ChainHash>, content: &ContentHash) -> Self {
        let mut input = Vec::with_capacity(128);
        if let Some(prev) = previous {
            input.extend_from_slice(prev.to_hex().as_bytes());
        }
        input.extend_from_slice(content.to_hex().as_bytes());
        Self(sha256(&input))
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        decode_digest(s).map(Self)
    }
}

macro_rules! hex_digest_impls {
    ($ty:ident, $label:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl AsRef<[u8]> for $ty {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(de::Error::custom)
            }
        }
    };
}

hex_digest_impls!(ContentHash, "ContentHash");
hex_digest_impls!(ChainHash, "ChainHash");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_hex_roundtrip() {
        let hash = ContentHash::compute(b"ticket");
        let recovered = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);
    }

    #[test]
    fn test_genesis_link_is_hash_of_content_hex() {
        let content = ContentHash::compute(b"first document");
        let genesis = ChainHash::link(None, &content);
        assert_eq!(genesis.0, sha256(content.to_hex().as_bytes()));
    }

    #[test]
    fn test_link_concatenates_previous_then_content() {
        let content = ContentHash::compute(b"second document");
        let prev = ChainHash::from_bytes([0x11; 32]);
        let linked = ChainHash::link(Some(&prev), &content);

        let expected = sha256(format!("{}{}", prev.to_hex(), content.to_hex()).as_bytes());
        assert_eq!(linked.0, expected);
        assert_ne!(linked, ChainHash::link(None, &content));
    }

    #[test]
    fn test_hash_serializes_as_hex_string() {
        let hash = ContentHash::from_bytes([0xab; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_rejects_short_hex() {
        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ChainHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_document_id_parse() {
        let id = DocumentId::new();
        let parsed: DocumentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<DocumentId>().is_err());
    }
}
