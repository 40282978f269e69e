//! Golden vectors for canonical JSON and the ledger chain.
//!
//! Any implementation that reads or audits a custody ledger must reproduce
//! these bytes and digests exactly.

use custody_core::{canonicalize, ChainHash, ContentHash};

/// One canonicalization case.
#[derive(Debug, Clone)]
pub struct CanonicalVector {
    pub name: &'static str,
    /// Input JSON, in any formatting.
    pub input: &'static str,
    /// Expected canonical encoding.
    pub canonical: &'static str,
    /// Expected SHA-256 of `canonical`, lowercase hex.
    pub content_hash: &'static str,
}

/// One link of a reference chain.
#[derive(Debug, Clone)]
pub struct ChainVector {
    /// Stored content.
    pub content: &'static [u8],
    pub content_hash: &'static str,
    /// Expected chain value after appending this content.
    pub chain_hash: &'static str,
}

pub fn canonical_vectors() -> Vec<CanonicalVector> {
    vec![
        CanonicalVector {
            name: "keys sorted",
            input: r#"{"b": 2, "a": 1}"#,
            canonical: r#"{"a":1,"b":2}"#,
            content_hash: "43258cff783fe7036d8a43033f830adfc60ec037382473548ac742b888292777",
        },
        CanonicalVector {
            name: "integral float collapsed",
            input: r#"{"total": 10.0, "qty": 2}"#,
            canonical: r#"{"qty":2,"total":10}"#,
            content_hash: "cb494a0813616c63c6fe832a4848836a18f8e95b312c175cf29a52887e07aa8c",
        },
        CanonicalVector {
            name: "null member dropped, null element kept",
            input: r#"{"a": null, "b": [null, 1]}"#,
            canonical: r#"{"b":[null,1]}"#,
            content_hash: "8d49a295ccf40f78f357007424ec50df7a1b5f2dd7a0696257a8da2263bdd09b",
        },
        CanonicalVector {
            name: "nested objects and non-ascii",
            input: "{\n  \"z\": {\"y\": \"\u{e9}\", \"x\": 0.5},\n  \"a\": []\n}",
            canonical: "{\"a\":[],\"z\":{\"x\":0.5,\"y\":\"\u{e9}\"}}",
            content_hash: "15d0725ac75040e19d8ff5e0ba74892493f7ef29cae7fd268f445f2ecf71c883",
        },
        CanonicalVector {
            name: "point-of-sale ticket body",
            input: r#"{
                "lines": [
                    {"sku": "CAFE-01", "qty": 2, "unit_price": 1.80},
                    {"sku": "CROIS-02", "qty": 1, "unit_price": 2.10, "discount": null}
                ],
                "total": 5.70
            }"#,
            canonical: r#"{"lines":[{"qty":2,"sku":"CAFE-01","unit_price":1.8},{"qty":1,"sku":"CROIS-02","unit_price":2.1}],"total":5.7}"#,
            content_hash: "d4eca32ad657c5f8620d7a836c949bb4bb94ef22e149277932ae7a844797e2be",
        },
    ]
}

/// A three-entry chain starting from an empty ledger.
pub fn chain_vectors() -> Vec<ChainVector> {
    vec![
        ChainVector {
            content: b"alpha",
            content_hash: "8ed3f6ad685b959ead7022518e1af76cd816f8e8ec7ccdda1ed4018e8f2223f8",
            chain_hash: "d737ee39d491e9c549554eb236a0c2281d9d6ed4e9baea35d3f2e6750579b450",
        },
        ChainVector {
            content: b"beta",
            content_hash: "f44e64e75f3948e9f73f8dfa94721c4ce8cbb4f265c4790c702b2d41cfbf2753",
            chain_hash: "6cdb6a851721d2055f4df2c453e345e4fd82c4a015142b3141da884fc8698e07",
        },
        ChainVector {
            content: b"gamma",
            content_hash: "be9d587defa1f0c09ef49eb17e206983a5f8f8289e4281860bd0ee5a19592c67",
            chain_hash: "e187aa07f89788852f1d65e0c89b0669096b69ddd37baaed1b581fe35a9b7840",
        },
    ]
}

/// Check every vector, returning `(name, matches, actual)` per case.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    let mut results = Vec::new();

    for v in canonical_vectors() {
        let (ok, actual) = match canonicalize(v.input.as_bytes()) {
            Ok(bytes) => {
                let hash = ContentHash::compute(&bytes).to_hex();
                (bytes == v.canonical.as_bytes() && hash == v.content_hash, hash)
            }
            Err(e) => (false, e.to_string()),
        };
        results.push((v.name.to_string(), ok, actual));
    }

    let mut previous: Option<ChainHash> = None;
    for (i, v) in chain_vectors().iter().enumerate() {
        let content_hash = ContentHash::compute(v.content);
        let chain = ChainHash::link(previous.as_ref(), &content_hash);
        let ok = content_hash.to_hex() == v.content_hash && chain.to_hex() == v.chain_hash;
        results.push((format!("chain link {}", i + 1), ok, chain.to_hex()));
        previous = Some(chain);
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_vectors_match() {
        for (name, ok, actual) in verify_all_vectors() {
            assert!(ok, "vector '{name}' produced {actual}");
        }
    }

    #[test]
    fn test_canonical_output_is_a_fixed_point() {
        for v in canonical_vectors() {
            let again = canonicalize(v.canonical.as_bytes()).unwrap();
            assert_eq!(again, v.canonical.as_bytes(), "vector '{}'", v.name);
        }
    }

    #[test]
    fn test_genesis_is_hash_of_content_hex() {
        let first = &chain_vectors()[0];
        let expected = ContentHash::compute(first.content_hash.as_bytes());
        assert_eq!(first.chain_hash, expected.to_hex());
    }
}
