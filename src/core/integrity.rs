//! Integrity Alchemist: content hashing and the manifest's Merkle-style
//! root. Spec §3 (Manifest.integrity) and §4.7.
//!
//! Grounded on the SHA-256 content hashing and CBOR-ish canonical encoding
//! in `examples/DecapodLabs-decapod/src/core/state_commit.rs`
//! (`get_entry`, `encode_uint`/`encode_string`).

use sha2::{Digest, Sha256};

/// SHA-256 of raw bytes, lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA-256 of UTF-8 text, lowercase hex.
pub fn hash_text(text: &str) -> String {
    hash_bytes(text.as_bytes())
}

/// The first 8 hex characters of a content hash — the anchor-hash form
/// used by `@hash:` preconditions.
pub fn short_hash(full_hash: &str) -> &str {
    &full_hash[..full_hash.len().min(8)]
}

/// Compute a Merkle-style root over sorted `(path, sha256)` pairs: leaves
/// are `sha256(path || sha256)`, internal nodes are `sha256(left || right)`,
/// and an odd node at any level is promoted unchanged (duplicate-free,
/// unlike the classic Bitcoin scheme, since this is advisory integrity
/// data rather than a consensus structure).
pub fn merkle_root(mut pairs: Vec<(String, String)>) -> String {
    if pairs.is_empty() {
        return hash_text("");
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut level: Vec<String> = pairs
        .iter()
        .map(|(path, sha256)| hash_text(&format!("{path}:{sha256}")))
        .collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut iter = level.chunks(2);
        while let Some(chunk) = iter.next() {
            if chunk.len() == 2 {
                next.push(hash_text(&format!("{}{}", chunk[0], chunk[1])));
            } else {
                next.push(chunk[0].clone());
            }
        }
        level = next;
    }
    level.into_iter().next().unwrap()
}

/// Canonical JSON hash used for `Manifest.integrity.manifest_hash`: the
/// caller must pass already-canonicalized JSON (sorted keys), since
/// `serde_json`'s default map ordering is insertion order, not sorted.
pub fn hash_canonical_json(canonical_json: &str) -> String {
    hash_text(canonical_json)
}
