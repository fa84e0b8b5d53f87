//! Content hashing helpers for the Cache (§4.2 fingerprint algorithm).

use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file's contents.
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hash_bytes(&bytes))
}

/// Hex-encoded SHA-256 over an arbitrary sequence of string components,
/// each separated by a NUL byte so that `["ab", "c"]` and `["a", "bc"]`
/// never collide.
pub fn hash_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_parts_is_deterministic() {
        let a = hash_parts(["a", "b"]);
        let b = hash_parts(["a", "b"]);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_parts_separator_prevents_collision() {
        let a = hash_parts(["ab", "c"]);
        let b = hash_parts(["a", "bc"]);
        assert_ne!(a, b);
    }
}
