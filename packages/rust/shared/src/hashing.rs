//! SHA-256 content hashing helpers.
//!
//! Chunk ids and placeholder record ids are content-addressed so that
//! re-indexing identical input always produces identical rows.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{DocforgeError, Result};

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_bytes(value: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value);
    format!("{:x}", hasher.finalize())
}

/// Hex-encoded SHA-256 of a UTF-8 string.
pub fn sha256_text(value: &str) -> String {
    sha256_bytes(value.as_bytes())
}

/// Hex-encoded SHA-256 of a file's content, streamed in 1 MiB blocks.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| DocforgeError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| DocforgeError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        // sha256("abc")
        assert_eq!(
            sha256_text("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_bytes(b"abc"), sha256_text("abc"));
    }

    #[test]
    fn file_hash_matches_text_hash() {
        let tmp = std::env::temp_dir().join(format!("df_hash_{}.txt", uuid::Uuid::now_v7()));
        std::fs::write(&tmp, "hello world").expect("write temp file");
        let hashed = file_sha256(&tmp).expect("hash file");
        assert_eq!(hashed, sha256_text("hello world"));
        let _ = std::fs::remove_file(&tmp);
    }
}
