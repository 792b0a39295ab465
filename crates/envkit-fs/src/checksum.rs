//! SHA-256 checksum utilities
//!
//! Provides a single canonical checksum format (`sha256:<hex>`) used to
//! fingerprint extension definitions at install time.

use sha2::{Digest, Sha256};

/// Prefix for all checksums produced by this module
const PREFIX: &str = "sha256:";

/// Compute the SHA-256 checksum of string content.
///
/// Returns a string in the canonical format `"sha256:<hex>"`.
pub fn compute_content_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{}{:x}", PREFIX, hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_checksum_has_prefix() {
        let checksum = compute_content_checksum("id = \"python\"");
        assert!(checksum.starts_with("sha256:"));
        assert_eq!(checksum.len(), PREFIX.len() + 64);
    }

    #[test]
    fn content_checksum_is_deterministic() {
        assert_eq!(
            compute_content_checksum("same"),
            compute_content_checksum("same")
        );
        assert_ne!(
            compute_content_checksum("a"),
            compute_content_checksum("b")
        );
    }
}
