//! Stable subscription identifiers

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `source`
pub fn compute_key(source: &str) -> String {
    Sha256::digest(source.as_bytes())
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_key() {
        assert_eq!(
            compute_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(compute_key("alice:session").len(), 64);
        assert_ne!(compute_key("alice:session"), compute_key("alice:service"));
    }
}
