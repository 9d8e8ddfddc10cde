use crate::Hash32;
use sha2::{Digest, Sha256};

/// Compute a deterministic SHA-256 hash of a byte slice.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Hash32(hasher.finalize().into())
}

/// Compute a domain-separated SHA-256 hash: `H(domain || data)`.
pub fn sha256_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    Hash32(hasher.finalize().into())
}

// =============================================================================
// Domain separation (v1)
// =============================================================================

/// Domain tag prefixed to the canonical admission message before signing.
pub const ADMISSION_MESSAGE_DOMAIN_V1: &[u8] = b"CNST_ADMISSION_MESSAGE_V1";

/// Domain tag for deriving an account address from an ed25519 public key.
pub const SIGNER_ADDRESS_DOMAIN_V1: &[u8] = b"CNST_SIGNER_ADDRESS_V1";

/// Domain tag for hashing validator key material into the deployment salt.
pub const KEY_MATERIAL_DOMAIN_V1: &[u8] = b"CNST_VALIDATOR_KEY_MATERIAL_V1";

/// Domain tag for the first derivation level (requester + salt -> proxy salt).
pub const PROXY_SALT_DOMAIN_V1: &[u8] = b"CNST_PROXY_SALT_V1";

/// Domain tag for the second derivation level (proxy + salt -> validator salt).
pub const VALIDATOR_SALT_DOMAIN_V1: &[u8] = b"CNST_VALIDATOR_SALT_V1";

/// Hash opaque validator key material (e.g. a BLS public key) into a commitment.
pub fn hash_key_material(key_material: &[u8]) -> Hash32 {
    sha256_domain(KEY_MATERIAL_DOMAIN_V1, key_material)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        let expected = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        assert_eq!(hex::encode(sha256(b"abc").0), expected);
    }

    #[test]
    fn domain_separation_changes_digest() {
        let data = b"validator-pubkey";
        assert_ne!(
            sha256_domain(PROXY_SALT_DOMAIN_V1, data),
            sha256_domain(VALIDATOR_SALT_DOMAIN_V1, data)
        );
        assert_ne!(hash_key_material(data), sha256(data));
    }
}
