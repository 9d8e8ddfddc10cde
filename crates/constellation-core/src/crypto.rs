//! Cryptographic primitives for admission authorization.
//!
//! Provides ed25519 signing and verification for admission payloads and the mapping from
//! a verifying key to the 20-byte signer [`Address`] used by role checks.
//!
//! # Security
//!
//! - Uses ed25519-dalek with verified implementations
//! - Seeds loaded from hex are zeroized after use
//! - Never log or expose private keys

use crate::hash::{sha256_domain, SIGNER_ADDRESS_DOMAIN_V1};
use crate::signature::AdmissionPayload;
use crate::{Address, ConstellationError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::{debug, instrument, warn};
use zeroize::Zeroize;

/// 64-byte ed25519 signature.
pub type SignatureBytes = [u8; 64];

/// 32-byte ed25519 public key.
pub type PublicKeyBytes = [u8; 32];

/// 32-byte ed25519 private key seed.
pub type PrivateKeySeed = [u8; 32];

/// Length of the wire-form admission signature: `public_key(32) || signature(64)`.
pub const ADMISSION_SIGNATURE_LEN: usize = 32 + 64;

/// Derive the signer address for a public key: trailing 20 bytes of `H(domain || pk)`.
pub fn signer_address(public_key: &PublicKeyBytes) -> Address {
    Address::from_digest(&sha256_domain(SIGNER_ADDRESS_DOMAIN_V1, public_key))
}

/// Keypair held by the off-protocol admission server.
#[derive(Clone)]
pub struct AdmissionSigningKey {
    signing_key: SigningKey,
}

impl AdmissionSigningKey {
    /// Generate a new random keypair from the OS CSPRNG.
    ///
    /// Suitable for tests and ephemeral deployments; production signers should load keys
    /// from secure storage.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Load keypair from seed bytes.
    pub fn from_seed(seed: &PrivateKeySeed) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Load keypair from a hex-encoded seed.
    ///
    /// The decoded seed bytes are zeroized after use.
    pub fn from_hex(hex_seed: &str) -> Result<Self> {
        let mut bytes = hex::decode(hex_seed)
            .map_err(|e| ConstellationError::CryptoError(format!("Invalid hex: {}", e)))?;

        if bytes.len() != 32 {
            bytes.zeroize();
            return Err(ConstellationError::CryptoError(
                "Seed must be exactly 32 bytes".into(),
            ));
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes);
        bytes.zeroize();

        let key = Self::from_seed(&seed);
        seed.zeroize();
        Ok(key)
    }

    pub fn verifying_key(&self) -> AdmissionVerifyingKey {
        AdmissionVerifyingKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Address the on-protocol role registry knows this signer by.
    pub fn address(&self) -> Address {
        self.verifying_key().address()
    }

    /// Sign an admission payload, returning the 96-byte wire-form signature.
    #[instrument(skip(self, payload), fields(requester = %payload.requester, nonce = payload.nonce))]
    pub fn sign_admission(&self, payload: &AdmissionPayload) -> Vec<u8> {
        let message = payload.signing_bytes();
        let signature = self.signing_key.sign(&message);
        debug!("Signed admission payload");
        encode_admission_signature(&self.verifying_key().to_bytes(), &signature.to_bytes())
    }

    /// Sign arbitrary bytes (ed25519).
    pub fn sign_bytes(&self, message: &[u8]) -> SignatureBytes {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Public key for verifying admission signatures.
#[derive(Clone, Debug)]
pub struct AdmissionVerifyingKey {
    verifying_key: VerifyingKey,
}

impl AdmissionVerifyingKey {
    pub fn from_bytes(bytes: &PublicKeyBytes) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| ConstellationError::CryptoError(format!("Invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| ConstellationError::CryptoError(format!("Invalid hex: {}", e)))?;

        if bytes.len() != 32 {
            return Err(ConstellationError::CryptoError(
                "Public key must be exactly 32 bytes".into(),
            ));
        }

        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);
        Self::from_bytes(&key_bytes)
    }

    pub fn to_bytes(&self) -> PublicKeyBytes {
        self.verifying_key.to_bytes()
    }

    pub fn address(&self) -> Address {
        signer_address(&self.to_bytes())
    }

    /// Verify a signature over arbitrary bytes (ed25519).
    pub fn verify_bytes(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        if signature.len() != 64 {
            warn!("Invalid signature length: {}", signature.len());
            return Err(ConstellationError::BadSignature(
                "Invalid signature length".into(),
            ));
        }

        let mut sig_bytes = [0u8; 64];
        sig_bytes.copy_from_slice(signature);
        let signature = Signature::from_bytes(&sig_bytes);

        self.verifying_key.verify(message, &signature).map_err(|_| {
            warn!("Signature verification failed");
            ConstellationError::BadSignature("Signature verification failed".into())
        })
    }
}

/// Concatenate a public key and signature into the admission wire form.
pub fn encode_admission_signature(public_key: &PublicKeyBytes, signature: &SignatureBytes) -> Vec<u8> {
    let mut out = Vec::with_capacity(ADMISSION_SIGNATURE_LEN);
    out.extend_from_slice(public_key);
    out.extend_from_slice(signature);
    out
}

/// Split the admission wire form back into `(public_key, signature)`.
pub fn decode_admission_signature(bytes: &[u8]) -> Result<(PublicKeyBytes, SignatureBytes)> {
    if bytes.len() != ADMISSION_SIGNATURE_LEN {
        return Err(ConstellationError::BadSignature(format!(
            "Malformed signature: expected {} bytes, got {}",
            ADMISSION_SIGNATURE_LEN,
            bytes.len()
        )));
    }
    let mut public_key = [0u8; 32];
    let mut signature = [0u8; 64];
    public_key.copy_from_slice(&bytes[..32]);
    signature.copy_from_slice(&bytes[32..]);
    Ok((public_key, signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_bytes_roundtrip() {
        let key = AdmissionSigningKey::from_seed(&[1u8; 32]);
        let sig = key.sign_bytes(b"hello");
        assert!(key.verifying_key().verify_bytes(b"hello", &sig).is_ok());
        assert!(key.verifying_key().verify_bytes(b"hellp", &sig).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = AdmissionSigningKey::from_seed(&[3u8; 32]);
        let other = AdmissionSigningKey::from_seed(&[4u8; 32]);
        let sig = key.sign_bytes(b"msg");
        let result = other.verifying_key().verify_bytes(b"msg", &sig);
        assert!(matches!(result, Err(ConstellationError::BadSignature(_))));
    }

    #[test]
    fn address_is_deterministic_per_key() {
        let a = AdmissionSigningKey::from_seed(&[42u8; 32]);
        let b = AdmissionSigningKey::from_seed(&[42u8; 32]);
        let c = AdmissionSigningKey::from_seed(&[43u8; 32]);
        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), c.address());
    }

    #[test]
    fn key_from_hex() {
        let hex_seed = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert!(AdmissionSigningKey::from_hex(hex_seed).is_ok());
        assert!(AdmissionSigningKey::from_hex("invalid").is_err());
        assert!(AdmissionSigningKey::from_hex("00").is_err());
    }

    #[test]
    fn verifying_key_from_hex_roundtrips() {
        let key = AdmissionSigningKey::from_seed(&[1u8; 32]);
        let expected = key.verifying_key().to_bytes();
        let parsed = AdmissionVerifyingKey::from_hex(&hex::encode(expected)).expect("valid key");
        assert_eq!(parsed.to_bytes(), expected);
        assert_eq!(parsed.address(), key.address());
    }

    #[test]
    fn signature_wire_form_roundtrips_and_rejects_bad_length() {
        let pk = [7u8; 32];
        let sig = [9u8; 64];
        let encoded = encode_admission_signature(&pk, &sig);
        assert_eq!(encoded.len(), ADMISSION_SIGNATURE_LEN);
        assert_eq!(decode_admission_signature(&encoded).unwrap(), (pk, sig));
        assert!(matches!(
            decode_admission_signature(&encoded[..95]),
            Err(ConstellationError::BadSignature(_))
        ));
    }
}
