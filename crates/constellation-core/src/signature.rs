//! Admission signature verification.
//!
//! The admission server signs a canonical, fixed-layout encoding of the request:
//!
//! `domain || chain_id(u64 le) || requester(20) || salt(u128 le) || target(20) ||
//!  required_value(u128 le) || epoch(u64 le) || nonce(u64 le) || signed_at(u64 le) ||
//!  key_len(u32 le) || key_material`
//!
//! Any reordering, width change, or missing/extra field produces a different byte string
//! and therefore a failed verification. Verification is pure: it never consumes nonces.

use crate::crypto::{decode_admission_signature, signer_address, AdmissionVerifyingKey};
use crate::directory::{Directory, Role};
use crate::hash::ADMISSION_MESSAGE_DOMAIN_V1;
use crate::{Address, Amount, ConstellationError, Result, Timestamp};
use tracing::{debug, instrument, warn};

/// Upper bound on validator key material accepted in a payload.
pub const MAX_KEY_MATERIAL_LEN: usize = 1024;

const FIXED_LEN: usize = 8 + 20 + 16 + 20 + 16 + 8 + 8 + 8 + 4;

/// Fields the admission server authorizes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionPayload {
    pub chain_id: u64,
    pub requester: Address,
    pub requester_salt: u128,
    pub target_address: Address,
    pub required_value: Amount,
    pub epoch: u64,
    pub nonce: u64,
    pub signed_at: Timestamp,
    pub key_material: Vec<u8>,
}

impl AdmissionPayload {
    /// Canonical encoding without the domain tag.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FIXED_LEN + self.key_material.len());
        bytes.extend_from_slice(&self.chain_id.to_le_bytes());
        bytes.extend_from_slice(&self.requester.0);
        bytes.extend_from_slice(&self.requester_salt.to_le_bytes());
        bytes.extend_from_slice(&self.target_address.0);
        bytes.extend_from_slice(&self.required_value.get().to_le_bytes());
        bytes.extend_from_slice(&self.epoch.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&self.signed_at.to_le_bytes());
        bytes.extend_from_slice(&(self.key_material.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&self.key_material);
        bytes
    }

    /// Exact bytes covered by the signature: `domain || canonical_bytes`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let canonical = self.canonical_bytes();
        let mut bytes = Vec::with_capacity(ADMISSION_MESSAGE_DOMAIN_V1.len() + canonical.len());
        bytes.extend_from_slice(ADMISSION_MESSAGE_DOMAIN_V1);
        bytes.extend_from_slice(&canonical);
        bytes
    }

    /// Strict decoder for [`canonical_bytes`](Self::canonical_bytes); rejects truncated
    /// input, oversized key material and trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { bytes, pos: 0 };
        let chain_id = u64::from_le_bytes(r.array()?);
        let requester = Address(r.array()?);
        let requester_salt = u128::from_le_bytes(r.array()?);
        let target_address = Address(r.array()?);
        let required_value = Amount::new(u128::from_le_bytes(r.array()?));
        let epoch = u64::from_le_bytes(r.array()?);
        let nonce = u64::from_le_bytes(r.array()?);
        let signed_at = u64::from_le_bytes(r.array()?);
        let key_len = u32::from_le_bytes(r.array()?) as usize;
        if key_len > MAX_KEY_MATERIAL_LEN {
            return Err(ConstellationError::BadSignature(format!(
                "key material too long: {key_len} > {MAX_KEY_MATERIAL_LEN}"
            )));
        }
        let key_material = r.take(key_len)?.to_vec();
        if r.pos != bytes.len() {
            return Err(ConstellationError::BadSignature(
                "trailing bytes after payload".into(),
            ));
        }
        Ok(Self {
            chain_id,
            requester,
            requester_salt,
            target_address,
            required_value,
            epoch,
            nonce,
            signed_at,
            key_material,
        })
    }

    fn check_well_formed(&self) -> Result<()> {
        if self.key_material.is_empty() {
            return Err(ConstellationError::BadSignature(
                "empty validator key material".into(),
            ));
        }
        if self.key_material.len() > MAX_KEY_MATERIAL_LEN {
            return Err(ConstellationError::BadSignature(
                "validator key material too long".into(),
            ));
        }
        Ok(())
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ConstellationError::BadSignature("truncated payload".into()))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

/// Payload that passed signature validation.
///
/// `signer` is `None` when the admin check was disabled and no signature was examined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedAdmission {
    pub payload: AdmissionPayload,
    pub signer: Option<Address>,
}

#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    admin_check_enabled: bool,
    required_role: Role,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SignatureVerifier {
    pub fn new(admin_check_enabled: bool) -> Self {
        Self {
            admin_check_enabled,
            required_role: Role::AdminServer,
        }
    }

    pub fn admin_check_enabled(&self) -> bool {
        self.admin_check_enabled
    }

    /// Toggle signer verification. Callers are responsible for gating this behind an
    /// administrative role.
    pub fn set_admin_check(&mut self, enabled: bool) {
        if !enabled {
            warn!("Admission signer check DISABLED: any well-formed request will pass");
        }
        self.admin_check_enabled = enabled;
    }

    /// Check that `signature` over `payload` came from `expected_signer` and that the
    /// signer holds the admission-server role.
    #[instrument(skip_all, fields(requester = %payload.requester, nonce = payload.nonce))]
    pub fn verify(
        &self,
        directory: &Directory,
        payload: &AdmissionPayload,
        signature: &[u8],
        expected_signer: &Address,
    ) -> Result<VerifiedAdmission> {
        payload.check_well_formed()?;

        if !self.admin_check_enabled {
            debug!("Admin check disabled; skipping signature validation");
            return Ok(VerifiedAdmission {
                payload: payload.clone(),
                signer: None,
            });
        }

        let (public_key, sig) = decode_admission_signature(signature)?;
        let signer = signer_address(&public_key);
        if signer != *expected_signer {
            warn!(%signer, expected = %expected_signer, "Admission signer mismatch");
            return Err(ConstellationError::BadSignature(format!(
                "signer {signer} is not the expected signer {expected_signer}"
            )));
        }
        if !directory.has_role(&signer, self.required_role) {
            warn!(%signer, "Admission signer lacks required role");
            return Err(ConstellationError::BadSignature(format!(
                "signer {signer} lacks role {:?}",
                self.required_role
            )));
        }

        let verifying_key = AdmissionVerifyingKey::from_bytes(&public_key)
            .map_err(|e| ConstellationError::BadSignature(e.to_string()))?;
        verifying_key.verify_bytes(&payload.signing_bytes(), &sig)?;

        debug!(%signer, "Admission signature verified");
        Ok(VerifiedAdmission {
            payload: payload.clone(),
            signer: Some(signer),
        })
    }
}
