//! BLS12-381 key and signature wrappers (`blst::min_pk`: 48-byte G1 public
//! keys, 96-byte G2 signatures).

use std::fmt;

use blst::min_pk::{PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::{CryptoRng, RngCore};

use crate::error::SigningError;

/// Proof-of-possession ciphersuite domain separation tag.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

pub const PUBLIC_KEY_LEN: usize = 48;
pub const SIGNATURE_LEN: usize = 96;

// ════════════════════════════════════════════════════════════════════════════
// SECRET KEY
// ════════════════════════════════════════════════════════════════════════════

pub struct BlsSecretKey(SecretKey);

impl BlsSecretKey {
    /// Derive a key from at least 32 bytes of input keying material.
    pub fn from_seed(ikm: &[u8]) -> Result<Self, SigningError> {
        SecretKey::key_gen(ikm, &[])
            .map(Self)
            .map_err(|_| SigningError::InvalidSecretKey)
    }

    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, SigningError> {
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        Self::from_seed(&ikm)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        SecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|_| SigningError::InvalidSecretKey)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.sk_to_pk())
    }

    pub(crate) fn inner(&self) -> &SecretKey {
        &self.0
    }
}

impl fmt::Debug for BlsSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlsSecretKey(..)")
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PUBLIC KEY
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct BlsPublicKey(PublicKey);

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl BlsPublicKey {
    /// Parses a compressed key and checks it is a valid, non-identity G1 point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        let pk = PublicKey::key_validate(bytes)
            .map_err(|e| SigningError::InvalidPublicKey(format!("{:?}", e)))?;
        Ok(Self(pk))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.compress()
    }

    pub(crate) fn inner(&self) -> &PublicKey {
        &self.0
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey({})", hex::encode(&self.to_bytes()[..8]))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SIGNATURE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct BlsSignature(Signature);

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl BlsSignature {
    /// Parses a compressed signature and checks G2 subgroup membership.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        let sig = Signature::from_bytes(bytes)
            .map_err(|e| SigningError::InvalidSignature(format!("{:?}", e)))?;
        match sig.validate(true) {
            Ok(()) => Ok(Self(sig)),
            Err(e) => Err(SigningError::InvalidSignature(format!("{:?}", e))),
        }
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.compress()
    }

    pub(crate) fn from_inner(sig: Signature) -> Self {
        Self(sig)
    }

    pub(crate) fn inner(&self) -> &Signature {
        &self.0
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature({})", hex::encode(&self.to_bytes()[..8]))
    }
}

pub(crate) fn is_success(err: BLST_ERROR) -> bool {
    err == BLST_ERROR::BLST_SUCCESS
}
