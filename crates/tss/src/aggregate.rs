//! Partial signing, per-signer verification and aggregation.
//!
//! ## Flow
//!
//! ```text
//! secondary i:  sign(sk_i, doc) ──► partial_i
//! primary:      verify_partials_in_order([pk_0..pk_n], [partial_0..partial_n], doc)
//!                   │ first bad index ──► SigningError::VerificationFailed{index}
//!                   ▼
//!               aggregate_signatures(partials) ──► aggregate
//!               verify_aggregate([pk_0..pk_n], aggregate, doc)
//! ```
//!
//! All partials sign the same document, so the aggregate is checked with
//! fast-aggregate-verify (one pairing check against the summed public key).
//! Rogue-key safety relies on the proof of possession each SP publishes
//! when registering its BLS key on chain.

use blst::min_pk::{AggregateSignature, PublicKey, Signature};

use crate::error::SigningError;
use crate::keys::{is_success, BlsPublicKey, BlsSecretKey, BlsSignature, BLS_DST};

pub fn sign(sk: &BlsSecretKey, msg: &[u8]) -> BlsSignature {
    BlsSignature::from_inner(sk.inner().sign(msg, BLS_DST, &[]))
}

pub fn verify_partial(pk: &BlsPublicKey, sig: &BlsSignature, msg: &[u8]) -> bool {
    is_success(sig.inner().verify(true, msg, BLS_DST, &[], pk.inner(), true))
}

/// Verifies raw partial signatures strictly in index order.
///
/// Returns the parsed signatures on success. On the first partial that is
/// malformed or does not verify against the key at the same index, returns
/// `VerificationFailed { index }` without looking at later entries.
pub fn verify_partials_in_order(
    keys: &[BlsPublicKey],
    signatures: &[Vec<u8>],
    msg: &[u8],
) -> Result<Vec<BlsSignature>, SigningError> {
    if keys.len() != signatures.len() {
        return Err(SigningError::LengthMismatch {
            keys: keys.len(),
            signatures: signatures.len(),
        });
    }
    let mut verified = Vec::with_capacity(signatures.len());
    for (index, (pk, raw)) in keys.iter().zip(signatures).enumerate() {
        let sig = BlsSignature::from_bytes(raw)
            .map_err(|_| SigningError::VerificationFailed { index })?;
        if !verify_partial(pk, &sig, msg) {
            return Err(SigningError::VerificationFailed { index });
        }
        verified.push(sig);
    }
    Ok(verified)
}

/// Aggregates already verified partial signatures.
pub fn aggregate_signatures(signatures: &[BlsSignature]) -> Result<BlsSignature, SigningError> {
    if signatures.is_empty() {
        return Err(SigningError::Empty);
    }
    let refs: Vec<&Signature> = signatures.iter().map(|s| s.inner()).collect();
    let agg = AggregateSignature::aggregate(&refs, true)
        .map_err(|e| SigningError::Aggregation(format!("{:?}", e)))?;
    Ok(BlsSignature::from_inner(agg.to_signature()))
}

/// Checks an aggregate against the keys of every signer of `msg`.
pub fn verify_aggregate(keys: &[BlsPublicKey], aggregate: &BlsSignature, msg: &[u8]) -> bool {
    if keys.is_empty() {
        return false;
    }
    let refs: Vec<&PublicKey> = keys.iter().map(|k| k.inner()).collect();
    is_success(
        aggregate
            .inner()
            .fast_aggregate_verify(true, msg, BLS_DST, &refs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn keys(n: usize) -> Vec<BlsSecretKey> {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        (0..n)
            .map(|_| BlsSecretKey::generate(&mut rng).unwrap())
            .collect()
    }

    // ──── PARTIALS ────

    #[test]
    fn test_sign_and_verify_partial() {
        let sks = keys(1);
        let sig = sign(&sks[0], b"doc");
        assert!(verify_partial(&sks[0].public_key(), &sig, b"doc"));
        assert!(!verify_partial(&sks[0].public_key(), &sig, b"other"));
    }

    #[test]
    fn test_partial_under_wrong_key_fails() {
        let sks = keys(2);
        let sig = sign(&sks[0], b"doc");
        assert!(!verify_partial(&sks[1].public_key(), &sig, b"doc"));
    }

    // ──── AGGREGATION ────

    #[test]
    fn test_aggregate_of_valid_partials_verifies() {
        let sks = keys(6);
        let pks: Vec<_> = sks.iter().map(|k| k.public_key()).collect();
        let raw: Vec<Vec<u8>> = sks.iter().map(|k| sign(k, b"seal").to_bytes().to_vec()).collect();
        let verified = verify_partials_in_order(&pks, &raw, b"seal").unwrap();
        let agg = aggregate_signatures(&verified).unwrap();
        assert!(verify_aggregate(&pks, &agg, b"seal"));
        assert!(!verify_aggregate(&pks[..5], &agg, b"seal"));
        assert!(!verify_aggregate(&pks, &agg, b"tampered"));
    }

    #[test]
    fn test_substituted_partial_rejected_before_aggregation() {
        let sks = keys(4);
        let pks: Vec<_> = sks.iter().map(|k| k.public_key()).collect();
        let mut raw: Vec<Vec<u8>> = sks.iter().map(|k| sign(k, b"seal").to_bytes().to_vec()).collect();
        // Index 2 carries a well-formed signature by the wrong signer.
        raw[2] = sign(&sks[0], b"seal").to_bytes().to_vec();
        let err = verify_partials_in_order(&pks, &raw, b"seal").unwrap_err();
        assert_eq!(err, SigningError::VerificationFailed { index: 2 });
        assert_eq!(err.failed_index(), Some(2));
    }

    #[test]
    fn test_malformed_partial_reports_its_index() {
        let sks = keys(3);
        let pks: Vec<_> = sks.iter().map(|k| k.public_key()).collect();
        let mut raw: Vec<Vec<u8>> = sks.iter().map(|k| sign(k, b"m").to_bytes().to_vec()).collect();
        raw[1] = vec![1, 2, 3];
        assert_eq!(
            verify_partials_in_order(&pks, &raw, b"m").unwrap_err(),
            SigningError::VerificationFailed { index: 1 }
        );
    }

    #[test]
    fn test_first_failure_wins() {
        let sks = keys(3);
        let pks: Vec<_> = sks.iter().map(|k| k.public_key()).collect();
        let raw = vec![vec![0u8; 96], vec![0u8; 96], vec![0u8; 96]];
        assert_eq!(
            verify_partials_in_order(&pks, &raw, b"m").unwrap_err(),
            SigningError::VerificationFailed { index: 0 }
        );
    }

    #[test]
    fn test_length_mismatch_and_empty() {
        let sks = keys(2);
        let pks: Vec<_> = sks.iter().map(|k| k.public_key()).collect();
        assert!(matches!(
            verify_partials_in_order(&pks, &[], b"m"),
            Err(SigningError::LengthMismatch { keys: 2, signatures: 0 })
        ));
        assert_eq!(aggregate_signatures(&[]).unwrap_err(), SigningError::Empty);
    }
}
