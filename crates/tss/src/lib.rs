//! # spnode TSS Crate
//!
//! BLS12-381 signatures used to attest piece receipt and seal objects.
//!
//! ## Role
//!
//! Every secondary SP of a GVG signs the object's seal document after it
//! has stored its pieces. The primary verifies each partial signature
//! against the secondary's registered key, in redundancy-index order, then
//! aggregates them into one signature carried by the seal transaction.
//!
//! ## Types
//!
//! | Type | Size |
//! |------|------|
//! | `BlsSecretKey` | 32 bytes |
//! | `BlsPublicKey` | 48 bytes (G1, compressed) |
//! | `BlsSignature` | 96 bytes (G2, compressed) |
//!
//! ## Usage
//!
//! ```rust
//! use spnode_tss::{aggregate_signatures, seal_sign_doc, sign, verify_aggregate, BlsSecretKey};
//!
//! let sk = BlsSecretKey::from_seed(&[7u8; 32]).unwrap();
//! let doc = seal_sign_doc(1, 10, 42, b"checksum-root");
//! let partial = sign(&sk, &doc);
//! let agg = aggregate_signatures(&[partial]).unwrap();
//! assert!(verify_aggregate(&[sk.public_key()], &agg, &doc));
//! ```

pub mod aggregate;
pub mod doc;
pub mod error;
pub mod keys;

pub use aggregate::{aggregate_signatures, sign, verify_aggregate, verify_partial, verify_partials_in_order};
pub use doc::seal_sign_doc;
pub use error::SigningError;
pub use keys::{BlsPublicKey, BlsSecretKey, BlsSignature, BLS_DST, PUBLIC_KEY_LEN, SIGNATURE_LEN};
