/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: provided by the [`sha2`] crate. Block fingerprints are always SHA-256;
//!    block hashes use the chain's configured [`HashType`].
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{CryptoHash, SignatureBytes};

// re-exports below.
pub use sha2::Digest;
pub use sha2::Sha256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// Hash algorithm a chain is configured to hash its blocks with.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum HashType {
    Sha256,
    Sha512_256,
}

impl HashType {
    /// Hash `bytes` with this algorithm.
    pub fn digest(&self, bytes: &[u8]) -> CryptoHash {
        match self {
            HashType::Sha256 => CryptoHash::new(sha2::Sha256::digest(bytes).into()),
            HashType::Sha512_256 => CryptoHash::new(sha2::Sha512_256::digest(bytes).into()),
        }
    }

    /// Parse the algorithm name used in chain configuration files, e.g., `"SHA256"`.
    pub fn from_name(name: &str) -> Option<HashType> {
        match name.to_ascii_uppercase().as_str() {
            "SHA256" | "SHA-256" => Some(HashType::Sha256),
            "SHA512_256" | "SHA-512/256" => Some(HashType::Sha512_256),
            _ => None,
        }
    }
}

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }
}

#[test]
fn hash_type_from_name_test() {
    assert_eq!(HashType::from_name("sha256"), Some(HashType::Sha256));
    assert_eq!(HashType::from_name("SHA512_256"), Some(HashType::Sha512_256));
    assert_eq!(HashType::from_name("SM3"), None);
    assert_ne!(
        HashType::Sha256.digest(b"block"),
        HashType::Sha512_256.digest(b"block")
    );
}
