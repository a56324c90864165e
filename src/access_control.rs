/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`AccessControlProvider`] backed by a fixed set of Ed25519 validator keys.
//!
//! Proposers sign the bytes of their block's hash. Voters sign
//! [`Vote::signing_bytes`](crate::types::certificates::Vote::signing_bytes).

use std::collections::{HashMap, HashSet};

use crate::{
    pluggables::AccessControlError,
    pluggables::AccessControlProvider,
    types::{
        block::Block,
        certificates::{Certificate, QuorumCertificate},
        crypto_primitives::{Signature, Verifier, VerifyingKey},
        data_types::VerifyingKeyBytes,
    },
};

/// Checks quorum certificates against the validator set of the current epoch.
pub struct ValidatorAccessControl {
    validators: HashMap<VerifyingKeyBytes, VerifyingKey>,
}

impl ValidatorAccessControl {
    pub fn new(validators: impl IntoIterator<Item = VerifyingKey>) -> ValidatorAccessControl {
        ValidatorAccessControl {
            validators: validators
                .into_iter()
                .map(|key| (VerifyingKeyBytes::new(key.to_bytes()), key))
                .collect(),
        }
    }

    pub fn validator_count(&self) -> usize {
        self.validators.len()
    }
}

impl AccessControlProvider for ValidatorAccessControl {
    fn verify_block_signature(&self, block: &Block) -> Result<(), AccessControlError> {
        let proposer = <[u8; 32]>::try_from(block.header.proposer.as_slice())
            .map(VerifyingKeyBytes::new)
            .map_err(|_| AccessControlError::UnknownProposer)?;
        let verifying_key = self
            .validators
            .get(&proposer)
            .ok_or(AccessControlError::UnknownProposer)?;
        let signature = Signature::from_slice(&block.header.signature)
            .map_err(|_| AccessControlError::BadSignature)?;
        verifying_key
            .verify(&block.hash().bytes(), &signature)
            .map_err(|_| AccessControlError::BadSignature)
    }

    /// Require the block's certificate to be about the block's parent, and to carry correct
    /// signatures from a quorum of distinct validators.
    fn verify_vote_signatures(&self, block: &Block) -> Result<(), AccessControlError> {
        let qc = block
            .justify
            .as_ref()
            .ok_or(AccessControlError::MissingCertificate)?;
        if qc.block_hash != block.pre_hash() || qc.height != block.height().prev() {
            return Err(AccessControlError::CertificateMismatch);
        }

        let mut voters = HashSet::with_capacity(qc.votes.len());
        for vote in &qc.votes {
            let verifying_key = self
                .validators
                .get(&vote.voter)
                .ok_or(AccessControlError::UnknownVoter)?;
            if !voters.insert(vote.voter) {
                return Err(AccessControlError::DuplicateVoter);
            }
            if vote.epoch_id != qc.epoch_id
                || vote.height != qc.height
                || vote.level != qc.level
                || vote.block_hash != qc.block_hash
            {
                return Err(AccessControlError::CertificateMismatch);
            }
            if !vote.is_correct(verifying_key) {
                return Err(AccessControlError::BadSignature);
            }
        }

        let quorum = QuorumCertificate::quorum(self.validators.len());
        if voters.len() < quorum {
            return Err(AccessControlError::InsufficientVotes {
                valid: voters.len(),
                quorum,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;
    use crate::types::{
        block::BlockHeader,
        certificates::Vote,
        crypto_primitives::{HashType, Keypair},
        data_types::{BlockHeight, CryptoHash, EpochId, Level},
    };

    fn keypairs(n: usize) -> Vec<Keypair> {
        (0..n)
            .map(|_| Keypair::new(SigningKey::generate(&mut OsRng)))
            .collect()
    }

    fn certified_block(signers: &[Keypair]) -> Block {
        let mut block = Block {
            header: BlockHeader {
                chain_id: String::from("chain1"),
                height: BlockHeight::new(2),
                pre_block_hash: CryptoHash::new([1u8; 32]),
                block_hash: CryptoHash::zero(),
                timestamp: 0,
                proposer: Vec::new(),
                tx_count: 0,
                tx_root: CryptoHash::zero(),
                dag_hash: CryptoHash::zero(),
                rw_set_root: CryptoHash::zero(),
                signature: vec![1],
            },
            txs: Vec::new(),
            justify: None,
        };
        block.header.block_hash = block.compute_hash(HashType::Sha256);
        let votes = signers
            .iter()
            .map(|keypair| {
                Vote::new(
                    keypair,
                    EpochId::new(0),
                    block.height().prev(),
                    Level::new(5),
                    block.pre_hash(),
                )
            })
            .collect();
        block.justify = Some(QuorumCertificate {
            epoch_id: EpochId::new(0),
            height: block.height().prev(),
            level: Level::new(5),
            block_hash: block.pre_hash(),
            votes,
        });
        block
    }

    #[test]
    fn accepts_quorum_test() {
        let keypairs = keypairs(4);
        let access_control = ValidatorAccessControl::new(keypairs.iter().map(|k| k.public()));

        assert_eq!(
            access_control.verify_vote_signatures(&certified_block(&keypairs[..3])),
            Ok(())
        );
        assert_eq!(
            access_control.verify_vote_signatures(&certified_block(&keypairs[..2])),
            Err(AccessControlError::InsufficientVotes { valid: 2, quorum: 3 })
        );
    }

    fn signed_block(proposer: &Keypair) -> Block {
        let mut block = certified_block(&[]);
        block.header.proposer = proposer.public().to_bytes().to_vec();
        block.header.block_hash = block.compute_hash(HashType::Sha256);
        block.header.signature = proposer.sign(&block.hash().bytes()).bytes().to_vec();
        block
    }

    #[test]
    fn block_signature_test() {
        let keypairs = keypairs(4);
        let access_control = ValidatorAccessControl::new(keypairs.iter().map(|k| k.public()));

        // 1. A block signed by a validator over its hash.
        let block = signed_block(&keypairs[2]);
        assert_eq!(access_control.verify_block_signature(&block), Ok(()));

        // 2. A signature by another validator, or over another hash.
        let mut impersonated = block.clone();
        impersonated.header.signature = keypairs[1].sign(&block.hash().bytes()).bytes().to_vec();
        assert_eq!(
            access_control.verify_block_signature(&impersonated),
            Err(AccessControlError::BadSignature)
        );

        let mut resigned = block.clone();
        resigned.header.signature = keypairs[2].sign(&[7u8; 32]).bytes().to_vec();
        assert_eq!(
            access_control.verify_block_signature(&resigned),
            Err(AccessControlError::BadSignature)
        );

        // 3. Truncated signatures.
        let mut truncated = block.clone();
        truncated.header.signature.truncate(10);
        assert_eq!(
            access_control.verify_block_signature(&truncated),
            Err(AccessControlError::BadSignature)
        );

        // 4. Proposers outside the validator set, or not a key at all.
        let outsider = self::keypairs(1);
        assert_eq!(
            access_control.verify_block_signature(&signed_block(&outsider[0])),
            Err(AccessControlError::UnknownProposer)
        );
        let mut anonymous = block;
        anonymous.header.proposer = vec![7];
        assert_eq!(
            access_control.verify_block_signature(&anonymous),
            Err(AccessControlError::UnknownProposer)
        );
    }

    #[test]
    fn rejects_bad_votes_test() {
        let keypairs = keypairs(4);
        let access_control = ValidatorAccessControl::new(keypairs.iter().map(|k| k.public()));

        let mut no_qc = certified_block(&keypairs);
        no_qc.justify = None;
        assert_eq!(
            access_control.verify_vote_signatures(&no_qc),
            Err(AccessControlError::MissingCertificate)
        );

        let outsider = self::keypairs(1);
        assert_eq!(
            access_control.verify_vote_signatures(&certified_block(&outsider)),
            Err(AccessControlError::UnknownVoter)
        );

        let repeated = [keypairs[0].clone(), keypairs[0].clone(), keypairs[1].clone()];
        assert_eq!(
            access_control.verify_vote_signatures(&certified_block(&repeated)),
            Err(AccessControlError::DuplicateVoter)
        );

        let mut forged = certified_block(&keypairs);
        if let Some(qc) = forged.justify.as_mut() {
            qc.votes[0].signature = qc.votes[1].signature;
        }
        assert_eq!(
            access_control.verify_vote_signatures(&forged),
            Err(AccessControlError::BadSignature)
        );

        let mut other_block = certified_block(&keypairs);
        if let Some(qc) = other_block.justify.as_mut() {
            qc.block_hash = CryptoHash::new([9u8; 32]);
        }
        assert_eq!(
            access_control.verify_vote_signatures(&other_block),
            Err(AccessControlError::CertificateMismatch)
        );
    }
}
