/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Certificates that serve as evidence that a quorum of validators supports a given action.
//!
//! 1. [`QuorumCertificate`] stores the validators' votes for a block at a given height and level.
//! 2. [`TimeoutCertificate`] stores the validators' votes to leave a level in which no block was
//!    certified.
//!
//! The [Pacemaker](crate::pacemaker) only ever reads the `height` and `level` of either
//! certificate. Checking the votes themselves is the job of an
//! [`AccessControlProvider`](crate::pluggables::AccessControlProvider).

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{Keypair, Signature, Verifier, VerifyingKey},
    data_types::{BlockHeight, CryptoHash, EpochId, Level, SignatureBytes, VerifyingKeyBytes},
};

/// A single validator's vote for a block, or for leaving a level if `block_hash` is zero.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub voter: VerifyingKeyBytes,
    pub epoch_id: EpochId,
    pub height: BlockHeight,
    pub level: Level,
    pub block_hash: CryptoHash,
    pub signature: SignatureBytes,
}

impl Vote {
    /// Create a `Vote` signed by `keypair`.
    pub fn new(
        keypair: &Keypair,
        epoch_id: EpochId,
        height: BlockHeight,
        level: Level,
        block_hash: CryptoHash,
    ) -> Vote {
        let message = Self::signing_bytes(epoch_id, height, level, block_hash);
        Vote {
            voter: VerifyingKeyBytes::new(keypair.public().to_bytes()),
            epoch_id,
            height,
            level,
            block_hash,
            signature: keypair.sign(&message),
        }
    }

    /// The bytes a voter signs over.
    pub fn signing_bytes(
        epoch_id: EpochId,
        height: BlockHeight,
        level: Level,
        block_hash: CryptoHash,
    ) -> Vec<u8> {
        (epoch_id, height, level, block_hash).try_to_vec().unwrap()
    }

    pub fn message(&self) -> Vec<u8> {
        Self::signing_bytes(self.epoch_id, self.height, self.level, self.block_hash)
    }

    /// Verify that `signature` was created by `verifying_key` over [`message`](Self::message).
    pub fn is_correct(&self, verifying_key: &VerifyingKey) -> bool {
        let signature = Signature::from_bytes(&self.signature.bytes());
        verifying_key.verify(&self.message(), &signature).is_ok()
    }
}

/// Shared accessors of the two certificate kinds.
pub trait Certificate {
    fn height(&self) -> BlockHeight;

    fn level(&self) -> Level;

    fn votes(&self) -> &[Vote];

    /// Smallest number of distinct validators, out of `validator_count`, that forms a quorum: strictly
    /// more than two thirds.
    fn quorum(validator_count: usize) -> usize {
        validator_count * 2 / 3 + 1
    }
}

/// Proof that at least a quorum of validators voted for the block `block_hash` at `height` in `level`.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct QuorumCertificate {
    pub epoch_id: EpochId,
    pub height: BlockHeight,
    pub level: Level,
    pub block_hash: CryptoHash,
    pub votes: Vec<Vote>,
}

impl QuorumCertificate {
    /// A certificate with no votes, used by tests and by callers that only need to move the
    /// Pacemaker.
    pub fn unsigned(
        epoch_id: EpochId,
        height: BlockHeight,
        level: Level,
        block_hash: CryptoHash,
    ) -> QuorumCertificate {
        QuorumCertificate {
            epoch_id,
            height,
            level,
            block_hash,
            votes: Vec::new(),
        }
    }
}

impl Certificate for QuorumCertificate {
    fn height(&self) -> BlockHeight {
        self.height
    }

    fn level(&self) -> Level {
        self.level
    }

    fn votes(&self) -> &[Vote] {
        &self.votes
    }
}

/// Proof that at least a quorum of validators timed out in `level`.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TimeoutCertificate {
    pub epoch_id: EpochId,
    pub height: BlockHeight,
    pub level: Level,
    pub votes: Vec<Vote>,
}

impl TimeoutCertificate {
    pub fn unsigned(epoch_id: EpochId, height: BlockHeight, level: Level) -> TimeoutCertificate {
        TimeoutCertificate {
            epoch_id,
            height,
            level,
            votes: Vec::new(),
        }
    }
}

impl Certificate for TimeoutCertificate {
    fn height(&self) -> BlockHeight {
        self.height
    }

    fn level(&self) -> Level {
        self.level
    }

    fn votes(&self) -> &[Vote] {
        &self.votes
    }
}

#[test]
fn quorum_size_test() {
    assert_eq!(QuorumCertificate::quorum(1), 1);
    assert_eq!(QuorumCertificate::quorum(3), 3);
    assert_eq!(QuorumCertificate::quorum(4), 3);
    assert_eq!(QuorumCertificate::quorum(7), 5);
    assert_eq!(TimeoutCertificate::quorum(10), 7);
}
