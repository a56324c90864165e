/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types used by the block verifier and published by it on the message bus.

use crate::{
    pluggables::{AccessControlError, SimulateError},
    proposal_cache::ProposalCacheError,
    types::{
        block::{Block, RwSetMap},
        data_types::{BlockHeight, CryptoHash},
    },
};

/// Why a block is being verified.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VerifyMode {
    /// The block was proposed in the current round and this node is asked to vote on it.
    Consensus,
    /// The block was fetched from a peer while catching up. It must carry a valid quorum
    /// certificate.
    Sync,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VerifyResultCode {
    Success,
    Fail,
}

/// Outcome of verifying a block in [`VerifyMode::Consensus`], as published on the message bus.
#[derive(Clone, Debug)]
pub struct VerifyResult {
    pub code: VerifyResultCode,
    pub verified_block: Block,
    pub tx_rw_sets: RwSetMap,
}

impl VerifyResult {
    pub fn success(verified_block: Block, tx_rw_sets: RwSetMap) -> VerifyResult {
        VerifyResult {
            code: VerifyResultCode::Success,
            verified_block,
            tx_rw_sets,
        }
    }

    pub fn fail(verified_block: Block, tx_rw_sets: RwSetMap) -> VerifyResult {
        VerifyResult {
            code: VerifyResultCode::Fail,
            verified_block,
            tx_rw_sets,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == VerifyResultCode::Success
    }
}

/// Enumerates the ways verifying a block can fail.
#[derive(Debug)]
pub enum VerifyError {
    /// The block lacks its chain id, hash, or signature.
    EmptyBlock,

    /// A block with the same hash is being verified right now.
    ConcurrentVerify { block: CryptoHash },

    BlockHadBeenCommitted {
        current_height: BlockHeight,
        block_height: BlockHeight,
    },

    /// Neither the ledger nor the proposal cache holds the block's parent.
    NoPreBlock {
        height: BlockHeight,
        pre_hash: CryptoHash,
    },

    TxCapacityExceeded { capacity: u32, tx_count: u32 },

    /// The header's transaction count disagrees with the body.
    TxCountMismatch { header: u32, body: usize },

    TxDuplicate,

    BlockHashMismatch {
        expected: CryptoHash,
        got: CryptoHash,
    },

    PreHashMismatch {
        expected: CryptoHash,
        got: CryptoHash,
    },

    /// The pool did not produce every transaction of a turbo proposal in time.
    RecoverBlock {
        height: BlockHeight,
        found: usize,
        expected: usize,
    },

    Simulate(SimulateError),

    /// Simulation produced a number of read/write sets that disagrees with the header.
    SimulateTxCountMismatch { expected: u32, got: usize },

    /// The header was not signed by its proposer, or the proposer is not a consensus node.
    BlockSignature(AccessControlError),

    VoteSignature(AccessControlError),

    ProposalCache(ProposalCacheError),
}

impl From<SimulateError> for VerifyError {
    fn from(value: SimulateError) -> Self {
        VerifyError::Simulate(value)
    }
}

impl From<AccessControlError> for VerifyError {
    fn from(value: AccessControlError) -> Self {
        VerifyError::VoteSignature(value)
    }
}

impl From<ProposalCacheError> for VerifyError {
    fn from(value: ProposalCacheError) -> Self {
        VerifyError::ProposalCache(value)
    }
}
