/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumeration of the notifications that cross component boundaries on the
//! [message bus](crate::msg_bus).

use crate::{
    block_verifier::VerifyResult,
    types::{
        block::Block,
        data_types::{BlockHeight, CryptoHash},
    },
};

/// Every notification the chained-BFT core sends or receives.
#[derive(Clone, Debug)]
pub enum Message {
    /// Whether this node may propose at all.
    ProposeState(bool),

    /// See: [`BuildProposal`].
    BuildProposal(BuildProposal),

    /// A block was produced or received and needs verification.
    ProposedBlock(Block),

    /// An explicit request to verify a block.
    VerifyBlock(Block),

    /// The outcome of a verification, for the consensus algorithm to vote or commit on.
    VerifyResult(VerifyResult),

    /// A block the consensus algorithm decided to commit.
    CommitBlock(Block),
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Message::ProposeState(_) => Topic::ProposeState,
            Message::BuildProposal(_) => Topic::BuildProposal,
            Message::ProposedBlock(_) => Topic::ProposedBlock,
            Message::VerifyBlock(_) => Topic::VerifyBlock,
            Message::VerifyResult(_) => Topic::VerifyResult,
            Message::CommitBlock(_) => Topic::CommitBlock,
        }
    }
}

impl From<BuildProposal> for Message {
    fn from(value: BuildProposal) -> Self {
        Message::BuildProposal(value)
    }
}

impl From<VerifyResult> for Message {
    fn from(value: VerifyResult) -> Self {
        Message::VerifyResult(value)
    }
}

/// Request to build a block at `height` on top of `pre_hash`. Sent to every node at the start of a
/// level; only the leader of the level has `is_proposer` set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildProposal {
    pub height: BlockHeight,
    pub pre_hash: CryptoHash,
    pub is_proposer: bool,
}

/// What subscribers register for. One topic per [`Message`] variant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Topic {
    ProposeState,
    BuildProposal,
    ProposedBlock,
    VerifyBlock,
    VerifyResult,
    CommitBlock,
}
