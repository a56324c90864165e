/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::types::{
    block::{Block, ContractEventMap, RwSetMap},
    data_types::BlockHeight,
};

/// A cached candidate block together with what executing it produced.
#[derive(Clone, Debug)]
pub struct BlockProposal {
    pub block: Block,
    pub rw_sets: RwSetMap,
    pub events: ContractEventMap,
    /// Whether this node built the block.
    pub is_self_proposed: bool,
    /// Whether this node already proposed at this height in the current round.
    pub has_proposed_this_round: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProposalCacheError {
    /// The block's height is already committed.
    HeightCommitted {
        current_height: BlockHeight,
        block_height: BlockHeight,
    },
}
