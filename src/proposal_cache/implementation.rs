/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Main type: [`ProposalCache`].

use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Arc, RwLock},
    time::SystemTime,
};

use crate::{
    events::{CacheProposalEvent, CutBlocksEvent, DiscardBlocksEvent, Event},
    pluggables::LedgerCache,
    types::{
        block::{Block, ContractEventMap, RwSetMap},
        data_types::{BlockHeight, CryptoHash},
    },
};

use super::types::{BlockProposal, ProposalCacheError};

/// Height -> fingerprint -> proposal.
type ProposalMap = HashMap<BlockHeight, HashMap<CryptoHash, BlockProposal>>;

/// Cache of every candidate block at heights above the committed height. One per chain.
///
/// All state is behind one read/write lock. No method calls out to another component while the
/// lock is held: the committed height is read from the [`LedgerCache`] before locking.
pub struct ProposalCache {
    proposals: RwLock<ProposalMap>,
    ledger_cache: Arc<dyn LedgerCache>,
    event_publisher: Option<Sender<Event>>,
}

impl ProposalCache {
    pub fn new(
        ledger_cache: Arc<dyn LedgerCache>,
        event_publisher: Option<Sender<Event>>,
    ) -> ProposalCache {
        ProposalCache {
            proposals: RwLock::new(HashMap::new()),
            ledger_cache,
            event_publisher,
        }
    }

    /// Cache `block` with its execution results, replacing any entry with the same fingerprint.
    ///
    /// Fails if a block is already committed at the block's height, unless the height is 0.
    pub fn set_proposed_block(
        &self,
        block: Block,
        rw_sets: RwSetMap,
        events: ContractEventMap,
        is_self_proposed: bool,
    ) -> Result<(), ProposalCacheError> {
        let height = block.height();
        if let Ok(current_height) = self.ledger_cache.current_height() {
            if current_height >= height && height != BlockHeight::new(0) {
                return Err(ProposalCacheError::HeightCommitted {
                    current_height,
                    block_height: height,
                });
            }
        }

        let block_hash = block.hash();
        let proposal = BlockProposal {
            block,
            rw_sets,
            events,
            is_self_proposed,
            has_proposed_this_round: true,
        };
        self.proposals
            .write()
            .unwrap()
            .entry(height)
            .or_default()
            .insert(proposal.block.fingerprint(), proposal);

        Event::CacheProposal(CacheProposalEvent {
            timestamp: SystemTime::now(),
            block: block_hash,
            height,
            is_self_proposed,
        })
        .publish(&self.event_publisher);

        Ok(())
    }

    /// Look up the cached entry with the same fingerprint as `block`.
    pub fn get_proposed_block(&self, block: &Block) -> Option<BlockProposal> {
        self.proposals
            .read()
            .unwrap()
            .get(&block.height())
            .and_then(|at_height| at_height.get(&block.fingerprint()))
            .cloned()
    }

    /// Every cached block at `height`, in no particular order.
    pub fn get_proposed_blocks_at(&self, height: BlockHeight) -> Vec<Block> {
        self.proposals
            .read()
            .unwrap()
            .get(&height)
            .map(|at_height| {
                at_height
                    .values()
                    .map(|proposal| proposal.block.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Look up a cached block by its final hash.
    pub fn get_proposed_block_by_hash_and_height(
        &self,
        hash: &CryptoHash,
        height: BlockHeight,
    ) -> Option<BlockProposal> {
        self.proposals
            .read()
            .unwrap()
            .get(&height)?
            .values()
            .find(|proposal| &proposal.block.hash() == hash)
            .cloned()
    }

    /// The block this node proposed at `height`, if any.
    pub fn get_self_proposed_block_at(&self, height: BlockHeight) -> Option<Block> {
        self.proposals
            .read()
            .unwrap()
            .get(&height)?
            .values()
            .find(|proposal| proposal.is_self_proposed)
            .map(|proposal| proposal.block.clone())
    }

    /// Whether any block is cached at `height`.
    pub fn has_proposed_block_at(&self, height: BlockHeight) -> bool {
        self.proposals
            .read()
            .unwrap()
            .get(&height)
            .is_some_and(|at_height| !at_height.is_empty())
    }

    /// Whether this node already proposed at `height` in the current round.
    pub fn is_proposed_at(&self, height: BlockHeight) -> bool {
        self.proposals
            .read()
            .unwrap()
            .get(&height)
            .is_some_and(|at_height| {
                at_height
                    .values()
                    .any(|proposal| proposal.is_self_proposed && proposal.has_proposed_this_round)
            })
    }

    /// Mark the self-proposed block at `height` as proposed in the current round.
    pub fn set_proposed_at(&self, height: BlockHeight) {
        self.set_has_proposed_this_round(height, true)
    }

    /// Allow this node to propose again at `height`, e.g., after a level change.
    pub fn reset_proposed_at(&self, height: BlockHeight) {
        self.set_has_proposed_this_round(height, false)
    }

    fn set_has_proposed_this_round(&self, height: BlockHeight, value: bool) {
        let mut proposals = self.proposals.write().unwrap();
        if let Some(proposal) = proposals
            .get_mut(&height)
            .and_then(|at_height| at_height.values_mut().find(|p| p.is_self_proposed))
        {
            proposal.has_proposed_this_round = value;
        }
    }

    /// Remove every block at `height` whose hash is not `hash`, and return the removed blocks.
    pub fn keep_proposed_block(&self, hash: &CryptoHash, height: BlockHeight) -> Vec<Block> {
        let cut: Vec<Block> = {
            let mut proposals = self.proposals.write().unwrap();
            match proposals.get_mut(&height) {
                Some(at_height) => {
                    let losers: Vec<CryptoHash> = at_height
                        .iter()
                        .filter(|(_, proposal)| &proposal.block.hash() != hash)
                        .map(|(fingerprint, _)| *fingerprint)
                        .collect();
                    losers
                        .iter()
                        .filter_map(|fingerprint| at_height.remove(fingerprint))
                        .map(|proposal| proposal.block)
                        .collect()
                }
                None => Vec::new(),
            }
        };

        if !cut.is_empty() {
            Event::CutBlocks(CutBlocksEvent {
                timestamp: SystemTime::now(),
                kept: *hash,
                height,
                cut: cut.iter().map(|block| block.hash()).collect(),
            })
            .publish(&self.event_publisher);
        }
        cut
    }

    /// Remove every block above `base_height`, and return the removed blocks.
    pub fn discard_above_height(&self, base_height: BlockHeight) -> Vec<Block> {
        let discarded: Vec<Block> = {
            let mut proposals = self.proposals.write().unwrap();
            let above: Vec<BlockHeight> = proposals
                .keys()
                .filter(|height| **height > base_height)
                .copied()
                .collect();
            above
                .iter()
                .filter_map(|height| proposals.remove(height))
                .flat_map(|at_height| at_height.into_values().map(|proposal| proposal.block))
                .collect()
        };

        if !discarded.is_empty() {
            Event::DiscardBlocks(DiscardBlocksEvent {
                timestamp: SystemTime::now(),
                base_height,
                discarded: discarded.iter().map(|block| block.hash()).collect(),
            })
            .publish(&self.event_publisher);
        }
        discarded
    }

    /// Remove everything cached at `height`.
    pub fn clear_proposed_block_at(&self, height: BlockHeight) {
        self.proposals.write().unwrap().remove(&height);
    }

    /// Remove the entry with the same fingerprint as `block`.
    pub fn clear_the_block(&self, block: &Block) {
        let mut proposals = self.proposals.write().unwrap();
        if let Some(at_height) = proposals.get_mut(&block.height()) {
            at_height.remove(&block.fingerprint());
        }
    }
}
