/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Main type: [`BlockVerifier`].

use std::{
    sync::{mpsc::Sender, Arc},
    time::{Instant, SystemTime},
};

use crate::{
    events::{Event, VerifyBlockEvent},
    messages::Message,
    msg_bus::MessageBus,
    pluggables::{Collaborators, SimulationOutcome},
    proposal_cache::{BlockProposal, ProposalCache},
    types::block::{Block, RwSetMap},
};

use super::{
    in_flight::InFlightSet,
    types::{VerifyError, VerifyMode, VerifyResult},
    validation::{
        check_block_hash, check_pre_hash, check_simulation, check_tx_capacity, check_tx_count,
        check_tx_duplicate, fetch_last_block, recover_block, txs_to_retry,
    },
};

/// Decides whether candidate blocks extend the chain, caches the ones that do, and tells the
/// consensus algorithm about the outcome.
///
/// `BlockVerifier` is shared between threads. Verifications of different blocks run in parallel;
/// a second verification of a block whose hash is already being verified fails immediately with
/// [`VerifyError::ConcurrentVerify`].
pub struct BlockVerifier {
    collaborators: Collaborators,
    proposal_cache: Arc<ProposalCache>,
    msg_bus: MessageBus,
    in_flight: InFlightSet,
    event_publisher: Option<Sender<Event>>,
}

impl BlockVerifier {
    pub fn new(
        collaborators: Collaborators,
        proposal_cache: Arc<ProposalCache>,
        msg_bus: MessageBus,
        event_publisher: Option<Sender<Event>>,
    ) -> BlockVerifier {
        BlockVerifier {
            collaborators,
            proposal_cache,
            msg_bus,
            in_flight: InFlightSet::new(),
            event_publisher,
        }
    }

    /// Verify `block`.
    ///
    /// In [`VerifyMode::Consensus`], the outcome of every verification that reaches validation is also
    /// published on the message bus as a [`VerifyResult`]. Errors are returned to the caller in both
    /// modes.
    pub fn verify_block(&self, block: &Block, mode: VerifyMode) -> Result<(), VerifyError> {
        let start = Instant::now();

        // 1. Reject blocks missing their identifying fields.
        if block.is_empty() {
            log::error!("verify received an empty block at height {}", block.height());
            return Err(VerifyError::EmptyBlock);
        }
        log::debug!(
            "verify received block {} at height {}, tx count {}, mode {:?}",
            block.hash(),
            block.height(),
            block.header.tx_count,
            mode
        );

        // 2. Only one thread verifies a given hash at a time.
        let _guard = match self.in_flight.guard(block.hash()) {
            Some(guard) => guard,
            None => {
                log::warn!(
                    "block {} at height {} is being verified concurrently, yield",
                    block.hash(),
                    block.height()
                );
                return Err(VerifyError::ConcurrentVerify {
                    block: block.hash(),
                });
            }
        };

        // 3. A block that has been verified before is served from the proposal cache.
        let chain_conf = &self.collaborators.chain_conf;
        if let Some(proposal) = self.proposal_cache.get_proposed_block(block) {
            if !chain_conf.is_solo() || chain_conf.sql_enabled() {
                log::info!(
                    "verify success repeat, block {} at height {}, total {:?}",
                    block.hash(),
                    block.height(),
                    start.elapsed()
                );
                return self.verify_repeat(block, proposal, mode);
            }
        }

        // 4. Find the block this one extends.
        let last_block = fetch_last_block(
            block,
            self.collaborators.ledger_cache.as_ref(),
            &self.proposal_cache,
        )?;

        // 5. Rebuild transaction bodies stripped by message turbo.
        let block = recover_block(
            block,
            mode,
            chain_conf.as_ref(),
            self.collaborators.tx_pool.as_ref(),
        )?;

        // 6. and 7. Check structure, then execute.
        let outcome = match self.validate_block(&block, &last_block) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!(
                    "verify failed, block {} at height {} with pre hash {}: {:?}",
                    block.hash(),
                    block.height(),
                    block.pre_hash(),
                    err
                );
                if mode == VerifyMode::Consensus {
                    self.msg_bus
                        .publish(VerifyResult::fail(block.clone(), RwSetMap::new()).into());
                }
                self.publish_verify_event(&block, mode, false, false);
                if let Err(rollback_err) = self
                    .collaborators
                    .store_helper
                    .rollback(&block, self.collaborators.store.as_ref())
                {
                    log::error!(
                        "rolling back block {} at height {} failed: {:?}",
                        block.hash(),
                        block.height(),
                        rollback_err
                    );
                }
                return Err(err);
            }
        };

        // 8. Synced blocks must carry a valid quorum certificate.
        if mode == VerifyMode::Sync {
            if let Err(err) = self.collaborators.access_control.verify_vote_signatures(&block) {
                log::warn!(
                    "verify failed, block {} at height {}: vote signatures {:?}",
                    block.hash(),
                    block.height(),
                    err
                );
                return Err(err.into());
            }
        }

        // 9. Cache the block and mark its transactions pending.
        if !chain_conf.is_solo() {
            self.proposal_cache.set_proposed_block(
                block.clone(),
                outcome.rw_sets.clone(),
                outcome.events,
                false,
            )?;
        }
        self.collaborators
            .tx_pool
            .add_txs_to_pending_cache(block.txs.clone(), block.height());

        // 10. Tell the consensus algorithm.
        if mode == VerifyMode::Consensus {
            self.msg_bus
                .publish(VerifyResult::success(block.clone(), outcome.rw_sets).into());
        }
        self.publish_verify_event(&block, mode, true, false);
        log::info!(
            "verify success, block {} at height {}, total {:?}",
            block.hash(),
            block.height(),
            start.elapsed()
        );

        Ok(())
    }

    /// Republish the cached outcome of a block verified before, and resolve the fork at its parent's
    /// height in favor of its parent.
    fn verify_repeat(
        &self,
        block: &Block,
        proposal: BlockProposal,
        mode: VerifyMode,
    ) -> Result<(), VerifyError> {
        if mode == VerifyMode::Consensus {
            self.msg_bus.publish(Message::VerifyResult(VerifyResult::success(
                block.clone(),
                proposal.rw_sets.clone(),
            )));
        }
        self.publish_verify_event(block, mode, true, true);

        let parent = match self
            .proposal_cache
            .get_proposed_block_by_hash_and_height(&block.pre_hash(), block.height().prev())
        {
            Some(parent) => parent.block,
            None => {
                log::debug!(
                    "no parent found at height {} with hash {}",
                    block.height().prev(),
                    block.pre_hash()
                );
                return Ok(());
            }
        };

        let cut = self
            .proposal_cache
            .keep_proposed_block(&parent.hash(), parent.height());
        if !cut.is_empty() {
            log::info!(
                "cut siblings of block {} at height {}",
                parent.hash(),
                parent.height()
            );
            let retry = txs_to_retry(&cut, &parent);
            if !retry.is_empty() {
                self.collaborators
                    .tx_pool
                    .retry_and_remove_txs(retry, Vec::new());
            }
        }

        let is_self_proposed = self.proposal_cache.is_proposed_at(block.height());
        self.proposal_cache.set_proposed_block(
            block.clone(),
            proposal.rw_sets,
            proposal.events,
            is_self_proposed,
        )?;
        Ok(())
    }

    /// Run every check that does not need a quorum certificate, ending with executing the block.
    fn validate_block(
        &self,
        block: &Block,
        last_block: &Block,
    ) -> Result<SimulationOutcome, VerifyError> {
        let chain_conf = &self.collaborators.chain_conf;
        check_tx_capacity(block, chain_conf.block_tx_capacity())?;
        check_tx_count(block)?;
        self.check_pre_block(block, last_block)?;
        check_block_hash(block, chain_conf.hash_type())?;
        self.collaborators
            .access_control
            .verify_block_signature(block)
            .map_err(VerifyError::BlockSignature)?;

        if block.txs.is_empty() {
            return Ok(SimulationOutcome::default());
        }
        check_tx_duplicate(block)?;

        let outcome = self
            .collaborators
            .tx_scheduler
            .simulate_with_dag(block, last_block)?;
        check_simulation(block, &outcome)?;
        Ok(outcome)
    }

    /// Check that `block` links to `last_block`, then cut the siblings of `last_block`.
    fn check_pre_block(&self, block: &Block, last_block: &Block) -> Result<(), VerifyError> {
        if block.height() == last_block.height() + 1 {
            check_pre_hash(block, &last_block.hash())?;
        } else if self
            .proposal_cache
            .get_proposed_block_by_hash_and_height(&block.pre_hash(), block.height().prev())
            .is_none()
        {
            return Err(VerifyError::NoPreBlock {
                height: block.height().prev(),
                pre_hash: block.pre_hash(),
            });
        }

        let cut = self
            .proposal_cache
            .keep_proposed_block(&last_block.hash(), last_block.height());
        if !cut.is_empty() {
            let cut_txs = cut.into_iter().flat_map(|block| block.txs).collect();
            self.collaborators
                .tx_pool
                .retry_and_remove_txs(cut_txs, Vec::new());
        }
        Ok(())
    }

    fn publish_verify_event(&self, block: &Block, mode: VerifyMode, success: bool, repeat: bool) {
        Event::VerifyBlock(VerifyBlockEvent {
            timestamp: SystemTime::now(),
            block: block.hash(),
            height: block.height(),
            mode,
            success,
            repeat,
        })
        .publish(&self.event_publisher);
    }

    pub fn proposal_cache(&self) -> &Arc<ProposalCache> {
        &self.proposal_cache
    }
}
