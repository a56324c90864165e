/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persisting blocks the consensus algorithm decided to commit.
//!
//! [`BlockCommitter::add_block`] is the only way the ledger advances. Commits are serialized: at most
//! one block is being added at any time, and each must extend the last committed block directly.

use std::{
    collections::HashSet,
    sync::{mpsc::Sender, Arc, Mutex},
    time::{Instant, SystemTime},
};

use crate::{
    block_verifier::{BlockVerifier, VerifyError, VerifyMode},
    events::{CommitBlockEvent, Event},
    pluggables::{Collaborators, StoreError},
    proposal_cache::ProposalCache,
    types::{
        block::{Block, Transaction},
        data_types::{BlockHeight, CryptoHash, TxId},
    },
};

pub struct BlockCommitter {
    collaborators: Collaborators,
    proposal_cache: Arc<ProposalCache>,
    verifier: Arc<BlockVerifier>,
    commit_lock: Mutex<()>,
    event_publisher: Option<Sender<Event>>,
}

impl BlockCommitter {
    pub fn new(
        collaborators: Collaborators,
        proposal_cache: Arc<ProposalCache>,
        verifier: Arc<BlockVerifier>,
        event_publisher: Option<Sender<Event>>,
    ) -> BlockCommitter {
        BlockCommitter {
            collaborators,
            proposal_cache,
            verifier,
            commit_lock: Mutex::new(()),
            event_publisher,
        }
    }

    /// Commit `block`, which must directly extend the last committed block.
    ///
    /// The read/write sets saved with the block are the ones cached when it was verified. A block that
    /// was never verified by this node is verified in [sync mode](VerifyMode::Sync) first. On failure,
    /// the store's rollback hook is invoked before the error is returned.
    pub fn add_block(&self, block: &Block) -> Result<(), CommitError> {
        let result = self.try_add_block(block);
        if let Err(err) = &result {
            match err {
                CommitError::BlockHadBeenCommitted { .. } => {
                    log::warn!("add block {} at height {}: {:?}", block.hash(), block.height(), err)
                }
                _ => log::error!("add block {} at height {}: {:?}", block.hash(), block.height(), err),
            }
            if let Err(rollback_err) = self
                .collaborators
                .store_helper
                .rollback(block, self.collaborators.store.as_ref())
            {
                log::error!(
                    "rolling back block at height {} failed: {:?}",
                    block.height(),
                    rollback_err
                );
            }
        }
        result
    }

    fn try_add_block(&self, block: &Block) -> Result<(), CommitError> {
        let start = Instant::now();
        log::debug!(
            "add block {} at height {} with pre hash {}, tx count {}",
            block.hash(),
            block.height(),
            block.pre_hash(),
            block.header.tx_count
        );
        let _commit_guard = self.commit_lock.lock().unwrap();

        // 1. The block must extend the last committed block.
        self.check_block_legal(block)?;

        // 2. Take the execution results from the proposal cache, verifying the block if they are
        // not there yet.
        let proposal = match self.proposal_cache.get_proposed_block(block) {
            Some(proposal) => proposal,
            None => {
                self.verifier.verify_block(block, VerifyMode::Sync)?;
                self.proposal_cache
                    .get_proposed_block(block)
                    .ok_or(CommitError::NotVerified {
                        height: block.height(),
                        block: block.hash(),
                    })?
            }
        };
        let mut committed = proposal.block;
        if self.collaborators.chain_conf.message_turbo().enabled {
            // The proposer cached its block before the header was final.
            committed.header = block.header.clone();
            committed.justify = block.justify.clone();
        }

        // 3. Persist and advance the ledger.
        self.collaborators
            .store
            .save_block(&committed, &proposal.rw_sets, &proposal.events)?;
        self.collaborators
            .ledger_cache
            .set_last_committed_block(committed.clone());

        // 4. Return the transactions of losing siblings to the pool and drop the committed ones.
        let height = committed.height();
        let retry = self.txs_to_retry(&committed);
        log::info!(
            "remove {} txs and retry {} txs after committing height {}",
            committed.txs.len(),
            retry.len(),
            height
        );
        self.collaborators
            .tx_pool
            .retry_and_remove_txs(retry, committed.txs.clone());

        // 5. Nothing at this height can be proposed anymore.
        self.proposal_cache.clear_proposed_block_at(height);

        Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            block: committed.hash(),
            height,
            tx_count: committed.header.tx_count,
        })
        .publish(&self.event_publisher);
        log::info!(
            "commit block {} at height {}, tx count {}, total {:?}",
            committed.hash(),
            height,
            committed.header.tx_count,
            start.elapsed()
        );

        Ok(())
    }

    fn check_block_legal(&self, block: &Block) -> Result<(), CommitError> {
        let last_block = self
            .collaborators
            .ledger_cache
            .last_committed_block()
            .ok_or(CommitError::NoLastBlock)?;

        if last_block.height() >= block.height() {
            return Err(CommitError::BlockHadBeenCommitted {
                current_height: last_block.height(),
                block_height: block.height(),
            });
        }
        if block.height() != last_block.height() + 1 {
            return Err(CommitError::HeightGap {
                current_height: last_block.height(),
                block_height: block.height(),
            });
        }
        if block.pre_hash() != last_block.hash() {
            return Err(CommitError::PreHashMismatch {
                expected: last_block.hash(),
                got: block.pre_hash(),
            });
        }
        let expected = block.compute_hash(self.collaborators.chain_conf.hash_type());
        if expected != block.hash() {
            return Err(CommitError::BlockHashMismatch {
                expected,
                got: block.hash(),
            });
        }
        Ok(())
    }

    /// Transactions of the other proposals at the committed height that the committed block does
    /// not include.
    fn txs_to_retry(&self, committed: &Block) -> Vec<Transaction> {
        let kept: HashSet<&TxId> = committed.txs.iter().map(|tx| &tx.id).collect();
        self.proposal_cache
            .get_proposed_blocks_at(committed.height())
            .into_iter()
            .filter(|sibling| sibling.hash() != committed.hash())
            .flat_map(|sibling| sibling.txs)
            .filter(|tx| !kept.contains(&tx.id))
            .collect()
    }
}

/// Enumerates the ways committing a block can fail.
#[derive(Debug)]
pub enum CommitError {
    NoLastBlock,
    BlockHadBeenCommitted {
        current_height: BlockHeight,
        block_height: BlockHeight,
    },
    /// The block skips one or more heights.
    HeightGap {
        current_height: BlockHeight,
        block_height: BlockHeight,
    },
    PreHashMismatch {
        expected: CryptoHash,
        got: CryptoHash,
    },
    BlockHashMismatch {
        expected: CryptoHash,
        got: CryptoHash,
    },
    Verify(VerifyError),
    /// Verification succeeded but did not cache the block, as on single-node chains.
    NotVerified {
        height: BlockHeight,
        block: CryptoHash,
    },
    Store(StoreError),
}

impl From<VerifyError> for CommitError {
    fn from(value: VerifyError) -> Self {
        CommitError::Verify(value)
    }
}

impl From<StoreError> for CommitError {
    fn from(value: StoreError) -> Self {
        CommitError::Store(value)
    }
}
