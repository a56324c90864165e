/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structural checks on a candidate block, and the helpers that prepare a block for them.
//!
//! None of the checks here execute transactions. They are cheap enough to run before the
//! transaction scheduler is called, and each one maps to exactly one [`VerifyError`] variant.

use std::{collections::HashSet, thread};

use crate::{
    pluggables::{ChainConf, LedgerCache, SimulationOutcome, TxPool},
    proposal_cache::ProposalCache,
    types::{
        block::{Block, Transaction},
        crypto_primitives::HashType,
        data_types::{BlockHeight, CryptoHash, TxId},
    },
};

use super::types::{VerifyError, VerifyMode};

/// Find the block `block` extends, refusing blocks at or below the committed height.
///
/// The parent is the ledger's last committed block if `block` is the next height, and otherwise a
/// cached proposal one height below with a matching hash.
pub(crate) fn fetch_last_block(
    block: &Block,
    ledger_cache: &dyn LedgerCache,
    proposal_cache: &ProposalCache,
) -> Result<Block, VerifyError> {
    let current_height = ledger_cache.current_height().unwrap_or(BlockHeight::new(0));
    if current_height >= block.height() {
        return Err(VerifyError::BlockHadBeenCommitted {
            current_height,
            block_height: block.height(),
        });
    }

    let last_block = if current_height + 1 == block.height() {
        ledger_cache.last_committed_block()
    } else {
        proposal_cache
            .get_proposed_block_by_hash_and_height(&block.pre_hash(), block.height().prev())
            .map(|proposal| proposal.block)
    };
    last_block.ok_or(VerifyError::NoPreBlock {
        height: block.height().prev(),
        pre_hash: block.pre_hash(),
    })
}

/// Rebuild the full transactions of a proposal that travelled with transaction stubs.
///
/// Only applies when message turbo is on and the block is not being synced; otherwise the block is
/// returned unchanged. The pool is asked up to `retry_time` times, `retry_interval` apart.
pub(crate) fn recover_block(
    block: &Block,
    mode: VerifyMode,
    chain_conf: &dyn ChainConf,
    tx_pool: &dyn TxPool,
) -> Result<Block, VerifyError> {
    let turbo = chain_conf.message_turbo();
    if !turbo.enabled || mode == VerifyMode::Sync {
        return Ok(block.clone());
    }

    let tx_ids = block.tx_ids();
    let attempts = turbo.retry_time.max(1);
    let mut found = tx_ids.len();
    for attempt in 1..=attempts {
        let mut txs = tx_pool.get_txs_by_tx_ids(&tx_ids);
        if tx_ids.iter().all(|tx_id| txs.contains_key(tx_id)) {
            let mut recovered = block.clone();
            recovered.txs = tx_ids
                .iter()
                .filter_map(|tx_id| txs.remove(tx_id))
                .collect();
            return Ok(recovered);
        }
        found = txs.len();
        log::debug!(
            "recovering block {}: found {} of {} txs, attempt {}",
            block.height(),
            found,
            tx_ids.len(),
            attempt
        );
        if attempt < attempts {
            thread::sleep(turbo.retry_interval);
        }
    }

    Err(VerifyError::RecoverBlock {
        height: block.height(),
        found,
        expected: tx_ids.len(),
    })
}

pub(crate) fn check_tx_capacity(block: &Block, capacity: u32) -> Result<(), VerifyError> {
    if block.header.tx_count > capacity {
        return Err(VerifyError::TxCapacityExceeded {
            capacity,
            tx_count: block.header.tx_count,
        });
    }
    Ok(())
}

pub(crate) fn check_tx_count(block: &Block) -> Result<(), VerifyError> {
    if block.header.tx_count as usize != block.txs.len() {
        return Err(VerifyError::TxCountMismatch {
            header: block.header.tx_count,
            body: block.txs.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_pre_hash(block: &Block, expected: &CryptoHash) -> Result<(), VerifyError> {
    if &block.pre_hash() != expected {
        return Err(VerifyError::PreHashMismatch {
            expected: *expected,
            got: block.pre_hash(),
        });
    }
    Ok(())
}

pub(crate) fn check_block_hash(block: &Block, hash_type: HashType) -> Result<(), VerifyError> {
    let expected = block.compute_hash(hash_type);
    if expected != block.hash() {
        return Err(VerifyError::BlockHashMismatch {
            expected,
            got: block.hash(),
        });
    }
    Ok(())
}

pub(crate) fn check_tx_duplicate(block: &Block) -> Result<(), VerifyError> {
    let mut seen: HashSet<&TxId> = HashSet::with_capacity(block.txs.len());
    if block.txs.iter().all(|tx| seen.insert(&tx.id)) {
        Ok(())
    } else {
        Err(VerifyError::TxDuplicate)
    }
}

/// Simulation must produce exactly one read/write set per transaction in the header.
pub(crate) fn check_simulation(
    block: &Block,
    outcome: &SimulationOutcome,
) -> Result<(), VerifyError> {
    if block.header.tx_count as usize != outcome.rw_sets.len() {
        return Err(VerifyError::SimulateTxCountMismatch {
            expected: block.header.tx_count,
            got: outcome.rw_sets.len(),
        });
    }
    Ok(())
}

/// Transactions of `cut` blocks that should go back to the pool: every one that `kept` does not
/// also include.
pub(crate) fn txs_to_retry(cut: &[Block], kept: &Block) -> Vec<Transaction> {
    let kept_ids: HashSet<&TxId> = kept.txs.iter().map(|tx| &tx.id).collect();
    cut.iter()
        .flat_map(|block| block.txs.iter())
        .filter(|tx| !kept_ids.contains(&tx.id))
        .cloned()
        .collect()
}

#[cfg(test)]
fn test_block(height: u64, txs: &[&str]) -> Block {
    use crate::types::block::BlockHeader;

    let mut block = Block {
        header: BlockHeader {
            chain_id: String::from("chain1"),
            height: BlockHeight::new(height),
            pre_block_hash: CryptoHash::new([height as u8; 32]),
            block_hash: CryptoHash::zero(),
            timestamp: 0,
            proposer: Vec::new(),
            tx_count: txs.len() as u32,
            tx_root: CryptoHash::zero(),
            dag_hash: CryptoHash::zero(),
            rw_set_root: CryptoHash::zero(),
            signature: vec![1],
        },
        txs: txs
            .iter()
            .map(|id| Transaction::new(TxId::new(*id), id.as_bytes().to_vec()))
            .collect(),
        justify: None,
    };
    block.header.block_hash = block.compute_hash(HashType::Sha256);
    block
}

#[test]
fn structural_checks_test() {
    let block = test_block(3, &["a", "b"]);
    assert!(check_tx_capacity(&block, 2).is_ok());
    assert!(matches!(
        check_tx_capacity(&block, 1),
        Err(VerifyError::TxCapacityExceeded { capacity: 1, tx_count: 2 })
    ));
    assert!(check_tx_count(&block).is_ok());
    assert!(check_block_hash(&block, HashType::Sha256).is_ok());
    assert!(check_tx_duplicate(&block).is_ok());
    assert!(check_pre_hash(&block, &CryptoHash::new([3u8; 32])).is_ok());
    assert!(check_pre_hash(&block, &CryptoHash::zero()).is_err());

    let mut tampered = block.clone();
    tampered.txs.pop();
    assert!(matches!(
        check_tx_count(&tampered),
        Err(VerifyError::TxCountMismatch { header: 2, body: 1 })
    ));
    tampered.header.timestamp = 1;
    assert!(matches!(
        check_block_hash(&tampered, HashType::Sha256),
        Err(VerifyError::BlockHashMismatch { .. })
    ));

    let duplicated = test_block(3, &["a", "a"]);
    assert!(matches!(
        check_tx_duplicate(&duplicated),
        Err(VerifyError::TxDuplicate)
    ));
}

#[test]
fn txs_to_retry_skips_kept_txs_test() {
    let kept = test_block(4, &["a", "b"]);
    let cut = [test_block(4, &["b", "c"]), test_block(4, &["d"])];

    let retry: Vec<TxId> = txs_to_retry(&cut, &kept)
        .into_iter()
        .map(|tx| tx.id)
        .collect();
    assert_eq!(retry, vec![TxId::new("c"), TxId::new("d")]);
}
