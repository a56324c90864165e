/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory [`LedgerCache`].

use std::sync::RwLock;

use crate::{
    pluggables::{LedgerCache, LedgerCacheError},
    types::{block::Block, data_types::BlockHeight},
};

/// Keeps the last committed block in memory. Starts empty unless seeded with a genesis block.
pub struct MemLedgerCache {
    last_committed: RwLock<Option<Block>>,
}

impl MemLedgerCache {
    pub fn new(last_committed: Option<Block>) -> Self {
        Self {
            last_committed: RwLock::new(last_committed),
        }
    }
}

impl LedgerCache for MemLedgerCache {
    fn last_committed_block(&self) -> Option<Block> {
        self.last_committed.read().unwrap().clone()
    }

    fn set_last_committed_block(&self, block: Block) {
        *self.last_committed.write().unwrap() = Some(block);
    }

    fn current_height(&self) -> Result<BlockHeight, LedgerCacheError> {
        self.last_committed
            .read()
            .unwrap()
            .as_ref()
            .map(|block| block.height())
            .ok_or(LedgerCacheError::NoCommittedBlock)
    }
}
