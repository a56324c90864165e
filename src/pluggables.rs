/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for the collaborators the chained-BFT core calls out to.
//!
//! The core does not execute transactions, persist blocks, run a transaction pool, or check
//! signatures itself. Each of these concerns is behind a trait in this module, and implementations
//! are shared between components as `Arc<dyn Trait>`. Every implementation must be internally
//! thread-safe: the core calls into them from multiple threads, and never while holding any of its
//! own locks.

use std::{collections::HashMap, sync::Arc};

use typed_builder::TypedBuilder;

use crate::{
    config::{ConsensusType, MessageTurbo},
    types::{
        block::{Block, ContractEventMap, RwSetMap, Transaction},
        crypto_primitives::HashType,
        data_types::{BlockHeight, CryptoHash, TxId},
    },
};

/// Read access to the chain's configuration.
pub trait ChainConf: Send + Sync {
    fn chain_id(&self) -> &str;

    fn consensus_type(&self) -> ConsensusType;

    fn hash_type(&self) -> HashType;

    fn block_tx_capacity(&self) -> u32;

    fn sql_enabled(&self) -> bool;

    fn message_turbo(&self) -> MessageTurbo;

    fn is_solo(&self) -> bool {
        self.consensus_type() == ConsensusType::Solo
    }
}

/// The node's view of the last committed block.
pub trait LedgerCache: Send + Sync {
    fn last_committed_block(&self) -> Option<Block>;

    fn set_last_committed_block(&self, block: Block);

    /// Height of the last committed block. Fails if nothing has been committed yet.
    fn current_height(&self) -> Result<BlockHeight, LedgerCacheError>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum LedgerCacheError {
    NoCommittedBlock,
}

/// The pool of transactions waiting to be included in a block.
pub trait TxPool: Send + Sync {
    /// Put `retry_txs` back into the pool, and drop `remove_txs` from it.
    fn retry_and_remove_txs(&self, retry_txs: Vec<Transaction>, remove_txs: Vec<Transaction>);

    /// Mark `txs` as included in a block at `height` that is not yet committed.
    fn add_txs_to_pending_cache(&self, txs: Vec<Transaction>, height: BlockHeight);

    /// Look up full transactions by id. Ids the pool does not know are absent from the result.
    fn get_txs_by_tx_ids(&self, tx_ids: &[TxId]) -> HashMap<TxId, Transaction>;
}

/// Persistent storage of committed blocks.
pub trait BlockchainStore: Send + Sync {
    fn save_block(
        &self,
        block: &Block,
        rw_sets: &RwSetMap,
        events: &ContractEventMap,
    ) -> Result<(), StoreError>;

    fn last_block(&self) -> Result<Option<Block>, StoreError>;

    fn write_object(&self, contract: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn read_object(&self, contract: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
}

/// Hooks into the state database that a failed verification or commit must undo.
pub trait StoreHelper: Send + Sync {
    fn rollback(&self, block: &Block, store: &dyn BlockchainStore) -> Result<(), StoreError>;
}

/// Checks signatures on behalf of the core.
pub trait AccessControlProvider: Send + Sync {
    /// Verify that the block's header was signed by its proposer, and that the proposer is a
    /// consensus node.
    fn verify_block_signature(&self, block: &Block) -> Result<(), AccessControlError>;

    /// Verify the quorum certificate a block carries.
    fn verify_vote_signatures(&self, block: &Block) -> Result<(), AccessControlError>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum AccessControlError {
    MissingCertificate,
    CertificateMismatch,
    UnknownProposer,
    UnknownVoter,
    DuplicateVoter,
    BadSignature,
    InsufficientVotes { valid: usize, quorum: usize },
}

/// Everything the execution engine produced for a block.
#[derive(Clone, Debug, Default)]
pub struct SimulationOutcome {
    pub rw_sets: RwSetMap,
    pub events: ContractEventMap,
}

/// Executes the transactions of a block in dependency order.
pub trait TxScheduler: Send + Sync {
    fn simulate_with_dag(
        &self,
        block: &Block,
        last_block: &Block,
    ) -> Result<SimulationOutcome, SimulateError>;
}

#[derive(Debug)]
pub enum SimulateError {
    TxFailed { tx_id: TxId, reason: String },
    Internal(String),
}

/// The component that builds blocks when this node is the leader.
pub trait BlockProposer: Send + Sync {
    /// Whether this node is currently allowed to propose at all.
    fn on_receive_propose_status_change(&self, can_propose: bool);

    /// Build a block at `height` on top of `pre_hash`, if `is_proposer`.
    fn on_receive_chained_bft_proposal(
        &self,
        height: BlockHeight,
        pre_hash: CryptoHash,
        is_proposer: bool,
    );
}

/// Every collaborator the core calls out to, shared between its components.
#[derive(TypedBuilder, Clone)]
#[builder(builder_method(doc = "
    Create a builder for building [Collaborators]. Every collaborator is required.
"))]
pub struct Collaborators {
    #[builder(setter(doc = "Set the chain's configuration. Required."))]
    pub chain_conf: Arc<dyn ChainConf>,
    #[builder(setter(doc = "Set the view of the last committed block. Required."))]
    pub ledger_cache: Arc<dyn LedgerCache>,
    #[builder(setter(doc = "Set the transaction pool. Required."))]
    pub tx_pool: Arc<dyn TxPool>,
    #[builder(setter(doc = "Set the store committed blocks are saved to. Required."))]
    pub store: Arc<dyn BlockchainStore>,
    #[builder(setter(doc = "Set the hooks that undo state after a failed verification or commit. Required."))]
    pub store_helper: Arc<dyn StoreHelper>,
    #[builder(setter(doc = "Set the provider that checks the quorum certificates of synced blocks. Required."))]
    pub access_control: Arc<dyn AccessControlProvider>,
    #[builder(setter(doc = "Set the scheduler that executes the transactions of a block. Required."))]
    pub tx_scheduler: Arc<dyn TxScheduler>,
}
