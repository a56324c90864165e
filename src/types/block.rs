/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type, its transactions, and the execution results that travel with a
//! block through the proposal cache.

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    certificates::QuorumCertificate,
    crypto_primitives::{CryptoHasher, Digest, HashType},
    data_types::{BlockHeight, CryptoHash, TxId},
};

/// Header of a [`Block`]. Everything that identifies a block lives here; the body only carries
/// transactions and the justifying certificate.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub chain_id: String,
    pub height: BlockHeight,
    pub pre_block_hash: CryptoHash,
    pub block_hash: CryptoHash,
    /// Seconds since the Unix Epoch, as stamped by the proposer.
    pub timestamp: i64,
    /// Serialized identity of the proposer.
    pub proposer: Vec<u8>,
    pub tx_count: u32,
    pub tx_root: CryptoHash,
    pub dag_hash: CryptoHash,
    pub rw_set_root: CryptoHash,
    pub signature: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
    /// Certificate over this block's parent, carried by the proposal.
    pub justify: Option<QuorumCertificate>,
}

impl Block {
    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    pub fn hash(&self) -> CryptoHash {
        self.header.block_hash
    }

    pub fn pre_hash(&self) -> CryptoHash {
        self.header.pre_block_hash
    }

    /// Whether the block lacks any of the fields that every well-formed proposal carries.
    pub fn is_empty(&self) -> bool {
        self.header.chain_id.is_empty()
            || self.header.block_hash.is_zero()
            || self.header.signature.is_empty()
    }

    /// Compute the hash of the header, leaving out the `block_hash` and `signature` fields.
    pub fn compute_hash(&self, hash_type: HashType) -> CryptoHash {
        let mut header = self.header.clone();
        header.block_hash = CryptoHash::zero();
        header.signature = Vec::new();
        hash_type.digest(&header.try_to_vec().unwrap())
    }

    /// Check that the `block_hash` stored in the header is the one the header hashes to.
    pub fn is_hash_valid(&self, hash_type: HashType) -> bool {
        self.header.block_hash == self.compute_hash(hash_type)
    }

    /// Identify this block independently of its final hash.
    ///
    /// The fingerprint only depends on fields that are fixed when a proposer starts building the
    /// block, so it can be used as a cache key before the block hash is known.
    pub fn fingerprint(&self) -> CryptoHash {
        let preimage = format!(
            "{}-{}-{}-{:?}-{:?}",
            self.header.chain_id,
            self.header.height,
            self.header.timestamp,
            self.header.proposer,
            self.header.pre_block_hash.bytes(),
        );
        let mut hasher = CryptoHasher::new();
        hasher.update(preimage.as_bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Ids of the block's transactions, in block order.
    pub fn tx_ids(&self) -> Vec<TxId> {
        self.txs.iter().map(|tx| tx.id.clone()).collect()
    }
}

/// A transaction as carried in a block.
///
/// With message turbo enabled, proposals travel with `payload` left empty, and receivers rebuild the
/// full transaction from their own pool by id.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    pub id: TxId,
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(id: TxId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Strip the payload, leaving only the id.
    pub fn to_stub(&self) -> Self {
        Self {
            id: self.id.clone(),
            payload: Vec::new(),
        }
    }
}

/// Reads and writes produced by simulating one transaction.
#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct TxRWSet {
    pub tx_id: TxId,
    pub reads: Vec<(Vec<u8>, Vec<u8>)>,
    pub writes: Vec<(Vec<u8>, Vec<u8>)>,
}

/// An event emitted by a contract while a transaction executes.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct ContractEvent {
    pub tx_id: TxId,
    pub contract_name: String,
    pub topic: String,
    pub data: Vec<String>,
}

/// Read/write sets of a block, by transaction id.
pub type RwSetMap = HashMap<TxId, TxRWSet>;

/// Contract events of a block, by contract name.
pub type ContractEventMap = HashMap<String, Vec<ContractEvent>>;

#[test]
fn fingerprint_ignores_body_and_hash_test() {
    let header = BlockHeader {
        chain_id: String::from("chain1"),
        height: BlockHeight::new(7),
        pre_block_hash: CryptoHash::new([1u8; 32]),
        block_hash: CryptoHash::zero(),
        timestamp: 1_700_000_000,
        proposer: vec![9, 9, 9],
        tx_count: 0,
        tx_root: CryptoHash::zero(),
        dag_hash: CryptoHash::zero(),
        rw_set_root: CryptoHash::zero(),
        signature: Vec::new(),
    };
    let unsigned = Block {
        header,
        txs: Vec::new(),
        justify: None,
    };
    let mut signed = unsigned.clone();
    signed.txs.push(Transaction::new(TxId::new("tx-1"), vec![1]));
    signed.header.block_hash = signed.compute_hash(HashType::Sha256);
    signed.header.signature = vec![1, 2, 3];

    assert_eq!(unsigned.fingerprint(), signed.fingerprint());
    assert!(unsigned.is_empty());
    assert!(!signed.is_empty());
    assert!(signed.is_hash_valid(HashType::Sha256));
    assert_eq!(signed.compute_hash(HashType::Sha256), unsigned.compute_hash(HashType::Sha256));
}
