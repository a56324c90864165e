//! In-memory collaborators and block factories shared by the integration tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use chained_bft::{
    config::{ChainConfig, ConsensusType},
    ledger_cache::MemLedgerCache,
    messages::Message,
    msg_bus::Subscriber,
    pluggables::{
        AccessControlError, AccessControlProvider, BlockProposer, BlockchainStore, Collaborators,
        SimulateError, SimulationOutcome, StoreError, StoreHelper, TxPool, TxScheduler,
    },
    types::{
        block::{Block, BlockHeader, ContractEventMap, RwSetMap, Transaction, TxRWSet},
        certificates::QuorumCertificate,
        crypto_primitives::{HashType, Keypair},
        data_types::{BlockHeight, CryptoHash, EpochId, Level, TxId},
    },
};

pub(crate) const CHAIN_ID: &str = "chain1";

/// Every collaborator of the core, with handles kept to the concrete mocks so that tests can
/// inspect and steer them.
pub(crate) struct Fixture {
    pub(crate) chain_conf: Arc<ChainConfig>,
    pub(crate) ledger_cache: Arc<MemLedgerCache>,
    pub(crate) tx_pool: Arc<MockTxPool>,
    pub(crate) store: Arc<MemStore>,
    pub(crate) store_helper: Arc<CountingStoreHelper>,
    pub(crate) access_control: Arc<MockAccessControl>,
    pub(crate) tx_scheduler: Arc<MockTxScheduler>,
}

impl Fixture {
    /// Collaborators for a chain whose ledger has committed `genesis`.
    pub(crate) fn new(chain_conf: ChainConfig, genesis: &Block) -> Fixture {
        Fixture {
            chain_conf: Arc::new(chain_conf),
            ledger_cache: Arc::new(MemLedgerCache::new(Some(genesis.clone()))),
            tx_pool: Arc::new(MockTxPool::default()),
            store: Arc::new(MemStore::default()),
            store_helper: Arc::new(CountingStoreHelper::default()),
            access_control: Arc::new(MockAccessControl::default()),
            tx_scheduler: Arc::new(MockTxScheduler::default()),
        }
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators::builder()
            .chain_conf(self.chain_conf.clone())
            .ledger_cache(self.ledger_cache.clone())
            .tx_pool(self.tx_pool.clone())
            .store(self.store.clone())
            .store_helper(self.store_helper.clone())
            .access_control(self.access_control.clone())
            .tx_scheduler(self.tx_scheduler.clone())
            .build()
    }
}

pub(crate) fn chain_config() -> ChainConfig {
    ChainConfig::builder()
        .chain_id(CHAIN_ID)
        .consensus_type(ConsensusType::Hotstuff)
        .build()
}

/// The block at height 0.
pub(crate) fn genesis() -> Block {
    let mut block = Block {
        header: BlockHeader {
            chain_id: CHAIN_ID.to_string(),
            height: BlockHeight::new(0),
            pre_block_hash: CryptoHash::zero(),
            block_hash: CryptoHash::zero(),
            timestamp: 0,
            proposer: Vec::new(),
            tx_count: 0,
            tx_root: CryptoHash::zero(),
            dag_hash: CryptoHash::zero(),
            rw_set_root: CryptoHash::zero(),
            signature: vec![0],
        },
        txs: Vec::new(),
        justify: None,
    };
    block.header.block_hash = block.compute_hash(HashType::Sha256);
    block
}

/// A well-formed block extending `parent`. Siblings are told apart by `timestamp`.
///
/// The block carries a quorum certificate for `parent` in level `parent.height + 1`.
pub(crate) fn child(parent: &Block, txs: &[&str], timestamp: i64) -> Block {
    let mut block = Block {
        header: BlockHeader {
            chain_id: CHAIN_ID.to_string(),
            height: parent.height() + 1,
            pre_block_hash: parent.hash(),
            block_hash: CryptoHash::zero(),
            timestamp,
            proposer: vec![7],
            tx_count: txs.len() as u32,
            tx_root: CryptoHash::zero(),
            dag_hash: CryptoHash::zero(),
            rw_set_root: CryptoHash::zero(),
            signature: Vec::new(),
        },
        txs: txs.iter().map(|id| tx(id)).collect(),
        justify: Some(QuorumCertificate::unsigned(
            EpochId::new(0),
            parent.height(),
            Level::new(parent.height().int() + 1),
            parent.hash(),
        )),
    };
    rehash(&mut block);
    block
}

/// Recompute the hash of a block whose header was edited, and sign it again.
pub(crate) fn rehash(block: &mut Block) {
    block.header.block_hash = block.compute_hash(HashType::Sha256);
    block.header.signature = vec![1];
}

/// Make `proposer` the proposer of `block`, and sign its recomputed hash.
pub(crate) fn sign(block: &mut Block, proposer: &Keypair) {
    block.header.proposer = proposer.public().to_bytes().to_vec();
    block.header.block_hash = block.compute_hash(HashType::Sha256);
    block.header.signature = proposer.sign(&block.hash().bytes()).bytes().to_vec();
}

pub(crate) fn tx(id: &str) -> Transaction {
    Transaction::new(TxId::new(id), id.as_bytes().to_vec())
}

pub(crate) fn ids(txs: &[Transaction]) -> Vec<String> {
    let mut ids: Vec<String> = txs.iter().map(|tx| tx.id.as_str().to_string()).collect();
    ids.sort();
    ids
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Records every call the core makes into the pool.
#[derive(Default)]
pub(crate) struct MockTxPool {
    retried: Mutex<Vec<Transaction>>,
    removed: Mutex<Vec<Transaction>>,
    pending: Mutex<Vec<(TxId, BlockHeight)>>,
    available: Mutex<HashMap<TxId, Transaction>>,
}

impl MockTxPool {
    pub(crate) fn retried(&self) -> Vec<String> {
        ids(&self.retried.lock().unwrap())
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        ids(&self.removed.lock().unwrap())
    }

    pub(crate) fn pending(&self) -> Vec<(TxId, BlockHeight)> {
        self.pending.lock().unwrap().clone()
    }

    /// Make full transactions available for lookups by id.
    pub(crate) fn make_available(&self, txs: &[Transaction]) {
        let mut available = self.available.lock().unwrap();
        for tx in txs {
            available.insert(tx.id.clone(), tx.clone());
        }
    }
}

impl TxPool for MockTxPool {
    fn retry_and_remove_txs(&self, retry_txs: Vec<Transaction>, remove_txs: Vec<Transaction>) {
        self.retried.lock().unwrap().extend(retry_txs);
        self.removed.lock().unwrap().extend(remove_txs);
    }

    fn add_txs_to_pending_cache(&self, txs: Vec<Transaction>, height: BlockHeight) {
        self.pending
            .lock()
            .unwrap()
            .extend(txs.into_iter().map(|tx| (tx.id, height)));
    }

    fn get_txs_by_tx_ids(&self, tx_ids: &[TxId]) -> HashMap<TxId, Transaction> {
        let available = self.available.lock().unwrap();
        tx_ids
            .iter()
            .filter_map(|tx_id| available.get(tx_id).map(|tx| (tx_id.clone(), tx.clone())))
            .collect()
    }
}

/// Block store that can be told to fail.
#[derive(Default)]
pub(crate) struct MemStore {
    blocks: Mutex<Vec<Block>>,
    objects: Mutex<HashMap<(String, Vec<u8>), Vec<u8>>>,
    fail_saves: AtomicBool,
}

impl MemStore {
    pub(crate) fn saved_heights(&self) -> Vec<u64> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .map(|block| block.height().int())
            .collect()
    }

    pub(crate) fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst)
    }
}

impl BlockchainStore for MemStore {
    fn save_block(
        &self,
        block: &Block,
        _rw_sets: &RwSetMap,
        _events: &ContractEventMap,
    ) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(String::from("disk full")));
        }
        self.blocks.lock().unwrap().push(block.clone());
        Ok(())
    }

    fn last_block(&self) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.lock().unwrap().last().cloned())
    }

    fn write_object(&self, contract: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .insert((contract.to_string(), key.to_vec()), value.to_vec());
        Ok(())
    }

    fn read_object(&self, contract: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(contract.to_string(), key.to_vec()))
            .cloned())
    }
}

#[derive(Default)]
pub(crate) struct CountingStoreHelper {
    rollbacks: AtomicUsize,
}

impl CountingStoreHelper {
    pub(crate) fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

impl StoreHelper for CountingStoreHelper {
    fn rollback(&self, _block: &Block, _store: &dyn BlockchainStore) -> Result<(), StoreError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Accepts every block signature, and every certificate unless told to reject.
#[derive(Default)]
pub(crate) struct MockAccessControl {
    reject: AtomicBool,
}

impl MockAccessControl {
    pub(crate) fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst)
    }
}

impl AccessControlProvider for MockAccessControl {
    fn verify_block_signature(&self, _block: &Block) -> Result<(), AccessControlError> {
        Ok(())
    }

    fn verify_vote_signatures(&self, _block: &Block) -> Result<(), AccessControlError> {
        if self.reject.load(Ordering::SeqCst) {
            Err(AccessControlError::BadSignature)
        } else {
            Ok(())
        }
    }
}

/// Produces one empty read/write set per transaction, after an optional delay.
#[derive(Default)]
pub(crate) struct MockTxScheduler {
    delay: Mutex<Duration>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockTxScheduler {
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay
    }

    pub(crate) fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TxScheduler for MockTxScheduler {
    fn simulate_with_dag(
        &self,
        block: &Block,
        _last_block: &Block,
    ) -> Result<SimulationOutcome, SimulateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SimulateError::Internal(String::from("vm crashed")));
        }
        let rw_sets = block
            .txs
            .iter()
            .map(|tx| {
                let rw_set = TxRWSet {
                    tx_id: tx.id.clone(),
                    reads: Vec::new(),
                    writes: vec![(tx.id.as_str().as_bytes().to_vec(), tx.payload.clone())],
                };
                (tx.id.clone(), rw_set)
            })
            .collect();
        Ok(SimulationOutcome {
            rw_sets,
            events: ContractEventMap::new(),
        })
    }
}

/// What a [`RecordingProposer`] was asked to do.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ProposerCall {
    StatusChange(bool),
    Propose {
        height: BlockHeight,
        pre_hash: CryptoHash,
        is_proposer: bool,
    },
}

#[derive(Default)]
pub(crate) struct RecordingProposer {
    calls: Mutex<Vec<ProposerCall>>,
}

impl RecordingProposer {
    pub(crate) fn calls(&self) -> Vec<ProposerCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl BlockProposer for RecordingProposer {
    fn on_receive_propose_status_change(&self, can_propose: bool) {
        self.calls
            .lock()
            .unwrap()
            .push(ProposerCall::StatusChange(can_propose))
    }

    fn on_receive_chained_bft_proposal(
        &self,
        height: BlockHeight,
        pre_hash: CryptoHash,
        is_proposer: bool,
    ) {
        self.calls.lock().unwrap().push(ProposerCall::Propose {
            height,
            pre_hash,
            is_proposer,
        })
    }
}

/// Forwards every message it receives into a channel.
pub(crate) struct ChannelSubscriber(Mutex<Sender<Message>>);

impl ChannelSubscriber {
    pub(crate) fn new() -> (Arc<ChannelSubscriber>, Receiver<Message>) {
        let (sender, receiver) = mpsc::channel();
        (Arc::new(ChannelSubscriber(Mutex::new(sender))), receiver)
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_message(&self, message: &Message) {
        let _ = self.0.lock().unwrap().send(message.clone());
    }
}
