use std::sync::{mpsc, Arc};

use chained_bft::{
    block_committer::{BlockCommitter, CommitError},
    block_verifier::{BlockVerifier, VerifyError, VerifyMode},
    config::{ChainConfig, ConsensusType, MessageTurbo},
    events::Event,
    msg_bus::MessageBus,
    pluggables::LedgerCache,
    proposal_cache::ProposalCache,
    types::{block::Block, data_types::BlockHeight},
};
use log::LevelFilter;

mod common;

use crate::common::{
    logging::setup_logger,
    mocks::{chain_config, child, genesis, rehash, Fixture, CHAIN_ID},
};

struct Harness {
    fixture: Fixture,
    proposal_cache: Arc<ProposalCache>,
    verifier: Arc<BlockVerifier>,
    committer: BlockCommitter,
    msg_bus: MessageBus,
    events: mpsc::Receiver<Event>,
}

impl Harness {
    fn new(chain_conf: ChainConfig) -> Harness {
        let fixture = Fixture::new(chain_conf, &genesis());
        let (event_publisher, events) = mpsc::channel();
        let msg_bus = MessageBus::new();
        let proposal_cache = Arc::new(ProposalCache::new(fixture.ledger_cache.clone(), None));
        let verifier = Arc::new(BlockVerifier::new(
            fixture.collaborators(),
            proposal_cache.clone(),
            msg_bus.clone(),
            None,
        ));
        let committer = BlockCommitter::new(
            fixture.collaborators(),
            proposal_cache.clone(),
            verifier.clone(),
            Some(event_publisher),
        );
        Harness {
            fixture,
            proposal_cache,
            verifier,
            committer,
            msg_bus,
            events,
        }
    }

    fn verify(&self, block: &Block) {
        self.verifier
            .verify_block(block, VerifyMode::Consensus)
            .unwrap()
    }

    fn committed_heights(&self) -> Vec<u64> {
        self.events
            .try_iter()
            .filter_map(|event| match event {
                Event::CommitBlock(commit_block) => Some(commit_block.height.int()),
                _ => None,
            })
            .collect()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.msg_bus.close();
    }
}

#[test]
fn commit_verified_block_test() {
    setup_logger(LevelFilter::Trace);
    let harness = Harness::new(chain_config());
    let genesis = genesis();

    // 1. Verify two competing blocks at height 1.
    let a = child(&genesis, &["a1", "shared"], 1);
    let b = child(&genesis, &["b1", "shared"], 2);
    harness.verify(&a);
    harness.verify(&b);

    // 2. Commit `a`.
    harness.committer.add_block(&a).unwrap();

    assert_eq!(harness.fixture.store.saved_heights(), vec![1]);
    assert_eq!(harness.fixture.ledger_cache.last_committed_block(), Some(a.clone()));
    assert_eq!(
        harness.fixture.ledger_cache.current_height(),
        Ok(BlockHeight::new(1))
    );

    // The committed transactions leave the pool, and only `b`'s own transactions are retried.
    assert_eq!(harness.fixture.tx_pool.removed(), vec!["a1", "shared"]);
    assert_eq!(harness.fixture.tx_pool.retried(), vec!["b1"]);

    // Nothing is cached at the committed height anymore.
    assert!(!harness.proposal_cache.has_proposed_block_at(BlockHeight::new(1)));
    assert_eq!(harness.fixture.store_helper.rollbacks(), 0);
    assert_eq!(harness.committed_heights(), vec![1]);

    // 3. Committing `a` or `b` again fails and rolls back.
    assert!(matches!(
        harness.committer.add_block(&a),
        Err(CommitError::BlockHadBeenCommitted { .. })
    ));
    assert!(matches!(
        harness.committer.add_block(&b),
        Err(CommitError::BlockHadBeenCommitted { .. })
    ));
    assert_eq!(harness.fixture.store_helper.rollbacks(), 2);
    assert_eq!(harness.fixture.store.saved_heights(), vec![1]);
    assert!(harness.committed_heights().is_empty());
}

#[test]
fn illegal_blocks_are_refused_test() {
    setup_logger(LevelFilter::Trace);
    let harness = Harness::new(chain_config());
    let genesis = genesis();
    let a = child(&genesis, &["a1"], 1);

    // 1. Blocks must not skip heights.
    let skipping = child(&a, &["s1"], 2);
    assert!(matches!(
        harness.committer.add_block(&skipping),
        Err(CommitError::HeightGap { .. })
    ));

    // 2. Blocks must extend the last committed block.
    let mut unlinked = child(&genesis, &["u1"], 3);
    unlinked.header.pre_block_hash = a.hash();
    rehash(&mut unlinked);
    assert!(matches!(
        harness.committer.add_block(&unlinked),
        Err(CommitError::PreHashMismatch { .. })
    ));

    // 3. Blocks must hash to their stored hash.
    let mut tampered = child(&genesis, &["t1"], 4);
    tampered.header.timestamp = 44;
    assert!(matches!(
        harness.committer.add_block(&tampered),
        Err(CommitError::BlockHashMismatch { .. })
    ));

    assert_eq!(harness.fixture.store_helper.rollbacks(), 3);
    assert!(harness.fixture.store.saved_heights().is_empty());
    assert_eq!(
        harness.fixture.ledger_cache.current_height(),
        Ok(BlockHeight::new(0))
    );
}

#[test]
fn commit_unverified_block_test() {
    setup_logger(LevelFilter::Trace);
    let harness = Harness::new(chain_config());
    let genesis = genesis();

    // 1. A block this node never saw is verified in sync mode, then committed.
    let a = child(&genesis, &["a1"], 1);
    harness.committer.add_block(&a).unwrap();
    assert_eq!(harness.fixture.tx_scheduler.calls(), 1);
    assert_eq!(harness.fixture.store.saved_heights(), vec![1]);

    // 2. If its certificate does not check out, nothing is committed.
    harness.fixture.access_control.set_reject(true);
    let b = child(&a, &["b1"], 2);
    assert!(matches!(
        harness.committer.add_block(&b),
        Err(CommitError::Verify(VerifyError::VoteSignature(_)))
    ));
    assert_eq!(harness.fixture.store.saved_heights(), vec![1]);
    assert_eq!(harness.fixture.store_helper.rollbacks(), 1);

    // 3. A block verified in consensus mode is committed without checking its certificate.
    harness.verify(&b);
    harness.committer.add_block(&b).unwrap();
    assert_eq!(harness.fixture.store.saved_heights(), vec![1, 2]);
    assert_eq!(harness.committed_heights(), vec![1, 2]);
}

#[test]
fn store_failure_test() {
    setup_logger(LevelFilter::Trace);
    let harness = Harness::new(chain_config());
    let genesis = genesis();
    let a = child(&genesis, &["a1"], 1);
    harness.verify(&a);

    // 1. A failed save leaves the ledger and the cache as they were.
    harness.fixture.store.set_fail_saves(true);
    assert!(matches!(
        harness.committer.add_block(&a),
        Err(CommitError::Store(_))
    ));
    assert_eq!(harness.fixture.store_helper.rollbacks(), 1);
    assert_eq!(
        harness.fixture.ledger_cache.current_height(),
        Ok(BlockHeight::new(0))
    );
    assert!(harness.proposal_cache.get_proposed_block(&a).is_some());
    assert!(harness.fixture.tx_pool.removed().is_empty());

    // 2. The same block can be committed once the store recovers.
    harness.fixture.store.set_fail_saves(false);
    harness.committer.add_block(&a).unwrap();
    assert_eq!(harness.fixture.store.saved_heights(), vec![1]);
    assert_eq!(harness.fixture.tx_scheduler.calls(), 1);
}

#[test]
fn turbo_commit_takes_final_header_test() {
    setup_logger(LevelFilter::Trace);
    let harness = Harness::new(
        ChainConfig::builder()
            .chain_id(CHAIN_ID)
            .consensus_type(ConsensusType::Hotstuff)
            .message_turbo(MessageTurbo {
                enabled: true,
                ..MessageTurbo::default()
            })
            .build(),
    );
    let genesis = genesis();

    // 1. Cache a draft of a block the way a proposer does before its header is final.
    let draft = child(&genesis, &["a1"], 1);
    harness.fixture.tx_pool.make_available(&draft.txs);
    harness.verify(&draft);

    // 2. The decided block has the same fingerprint but a final header and stripped transactions.
    let mut decided = draft.clone();
    decided.header.rw_set_root = genesis.hash();
    rehash(&mut decided);
    decided.txs = draft.txs.iter().map(|tx| tx.to_stub()).collect();
    harness.committer.add_block(&decided).unwrap();

    // The saved block has the final header and the full transactions.
    let committed = harness.fixture.ledger_cache.last_committed_block().unwrap();
    assert_eq!(committed.header, decided.header);
    assert_eq!(committed.txs, draft.txs);
    assert_eq!(harness.fixture.tx_scheduler.calls(), 1);
}

#[test]
fn solo_chains_commit_only_cached_blocks_test() {
    setup_logger(LevelFilter::Trace);
    let harness = Harness::new(
        ChainConfig::builder()
            .chain_id(CHAIN_ID)
            .consensus_type(ConsensusType::Solo)
            .build(),
    );
    let a = child(&genesis(), &["a1"], 1);

    // Verification on a solo chain does not cache the block, so the committer has no execution
    // results to save.
    assert!(matches!(
        harness.committer.add_block(&a),
        Err(CommitError::NotVerified { .. })
    ));
    assert!(harness.fixture.store.saved_heights().is_empty());
    assert_eq!(harness.fixture.store_helper.rollbacks(), 1);
}
