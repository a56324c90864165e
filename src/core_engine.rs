/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Glue between the components of the core.
//!
//! 1. [`CoreEngine`] subscribes to the [message bus](crate::msg_bus) and routes each message to the
//!    component that handles it. Blocks are verified on threads of their own, and committed in
//!    arrival order by a commit worker, so neither holds up the delivery of other messages.
//! 2. [`LivenessDriver`] runs the loop that turns expired timers into
//!    [Pacemaker](crate::pacemaker) calls, and moves the Pacemaker forward on every commit.

use std::{
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    block_committer::BlockCommitter,
    block_verifier::{BlockVerifier, VerifyMode},
    messages::{Message, Topic},
    msg_bus::{MessageBus, Subscriber},
    pacemaker::Pacemaker,
    pluggables::{BlockProposer, TxPool},
    proposal_cache::ProposalCache,
    timer_service::{TimerEvent, TimerService},
    types::{block::Block, data_types::BlockHeight},
};

/// Routes messages from the message bus to the proposer, the verifier, and the committer.
pub struct CoreEngine {
    proposer: Arc<dyn BlockProposer>,
    verifier: Arc<BlockVerifier>,
    proposal_cache: Arc<ProposalCache>,
    tx_pool: Arc<dyn TxPool>,
    verifications: Mutex<Vec<JoinHandle<()>>>,
    commits: Mutex<Option<Sender<Block>>>,
    commit_worker: Mutex<Option<JoinHandle<()>>>,
}

impl CoreEngine {
    /// Create the engine and start its commit worker.
    pub fn new(
        proposer: Arc<dyn BlockProposer>,
        verifier: Arc<BlockVerifier>,
        committer: Arc<BlockCommitter>,
        liveness: Arc<LivenessDriver>,
        proposal_cache: Arc<ProposalCache>,
        tx_pool: Arc<dyn TxPool>,
    ) -> CoreEngine {
        let (commits, blocks) = mpsc::channel();
        let commit_worker = start_commit_worker(committer, liveness, blocks);
        CoreEngine {
            proposer,
            verifier,
            proposal_cache,
            tx_pool,
            verifications: Mutex::new(Vec::new()),
            commits: Mutex::new(Some(commits)),
            commit_worker: Mutex::new(Some(commit_worker)),
        }
    }

    /// Register `core_engine` for every inbound topic on `msg_bus`.
    pub fn start(core_engine: &Arc<CoreEngine>, msg_bus: &MessageBus) {
        for topic in [
            Topic::ProposeState,
            Topic::BuildProposal,
            Topic::ProposedBlock,
            Topic::VerifyBlock,
            Topic::CommitBlock,
        ] {
            msg_bus.register(topic, core_engine.clone());
        }
    }

    /// Drop every proposal above `base_height` and return their transactions to the pool.
    pub fn discard_above_height(&self, base_height: BlockHeight) {
        let discarded = self.proposal_cache.discard_above_height(base_height);
        let txs: Vec<_> = discarded.into_iter().flat_map(|block| block.txs).collect();
        if !txs.is_empty() {
            log::info!(
                "discarded proposals above height {}, retrying {} txs",
                base_height,
                txs.len()
            );
            self.tx_pool.retry_and_remove_txs(txs, Vec::new());
        }
    }

    fn on_block(&self, block: &Block) {
        let verifier = self.verifier.clone();
        let block = block.clone();
        let verification = thread::spawn(move || {
            if let Err(err) = verifier.verify_block(&block, VerifyMode::Consensus) {
                log::warn!(
                    "verify block {} at height {}: {:?}",
                    block.hash(),
                    block.height(),
                    err
                );
            }
        });

        let mut verifications = self.verifications.lock().unwrap();
        verifications.retain(|verification| !verification.is_finished());
        verifications.push(verification);
    }

    fn on_commit_block(&self, block: &Block) {
        match self.commits.lock().unwrap().as_ref() {
            Some(commits) => {
                let _ = commits.send(block.clone());
            }
            None => log::debug!("core engine quit, dropping commit of height {}", block.height()),
        }
    }
}

fn start_commit_worker(
    committer: Arc<BlockCommitter>,
    liveness: Arc<LivenessDriver>,
    blocks: Receiver<Block>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for block in blocks {
            match committer.add_block(&block) {
                Ok(()) => liveness.on_block_committed(&block),
                Err(err) => log::warn!(
                    "put block {} at height {}: {:?}",
                    block.hash(),
                    block.height(),
                    err
                ),
            }
        }
    })
}

impl Subscriber for CoreEngine {
    fn on_message(&self, message: &Message) {
        match message {
            Message::ProposeState(can_propose) => {
                self.proposer.on_receive_propose_status_change(*can_propose)
            }
            Message::BuildProposal(proposal) => self.proposer.on_receive_chained_bft_proposal(
                proposal.height,
                proposal.pre_hash,
                proposal.is_proposer,
            ),
            Message::ProposedBlock(block) | Message::VerifyBlock(block) => self.on_block(block),
            Message::CommitBlock(block) => self.on_commit_block(block),
            // Produced by the verifier for the consensus algorithm.
            Message::VerifyResult(_) => (),
        }
    }

    /// Wait for every queued commit and every running verification to finish.
    fn on_quit(&self) {
        self.commits.lock().unwrap().take();
        if let Some(commit_worker) = self.commit_worker.lock().unwrap().take() {
            if commit_worker.join().is_err() {
                log::error!("commit worker panicked");
            }
        }

        let verifications: Vec<_> = self.verifications.lock().unwrap().drain(..).collect();
        for verification in verifications {
            if verification.join().is_err() {
                log::error!("block verification panicked");
            }
        }

        log::info!("core engine quit");
    }
}

/// Drives the Pacemaker from expired timers and committed blocks.
pub struct LivenessDriver {
    pacemaker: Arc<Pacemaker>,
    timer_service: Arc<TimerService>,
    state_timeouts: Option<Sender<TimerEvent>>,
}

impl LivenessDriver {
    /// `state_timeouts` receives every expired timer that is not a pacemaker timer, for the
    /// consensus algorithm to act on.
    pub fn new(
        pacemaker: Arc<Pacemaker>,
        timer_service: Arc<TimerService>,
        state_timeouts: Option<Sender<TimerEvent>>,
    ) -> LivenessDriver {
        LivenessDriver {
            pacemaker,
            timer_service,
            state_timeouts,
        }
    }

    /// Start the thread that handles expired timers. It runs until `shutdown_signal` receives a
    /// message or is dropped.
    pub fn start(driver: &Arc<LivenessDriver>, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
        let driver = driver.clone();
        thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            if let Some(timer_event) = driver.timer_service.recv_fired(Duration::from_millis(50)) {
                driver.on_fired_event(timer_event);
            }
        })
    }

    /// Handle one expired timer. Returns whether the Pacemaker re-armed its timer.
    pub fn on_fired_event(&self, timer_event: TimerEvent) -> bool {
        if !timer_event.kind.is_pacemaker() {
            if let Some(state_timeouts) = &self.state_timeouts {
                let _ = state_timeouts.send(timer_event);
            }
            return false;
        }

        if self.is_stale(&timer_event) {
            log::debug!(
                "dropping stale timer event {:?} at level {}, epoch {}; pacemaker is at level {}, epoch {}",
                timer_event.kind,
                timer_event.level,
                timer_event.epoch_id,
                self.pacemaker.current_level(),
                self.pacemaker.epoch_id()
            );
            return false;
        }

        log::info!(
            "pacemaker timeout at height {}, level {}, after {:?}",
            timer_event.height,
            timer_event.level,
            timer_event.duration
        );
        self.pacemaker.process_local_timeout(timer_event.level)
    }

    /// Feed the certificate carried by a newly committed block to the Pacemaker.
    pub fn on_block_committed(&self, block: &Block) {
        if let Some(qc) = &block.justify {
            self.pacemaker.process_certificates(Some(qc), None, qc.level);
        }
    }

    /// A pacemaker timer is stale if it was armed in another epoch, or for a level the Pacemaker
    /// has left. The height is not compared: a QC can move the height without entering a new
    /// level, and the timer armed for the current level must still re-arm.
    fn is_stale(&self, timer_event: &TimerEvent) -> bool {
        timer_event.epoch_id != self.pacemaker.epoch_id()
            || timer_event.level < self.pacemaker.current_level()
    }

    pub fn pacemaker(&self) -> &Arc<Pacemaker> {
        &self.pacemaker
    }
}
