/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and shut down the chained-BFT core of a node.
//!
//! # Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .collaborators(collaborators)
//!     .block_proposer(proposer)
//!     .pacemaker_config(PacemakerConfiguration { self_index: 0, timeouts })
//!     .start_height(BlockHeight::new(1))
//!     .log_events(true)
//!     // Optional: register event handlers.
//!     .on_commit_block(|commit_block_event| { ... })
//!     .build()
//!     .start();
//! ```
//!
//! Once started, other parts of the node talk to the core through [`Node::msg_bus`]: proposed blocks
//! go in as [`Message::ProposedBlock`](crate::messages::Message::ProposedBlock), decisions as
//! [`Message::CommitBlock`](crate::messages::Message::CommitBlock), and verification outcomes come
//! out as [`Message::VerifyResult`](crate::messages::Message::VerifyResult).
//!
//! Dropping the [`Node`] stops every thread the core started.

use std::{
    sync::{
        mpsc::{self, Sender},
        Arc,
    },
    thread::JoinHandle,
};

use typed_builder::TypedBuilder;

use crate::{
    block_committer::BlockCommitter,
    block_verifier::BlockVerifier,
    core_engine::{CoreEngine, LivenessDriver},
    event_bus::{start_event_bus, EventHandlers, HandlerPtr},
    events::*,
    msg_bus::MessageBus,
    pacemaker::{Pacemaker, PacemakerConfiguration},
    pluggables::{BlockProposer, Collaborators},
    proposal_cache::ProposalCache,
    timer_service::{TimerEvent, TimerService},
    types::data_types::{BlockHeight, EpochId},
};

/// Everything needed to start the core of a node.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.collaborators(...)`
    - `.block_proposer(...)`
    - `.pacemaker_config(...)`
    - `.start_height(...)`

    Optional:
    - `.epoch_id(...)`
    - `.log_events(...)`
    - `.state_timeouts(...)`
    - `.on_schedule_timer(...)`
    - `.on_fire_timer(...)`
    - `.on_enter_level(...)`
    - `.on_local_timeout(...)`
    - `.on_update_highest_tc(...)`
    - `.on_cache_proposal(...)`
    - `.on_cut_blocks(...)`
    - `.on_discard_blocks(...)`
    - `.on_verify_block(...)`
    - `.on_commit_block(...)`
"))]
pub struct NodeSpec {
    // Required parameters
    #[builder(setter(doc = "Set the collaborators the core calls out to. Required."))]
    collaborators: Collaborators,
    #[builder(setter(doc = "Set the component that builds blocks when this node leads a level. Required."))]
    block_proposer: Arc<dyn BlockProposer>,
    #[builder(setter(doc = "Set the [Pacemaker's configuration](PacemakerConfiguration). Required."))]
    pacemaker_config: PacemakerConfiguration,
    #[builder(setter(doc = "Set the height the Pacemaker expects the next block at. Required."))]
    start_height: BlockHeight,

    // Optional parameters
    #[builder(default, setter(doc = "Set the epoch the node starts in. Defaults to epoch 0."))]
    epoch_id: EpochId,
    #[builder(default = false, setter(doc = "Enable the default logging handlers for every event? Defaults to false."))]
    log_events: bool,
    #[builder(default, setter(strip_option, doc = "Set the channel that receives expired timers other than pacemaker timers. Optional."))]
    state_timeouts: Option<Sender<TimerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ScheduleTimerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ScheduleTimerEvent>),
    doc = "Register a user-defined handler for [ScheduleTimerEvent]. Optional."))]
    on_schedule_timer: Option<HandlerPtr<ScheduleTimerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FireTimerEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FireTimerEvent>),
    doc = "Register a user-defined handler for [FireTimerEvent]. Optional."))]
    on_fire_timer: Option<HandlerPtr<FireTimerEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EnterLevelEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EnterLevelEvent>),
    doc = "Register a user-defined handler for [EnterLevelEvent]. Optional."))]
    on_enter_level: Option<HandlerPtr<EnterLevelEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LocalTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LocalTimeoutEvent>),
    doc = "Register a user-defined handler for [LocalTimeoutEvent]. Optional."))]
    on_local_timeout: Option<HandlerPtr<LocalTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateHighestTCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateHighestTCEvent>),
    doc = "Register a user-defined handler for [UpdateHighestTCEvent]. Optional."))]
    on_update_highest_tc: Option<HandlerPtr<UpdateHighestTCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CacheProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CacheProposalEvent>),
    doc = "Register a user-defined handler for [CacheProposalEvent]. Optional."))]
    on_cache_proposal: Option<HandlerPtr<CacheProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CutBlocksEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CutBlocksEvent>),
    doc = "Register a user-defined handler for [CutBlocksEvent]. Optional."))]
    on_cut_blocks: Option<HandlerPtr<CutBlocksEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DiscardBlocksEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DiscardBlocksEvent>),
    doc = "Register a user-defined handler for [DiscardBlocksEvent]. Optional."))]
    on_discard_blocks: Option<HandlerPtr<DiscardBlocksEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VerifyBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VerifyBlockEvent>),
    doc = "Register a user-defined handler for [VerifyBlockEvent]. Optional."))]
    on_verify_block: Option<HandlerPtr<VerifyBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a user-defined handler for [CommitBlockEvent]. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
}

impl NodeSpec {
    /// Wire the components together and start the core's threads.
    pub fn start(self) -> Node {
        let event_handlers = EventHandlers::new(
            self.log_events,
            self.on_schedule_timer,
            self.on_fire_timer,
            self.on_enter_level,
            self.on_local_timeout,
            self.on_update_highest_tc,
            self.on_cache_proposal,
            self.on_cut_blocks,
            self.on_discard_blocks,
            self.on_verify_block,
            self.on_commit_block,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };
        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(
                    event_handlers,
                    event_subscriber,
                    event_bus_shutdown_receiver,
                );
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        let msg_bus = MessageBus::new();

        let timer_service = Arc::new(TimerService::new(event_publisher.clone()));
        let pacemaker = Arc::new(Pacemaker::new(
            self.pacemaker_config,
            self.start_height,
            self.epoch_id,
            timer_service.scheduler(),
            event_publisher.clone(),
        ));
        timer_service.start();

        let proposal_cache = Arc::new(ProposalCache::new(
            self.collaborators.ledger_cache.clone(),
            event_publisher.clone(),
        ));
        let verifier = Arc::new(BlockVerifier::new(
            self.collaborators.clone(),
            proposal_cache.clone(),
            msg_bus.clone(),
            event_publisher.clone(),
        ));
        let committer = Arc::new(BlockCommitter::new(
            self.collaborators.clone(),
            proposal_cache.clone(),
            verifier.clone(),
            event_publisher,
        ));

        let liveness = Arc::new(LivenessDriver::new(
            pacemaker.clone(),
            timer_service.clone(),
            self.state_timeouts,
        ));
        let (liveness_shutdown, liveness_shutdown_receiver) = mpsc::channel();
        let liveness_driver = LivenessDriver::start(&liveness, liveness_shutdown_receiver);

        let core_engine = Arc::new(CoreEngine::new(
            self.block_proposer,
            verifier.clone(),
            committer.clone(),
            liveness,
            proposal_cache.clone(),
            self.collaborators.tx_pool.clone(),
        ));
        CoreEngine::start(&core_engine, &msg_bus);

        Node {
            msg_bus,
            timer_service,
            pacemaker,
            proposal_cache,
            verifier,
            committer,
            core_engine,
            liveness_driver: Some(liveness_driver),
            liveness_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of the core. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct Node {
    msg_bus: MessageBus,
    timer_service: Arc<TimerService>,
    pacemaker: Arc<Pacemaker>,
    proposal_cache: Arc<ProposalCache>,
    verifier: Arc<BlockVerifier>,
    committer: Arc<BlockCommitter>,
    core_engine: Arc<CoreEngine>,
    liveness_driver: Option<JoinHandle<()>>,
    liveness_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Node {
    pub fn msg_bus(&self) -> &MessageBus {
        &self.msg_bus
    }

    pub fn pacemaker(&self) -> &Arc<Pacemaker> {
        &self.pacemaker
    }

    pub fn proposal_cache(&self) -> &Arc<ProposalCache> {
        &self.proposal_cache
    }

    pub fn verifier(&self) -> &Arc<BlockVerifier> {
        &self.verifier
    }

    pub fn committer(&self) -> &Arc<BlockCommitter> {
        &self.committer
    }

    pub fn core_engine(&self) -> &Arc<CoreEngine> {
        &self.core_engine
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // The event bus must be the last thread to stop.
        self.msg_bus.close();

        let _ = self.liveness_shutdown.send(());
        if let Some(liveness_driver) = self.liveness_driver.take() {
            if liveness_driver.join().is_err() {
                log::error!("liveness driver panicked");
            }
        }
        self.timer_service.stop();

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("event bus panicked");
            }
        }
    }
}
