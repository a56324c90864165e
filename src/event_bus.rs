/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives [events](crate::events) from the components of the core and fires the
//! handlers registered for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Handlers registered for each kind of event. The default logging handlers come first if logging
/// is enabled, followed by at most one user handler.
pub(crate) struct EventHandlers {
    pub(crate) schedule_timer_handlers: Vec<HandlerPtr<ScheduleTimerEvent>>,
    pub(crate) fire_timer_handlers: Vec<HandlerPtr<FireTimerEvent>>,
    pub(crate) enter_level_handlers: Vec<HandlerPtr<EnterLevelEvent>>,
    pub(crate) local_timeout_handlers: Vec<HandlerPtr<LocalTimeoutEvent>>,
    pub(crate) update_highest_tc_handlers: Vec<HandlerPtr<UpdateHighestTCEvent>>,
    pub(crate) cache_proposal_handlers: Vec<HandlerPtr<CacheProposalEvent>>,
    pub(crate) cut_blocks_handlers: Vec<HandlerPtr<CutBlocksEvent>>,
    pub(crate) discard_blocks_handlers: Vec<HandlerPtr<DiscardBlocksEvent>>,
    pub(crate) verify_block_handlers: Vec<HandlerPtr<VerifyBlockEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        schedule_timer_handler: Option<HandlerPtr<ScheduleTimerEvent>>,
        fire_timer_handler: Option<HandlerPtr<FireTimerEvent>>,
        enter_level_handler: Option<HandlerPtr<EnterLevelEvent>>,
        local_timeout_handler: Option<HandlerPtr<LocalTimeoutEvent>>,
        update_highest_tc_handler: Option<HandlerPtr<UpdateHighestTCEvent>>,
        cache_proposal_handler: Option<HandlerPtr<CacheProposalEvent>>,
        cut_blocks_handler: Option<HandlerPtr<CutBlocksEvent>>,
        discard_blocks_handler: Option<HandlerPtr<DiscardBlocksEvent>>,
        verify_block_handler: Option<HandlerPtr<VerifyBlockEvent>>,
        commit_block_handler: Option<HandlerPtr<CommitBlockEvent>>,
    ) -> EventHandlers {
        fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
            let mut handlers = Vec::new();
            if log_events {
                handlers.push(T::get_logger());
            }
            handlers.extend(user_handler);
            handlers
        }

        EventHandlers {
            schedule_timer_handlers: handlers(log_events, schedule_timer_handler),
            fire_timer_handlers: handlers(log_events, fire_timer_handler),
            enter_level_handlers: handlers(log_events, enter_level_handler),
            local_timeout_handlers: handlers(log_events, local_timeout_handler),
            update_highest_tc_handlers: handlers(log_events, update_highest_tc_handler),
            cache_proposal_handlers: handlers(log_events, cache_proposal_handler),
            cut_blocks_handlers: handlers(log_events, cut_blocks_handler),
            discard_blocks_handlers: handlers(log_events, discard_blocks_handler),
            verify_block_handlers: handlers(log_events, verify_block_handler),
            commit_block_handlers: handlers(log_events, commit_block_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.schedule_timer_handlers.is_empty()
            && self.fire_timer_handlers.is_empty()
            && self.enter_level_handlers.is_empty()
            && self.local_timeout_handlers.is_empty()
            && self.update_highest_tc_handlers.is_empty()
            && self.cache_proposal_handlers.is_empty()
            && self.cut_blocks_handlers.is_empty()
            && self.discard_blocks_handlers.is_empty()
            && self.verify_block_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ScheduleTimer(schedule_timer_event) => self
                .schedule_timer_handlers
                .iter()
                .for_each(|handler| handler(&schedule_timer_event)),

            Event::FireTimer(fire_timer_event) => self
                .fire_timer_handlers
                .iter()
                .for_each(|handler| handler(&fire_timer_event)),

            Event::EnterLevel(enter_level_event) => self
                .enter_level_handlers
                .iter()
                .for_each(|handler| handler(&enter_level_event)),

            Event::LocalTimeout(local_timeout_event) => self
                .local_timeout_handlers
                .iter()
                .for_each(|handler| handler(&local_timeout_event)),

            Event::UpdateHighestTC(update_highest_tc_event) => self
                .update_highest_tc_handlers
                .iter()
                .for_each(|handler| handler(&update_highest_tc_event)),

            Event::CacheProposal(cache_proposal_event) => self
                .cache_proposal_handlers
                .iter()
                .for_each(|handler| handler(&cache_proposal_event)),

            Event::CutBlocks(cut_blocks_event) => self
                .cut_blocks_handlers
                .iter()
                .for_each(|handler| handler(&cut_blocks_event)),

            Event::DiscardBlocks(discard_blocks_event) => self
                .discard_blocks_handlers
                .iter()
                .for_each(|handler| handler(&discard_blocks_event)),

            Event::VerifyBlock(verify_block_event) => self
                .verify_block_handlers
                .iter()
                .for_each(|handler| handler(&verify_block_event)),

            Event::CommitBlock(commit_block_event) => self
                .commit_block_handlers
                .iter()
                .for_each(|handler| handler(&commit_block_event)),
        }
    }
}

/// Start the event bus thread. It runs until `shutdown_signal` receives a message or is dropped,
/// and fires handlers for events in the order they were published.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Fire handlers for what was published before shutdown.
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone. Wait for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => {
                let _ = shutdown_signal.recv();
                return;
            }
        }
    })
}
