/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Events that components of the chained-BFT core publish when they change observable state.
//!
//! An event for a given action indicates that the action has been completed. Components receive an
//! optional *event publisher* (`Option<Sender<Event>>`) when they are constructed, and publish into
//! it; the [event bus](crate::event_bus) thread then fires the registered handlers, including the
//! default [logging](crate::logging) handlers.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    block_verifier::VerifyMode,
    timer_service::TimerEvent,
    types::{
        certificates::TimeoutCertificate,
        data_types::{BlockHeight, CryptoHash, EpochId, Level},
    },
};

pub enum Event {
    // Timer service events.
    ScheduleTimer(ScheduleTimerEvent),
    FireTimer(FireTimerEvent),
    // Pacemaker events.
    EnterLevel(EnterLevelEvent),
    LocalTimeout(LocalTimeoutEvent),
    UpdateHighestTC(UpdateHighestTCEvent),
    // Proposal cache events.
    CacheProposal(CacheProposalEvent),
    CutBlocks(CutBlocksEvent),
    DiscardBlocks(DiscardBlocksEvent),
    // Verification and commit events.
    VerifyBlock(VerifyBlockEvent),
    CommitBlock(CommitBlockEvent),
}

impl Event {
    /// Send the event through `event_publisher`, if there is one.
    ///
    /// A publisher whose event bus has already shut down is ignored.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A timer was armed with `timer_event`.
pub struct ScheduleTimerEvent {
    pub timestamp: SystemTime,
    pub timer_event: TimerEvent,
}

/// A timer armed with `timer_event` expired.
pub struct FireTimerEvent {
    pub timestamp: SystemTime,
    pub timer_event: TimerEvent,
}

/// The Pacemaker entered `level`, and now expects a block at `height`.
pub struct EnterLevelEvent {
    pub timestamp: SystemTime,
    pub epoch_id: EpochId,
    pub height: BlockHeight,
    pub level: Level,
    pub timeout: Duration,
}

/// `level` timed out locally, and the pacemaker timer was re-armed with `timeout`.
pub struct LocalTimeoutEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub level: Level,
    pub timeout: Duration,
}

pub struct UpdateHighestTCEvent {
    pub timestamp: SystemTime,
    pub highest_tc: TimeoutCertificate,
}

/// A proposal was inserted into the proposal cache.
pub struct CacheProposalEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub is_self_proposed: bool,
}

/// Every proposal at `height` other than `kept` was removed from the proposal cache.
pub struct CutBlocksEvent {
    pub timestamp: SystemTime,
    pub kept: CryptoHash,
    pub height: BlockHeight,
    pub cut: Vec<CryptoHash>,
}

/// Every proposal above `base_height` was removed from the proposal cache.
pub struct DiscardBlocksEvent {
    pub timestamp: SystemTime,
    pub base_height: BlockHeight,
    pub discarded: Vec<CryptoHash>,
}

pub struct VerifyBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub mode: VerifyMode,
    pub success: bool,
    /// Whether the block had been verified before and was served from the proposal cache.
    pub repeat: bool,
}

pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
    pub tx_count: u32,
}
