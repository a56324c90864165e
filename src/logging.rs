/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them with `log_events` when
//! building a [node](crate::node::NodeSpec).
//!
//! The core logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [VerifyBlock](crate::events::VerifyBlockEvent) is printed:
//!
//! ```text
//! VerifyBlock, 1701329264, fNGCJyk, 12, Consensus, true, false
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block's hash.
//! - The fourth value is the height of the block.
//! - The fifth value is the verification mode.
//! - The sixth value is whether verification succeeded.
//! - The seventh value is whether the block had been verified before.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{events::*, timer_service::TimerEvent, types::data_types::CryptoHash};

// Names of each event in PascalCase for printing:
pub const SCHEDULE_TIMER: &str = "ScheduleTimer";
pub const FIRE_TIMER: &str = "FireTimer";

pub const ENTER_LEVEL: &str = "EnterLevel";
pub const LOCAL_TIMEOUT: &str = "LocalTimeout";
pub const UPDATE_HIGHEST_TC: &str = "UpdateHighestTC";

pub const CACHE_PROPOSAL: &str = "CacheProposal";
pub const CUT_BLOCKS: &str = "CutBlocks";
pub const DISCARD_BLOCKS: &str = "DiscardBlocks";

pub const VERIFY_BLOCK: &str = "VerifyBlock";
pub const COMMIT_BLOCK: &str = "CommitBlock";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for ScheduleTimerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |schedule_timer_event: &ScheduleTimerEvent| {
            log::debug!(
                "{}, {}, {}",
                SCHEDULE_TIMER,
                secs_since_unix_epoch(schedule_timer_event.timestamp),
                timer_event_info(&schedule_timer_event.timer_event)
            )
        };
        Box::new(logger)
    }
}

impl Logger for FireTimerEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |fire_timer_event: &FireTimerEvent| {
            log::info!(
                "{}, {}, {}",
                FIRE_TIMER,
                secs_since_unix_epoch(fire_timer_event.timestamp),
                timer_event_info(&fire_timer_event.timer_event)
            )
        };
        Box::new(logger)
    }
}

impl Logger for EnterLevelEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |enter_level_event: &EnterLevelEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                ENTER_LEVEL,
                secs_since_unix_epoch(enter_level_event.timestamp),
                enter_level_event.epoch_id,
                enter_level_event.height,
                enter_level_event.level,
                enter_level_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for LocalTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |local_timeout_event: &LocalTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                LOCAL_TIMEOUT,
                secs_since_unix_epoch(local_timeout_event.timestamp),
                local_timeout_event.height,
                local_timeout_event.level,
                local_timeout_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateHighestTCEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_highest_tc_event: &UpdateHighestTCEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                UPDATE_HIGHEST_TC,
                secs_since_unix_epoch(update_highest_tc_event.timestamp),
                update_highest_tc_event.highest_tc.height,
                update_highest_tc_event.highest_tc.level,
                update_highest_tc_event.highest_tc.votes.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for CacheProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |cache_proposal_event: &CacheProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CACHE_PROPOSAL,
                secs_since_unix_epoch(cache_proposal_event.timestamp),
                first_seven_base64_chars(&cache_proposal_event.block.bytes()),
                cache_proposal_event.height,
                cache_proposal_event.is_self_proposed
            )
        };
        Box::new(logger)
    }
}

impl Logger for CutBlocksEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |cut_blocks_event: &CutBlocksEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                CUT_BLOCKS,
                secs_since_unix_epoch(cut_blocks_event.timestamp),
                first_seven_base64_chars(&cut_blocks_event.kept.bytes()),
                cut_blocks_event.height,
                hash_list(&cut_blocks_event.cut)
            )
        };
        Box::new(logger)
    }
}

impl Logger for DiscardBlocksEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |discard_blocks_event: &DiscardBlocksEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DISCARD_BLOCKS,
                secs_since_unix_epoch(discard_blocks_event.timestamp),
                discard_blocks_event.base_height,
                hash_list(&discard_blocks_event.discarded)
            )
        };
        Box::new(logger)
    }
}

impl Logger for VerifyBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |verify_block_event: &VerifyBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}, {}, {}",
                VERIFY_BLOCK,
                secs_since_unix_epoch(verify_block_event.timestamp),
                first_seven_base64_chars(&verify_block_event.block.bytes()),
                verify_block_event.height,
                verify_block_event.mode,
                verify_block_event.success,
                verify_block_event.repeat
            )
        };
        Box::new(logger)
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |commit_block_event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(commit_block_event.timestamp),
                first_seven_base64_chars(&commit_block_event.block.bytes()),
                commit_block_event.height,
                commit_block_event.tx_count
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

/// Space-separated short hashes, so that a list stays a single CSV value.
fn hash_list(hashes: &[CryptoHash]) -> String {
    hashes
        .iter()
        .map(|hash| first_seven_base64_chars(&hash.bytes()))
        .collect::<Vec<String>>()
        .join(" ")
}

fn timer_event_info(timer_event: &TimerEvent) -> String {
    format!(
        "{:?}, {}, {}, {}, {}",
        timer_event.kind,
        timer_event.epoch_id,
        timer_event.height,
        timer_event.level,
        timer_event.duration.as_millis()
    )
}

#[test]
fn first_seven_base64_chars_test() {
    assert_eq!(first_seven_base64_chars(&[0u8; 32]), "AAAAAAA");
    assert_eq!(first_seven_base64_chars(&[255u8]), "/w");
    assert_eq!(hash_list(&[CryptoHash::zero(), CryptoHash::zero()]), "AAAAAAA AAAAAAA");
}
