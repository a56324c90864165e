/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Timer events and the pure functions that order and size them.

use std::time::Duration;

use crate::{
    config::TimeoutConfiguration,
    types::data_types::{BlockHeight, CryptoHash, EpochId, Level},
};

/// The step of the protocol a [`TimerEvent`] guards.
///
/// Variants are declared in the order the protocol moves through them within one level, and
/// [`rank`](Self::rank) follows that order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerEventKind {
    NewHeight,
    NewLevel,
    Propose,
    Vote,
    /// Level escalation, armed by the Pacemaker. Tracked on its own timer.
    Pacemaker,
}

impl TimerEventKind {
    pub fn rank(&self) -> u8 {
        match self {
            TimerEventKind::NewHeight => 0,
            TimerEventKind::NewLevel => 1,
            TimerEventKind::Propose => 2,
            TimerEventKind::Vote => 3,
            TimerEventKind::Pacemaker => 4,
        }
    }

    pub fn is_pacemaker(&self) -> bool {
        matches!(self, TimerEventKind::Pacemaker)
    }
}

/// A request to be notified after `duration`, tagged with the consensus position it was made in.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TimerEvent {
    /// Index of the local node in the validator set of the current epoch.
    pub node_index: u64,
    pub level: Level,
    pub height: BlockHeight,
    pub epoch_id: EpochId,
    /// How far `level` is past the highest committed level.
    pub level_index: u64,
    pub duration: Duration,
    /// Only set for proposal timeouts.
    pub pre_block_hash: Option<CryptoHash>,
    pub kind: TimerEventKind,
}

/// Decide whether `next` may replace `last` as the event the state timer is armed with.
///
/// Events from a different epoch are always accepted. Within an epoch, `next` is rejected if it is
/// for a lower height, for a lower level or level index at the same height, or for the same level
/// at a step that does not come after `last`'s.
pub fn is_newer(last: Option<&TimerEvent>, next: &TimerEvent) -> bool {
    let last = match last {
        Some(last) => last,
        None => return true,
    };
    if last.epoch_id != next.epoch_id {
        return true;
    }
    if next.height < last.height {
        return false;
    }
    if next.height == last.height {
        if next.level_index < last.level_index || next.level < last.level {
            return false;
        }
        if next.level == last.level && next.kind.rank() <= last.kind.rank() {
            return false;
        }
    }
    true
}

/// The two families of timeouts, each with its own base and increment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimeoutKind {
    Proposal,
    Round,
}

/// Duration of a timeout of `kind` after `index` unproductive levels: `base + interval * index`.
///
/// Saturates instead of overflowing, so the result is non-decreasing in `index`.
pub fn get_event_timeout(kind: TimeoutKind, index: u64, config: &TimeoutConfiguration) -> Duration {
    let (base, interval) = match kind {
        TimeoutKind::Proposal => (config.proposal_timeout, config.proposal_timeout_interval),
        TimeoutKind::Round => (config.round_timeout, config.round_timeout_interval),
    };
    let index = u32::try_from(index).unwrap_or(u32::MAX);
    interval
        .checked_mul(index)
        .and_then(|growth| base.checked_add(growth))
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
fn state_event(height: u64, level: u64, level_index: u64, kind: TimerEventKind) -> TimerEvent {
    TimerEvent {
        node_index: 0,
        level: Level::new(level),
        height: BlockHeight::new(height),
        epoch_id: EpochId::new(1),
        level_index,
        duration: Duration::from_millis(100),
        pre_block_hash: None,
        kind,
    }
}

#[test]
fn is_newer_test() {
    use TimerEventKind::*;

    let last = state_event(10, 20, 2, Propose);

    assert!(is_newer(None, &last));

    // Lower height in the same epoch.
    assert!(!is_newer(Some(&last), &state_event(9, 25, 5, Vote)));
    // Same height, lower level or lower level index.
    assert!(!is_newer(Some(&last), &state_event(10, 19, 2, Vote)));
    assert!(!is_newer(Some(&last), &state_event(10, 21, 1, Vote)));
    // Same level, not a later step.
    assert!(!is_newer(Some(&last), &state_event(10, 20, 2, Propose)));
    assert!(!is_newer(Some(&last), &state_event(10, 20, 2, NewLevel)));
    // Same level, later step.
    assert!(is_newer(Some(&last), &state_event(10, 20, 2, Vote)));
    // Higher level or height.
    assert!(is_newer(Some(&last), &state_event(10, 21, 3, NewLevel)));
    assert!(is_newer(Some(&last), &state_event(11, 1, 0, NewHeight)));

    // Another epoch is always accepted.
    let mut other_epoch = state_event(1, 1, 0, NewHeight);
    other_epoch.epoch_id = EpochId::new(2);
    assert!(is_newer(Some(&last), &other_epoch));
}

#[test]
fn get_event_timeout_test() {
    let config = TimeoutConfiguration::default();

    assert_eq!(
        get_event_timeout(TimeoutKind::Round, 0, &config),
        Duration::from_millis(6000)
    );
    assert_eq!(
        get_event_timeout(TimeoutKind::Round, 4, &config),
        Duration::from_millis(8000)
    );
    assert_eq!(
        get_event_timeout(TimeoutKind::Proposal, 2, &config),
        Duration::from_millis(3000)
    );

    let mut previous = Duration::ZERO;
    for index in [0, 1, 2, 10, 1_000, u32::MAX as u64, u64::MAX] {
        let timeout = get_event_timeout(TimeoutKind::Round, index, &config);
        assert!(timeout >= previous);
        previous = timeout;
    }
}
