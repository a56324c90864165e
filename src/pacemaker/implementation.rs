/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Lock-guarded implementation of the Pacemaker subprotocol.
//!
//! Main type: [`Pacemaker`].

use std::{
    sync::{mpsc::Sender, RwLock},
    time::{Duration, SystemTime},
};

use crate::{
    config::TimeoutConfiguration,
    events::{EnterLevelEvent, Event, LocalTimeoutEvent, UpdateHighestTCEvent},
    timer_service::{get_event_timeout, TimeoutKind, TimerEvent, TimerEventKind, TimerScheduler},
    types::{
        certificates::{QuorumCertificate, TimeoutCertificate},
        data_types::{BlockHeight, EpochId, Level},
    },
};

/// A single participant in the Pacemaker subprotocol.
///
/// # Usage
///
/// After creating an instance of `Pacemaker` using [`new`](Self::new), the caller should interact with
/// it by calling three methods:
/// 1. [`process_certificates`](Self::process_certificates): whenever a quorum certificate, a timeout
///    certificate, or a new committed level is learned.
/// 2. [`process_local_timeout`](Self::process_local_timeout): whenever the pacemaker timer fires.
/// 3. [`update_tc`](Self::update_tc): whenever a timeout certificate is received that may be worth
///    relaying to peers.
///
/// Readers such as [`height`](Self::height) and [`current_level`](Self::current_level) return a
/// consistent snapshot and may be called from any thread.
pub struct Pacemaker {
    config: PacemakerConfiguration,
    state: RwLock<PacemakerState>,
    scheduler: TimerScheduler,
    event_publisher: Option<Sender<Event>>,
}

impl Pacemaker {
    /// Create a `Pacemaker` that expects a block at `start_height` in `epoch_id`, in level 0.
    ///
    /// No timer is armed until the first call that enters a level.
    pub fn new(
        config: PacemakerConfiguration,
        start_height: BlockHeight,
        epoch_id: EpochId,
        scheduler: TimerScheduler,
        event_publisher: Option<Sender<Event>>,
    ) -> Pacemaker {
        Pacemaker {
            config,
            state: RwLock::new(PacemakerState::initialize(start_height, epoch_id)),
            scheduler,
            event_publisher,
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.state.read().unwrap().height
    }

    pub fn epoch_id(&self) -> EpochId {
        self.state.read().unwrap().epoch_id
    }

    pub fn current_level(&self) -> Level {
        self.state.read().unwrap().current_level
    }

    pub fn highest_qc_level(&self) -> Level {
        self.state.read().unwrap().highest_qc_level
    }

    pub fn highest_tc_level(&self) -> Level {
        self.state.read().unwrap().highest_tc_level
    }

    pub fn highest_committed_level(&self) -> Level {
        self.state.read().unwrap().highest_committed_level
    }

    /// The newest timeout certificate recorded by [`update_tc`](Self::update_tc).
    pub fn tc(&self) -> Option<TimeoutCertificate> {
        self.state.read().unwrap().timeout_certificate.clone()
    }

    /// Move the Pacemaker forward with whatever the caller learned, and enter a new level if the
    /// certificates settle the current one.
    ///
    /// Returns `true` if and only if a new level was entered, in which case the pacemaker timer is
    /// re-armed for it.
    pub fn process_certificates(
        &self,
        qc: Option<&QuorumCertificate>,
        tc: Option<&TimeoutCertificate>,
        highest_committed_level: Level,
    ) -> bool {
        let mut state = self.state.write().unwrap();

        // 1. Raise the highest committed level.
        if highest_committed_level > state.highest_committed_level {
            state.highest_committed_level = highest_committed_level;
        }

        // 2. Raise the highest TC level. A certificate for the last representable level has no
        // level after it, and is treated as stale.
        if let Some(tc) = tc {
            if tc.level.checked_next().is_none() {
                log::debug!("ignoring tc for level {}: no next level", tc.level);
            } else if tc.level > state.highest_tc_level {
                state.highest_tc_level = tc.level;
            }
        }

        // 3. A QC for the expected height or above makes the next height the expected one.
        // 4. Raise the highest QC level.
        if let Some(qc) = qc {
            match (qc.height.checked_next(), qc.level.checked_next()) {
                (Some(next_height), Some(_)) => {
                    if qc.height >= state.height {
                        state.height = next_height;
                    }
                    if qc.level > state.highest_qc_level {
                        state.highest_qc_level = qc.level;
                    }
                }
                _ => log::debug!(
                    "ignoring qc for height {}, level {}: no next height or level",
                    qc.height,
                    qc.level
                ),
            }
        }

        log::debug!(
            "process certificates: height {}, current level {}, highest qc level {}, highest tc level {}, highest committed level {}",
            state.height,
            state.current_level,
            state.highest_qc_level,
            state.highest_tc_level,
            state.highest_committed_level,
        );

        // 5. The next level is the one after the highest certified level.
        // 6. Enter it if it is ahead of the current level.
        let new_level = match state.highest_qc_level.max(state.highest_tc_level).checked_next() {
            Some(new_level) if new_level > state.current_level => new_level,
            _ => return false,
        };
        state.current_level = new_level;
        let timer_event = self.setup_timeout(&state);

        Event::EnterLevel(EnterLevelEvent {
            timestamp: SystemTime::now(),
            epoch_id: state.epoch_id,
            height: state.height,
            level: state.current_level,
            timeout: timer_event.duration,
        })
        .publish(&self.event_publisher);

        true
    }

    /// Re-arm the pacemaker timer after it fired for `level`.
    ///
    /// Returns `false`, and does nothing, if the Pacemaker has already left `level`.
    pub fn process_local_timeout(&self, level: Level) -> bool {
        let state = self.state.write().unwrap();
        if level != state.current_level {
            log::debug!(
                "ignoring stale local timeout for level {}, current level is {}",
                level,
                state.current_level
            );
            return false;
        }
        let timer_event = self.setup_timeout(&state);

        Event::LocalTimeout(LocalTimeoutEvent {
            timestamp: SystemTime::now(),
            height: state.height,
            level,
            timeout: timer_event.duration,
        })
        .publish(&self.event_publisher);

        true
    }

    /// Record `tc` if it is the first timeout certificate seen, or if it is strictly higher than the
    /// recorded one in both height and level.
    pub fn update_tc(&self, tc: TimeoutCertificate) {
        let mut state = self.state.write().unwrap();
        if let Some(current) = &state.timeout_certificate {
            if tc.height <= current.height || tc.level <= current.level {
                return;
            }
        }
        state.timeout_certificate = Some(tc.clone());

        Event::UpdateHighestTC(UpdateHighestTCEvent {
            timestamp: SystemTime::now(),
            highest_tc: tc,
        })
        .publish(&self.event_publisher);
    }

    /// Arm the pacemaker timer for the current level.
    ///
    /// Called with the state lock held so that timers are armed in the same order levels are
    /// entered. Scheduling is a non-blocking send to the timer service's worker.
    fn setup_timeout(&self, state: &PacemakerState) -> TimerEvent {
        let (level_index, duration) = state.timeout_duration(TimeoutKind::Round, &self.config.timeouts);
        let timer_event = TimerEvent {
            node_index: self.config.self_index,
            level: state.current_level,
            height: state.height,
            epoch_id: state.epoch_id,
            level_index,
            duration,
            pre_block_hash: None,
            kind: TimerEventKind::Pacemaker,
        };
        self.scheduler.schedule(timer_event.clone());
        timer_event
    }
}

/// Immutable parameters of a [`Pacemaker`].
#[derive(Clone)]
pub struct PacemakerConfiguration {
    /// Index of the local node in the validator set of the current epoch.
    pub self_index: u64,

    /// Base timeouts and their per-level increments.
    pub timeouts: TimeoutConfiguration,
}

/// In-memory state of a [`Pacemaker`].
struct PacemakerState {
    height: BlockHeight,
    epoch_id: EpochId,
    current_level: Level,
    highest_qc_level: Level,
    highest_tc_level: Level,
    highest_committed_level: Level,
    timeout_certificate: Option<TimeoutCertificate>,
}

impl PacemakerState {
    fn initialize(start_height: BlockHeight, epoch_id: EpochId) -> Self {
        Self {
            height: start_height,
            epoch_id,
            current_level: Level::init(),
            highest_qc_level: Level::init(),
            highest_tc_level: Level::init(),
            highest_committed_level: Level::init(),
            timeout_certificate: None,
        }
    }

    /// Compute the level index and the duration of the next timeout of `kind`.
    ///
    /// Without a committed level, every level since genesis counts. Otherwise the first three levels
    /// after the committed one use the base timeout, and each level after that adds one increment.
    fn timeout_duration(&self, kind: TimeoutKind, config: &TimeoutConfiguration) -> (u64, Duration) {
        let current = self.current_level.int();
        let committed = self.highest_committed_level.int();
        let index = if committed == 0 {
            current.saturating_sub(1)
        } else if current.saturating_sub(committed) < 3 {
            0
        } else {
            current - committed - 3
        };
        (index, get_event_timeout(kind, index, config))
    }
}

#[test]
fn timeout_duration_test() {
    let config = TimeoutConfiguration::default();
    let mut state = PacemakerState::initialize(BlockHeight::new(1), EpochId::new(0));

    state.current_level = Level::new(1);
    assert_eq!(
        state.timeout_duration(TimeoutKind::Round, &config),
        (0, Duration::from_millis(6000))
    );

    state.current_level = Level::new(5);
    assert_eq!(
        state.timeout_duration(TimeoutKind::Round, &config),
        (4, Duration::from_millis(8000))
    );

    // Just caught up with the committed level.
    state.highest_committed_level = Level::new(4);
    assert_eq!(state.timeout_duration(TimeoutKind::Round, &config).0, 0);
    state.current_level = Level::new(6);
    assert_eq!(state.timeout_duration(TimeoutKind::Round, &config).0, 0);

    // Stuck for a while.
    state.current_level = Level::new(10);
    assert_eq!(
        state.timeout_duration(TimeoutKind::Round, &config),
        (3, Duration::from_millis(7500))
    );
}
