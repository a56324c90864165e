use std::{
    sync::mpsc::{self, Receiver},
    time::Duration,
};

use chained_bft::{
    config::TimeoutConfiguration,
    events::Event,
    pacemaker::{Pacemaker, PacemakerConfiguration},
    timer_service::{TimerEventKind, TimerService},
    types::{
        certificates::{QuorumCertificate, TimeoutCertificate},
        data_types::{BlockHeight, CryptoHash, EpochId, Level},
    },
};
use log::LevelFilter;

mod common;

use crate::common::logging::setup_logger;

fn qc(height: u64, level: u64) -> QuorumCertificate {
    QuorumCertificate::unsigned(
        EpochId::new(0),
        BlockHeight::new(height),
        Level::new(level),
        CryptoHash::new([height as u8; 32]),
    )
}

fn tc(height: u64, level: u64) -> TimeoutCertificate {
    TimeoutCertificate::unsigned(EpochId::new(0), BlockHeight::new(height), Level::new(level))
}

// Collect the (height, level, timeout) of every EnterLevel event published so far.
fn entered_levels(events: &Receiver<Event>) -> Vec<(u64, u64, Duration)> {
    events
        .try_iter()
        .filter_map(|event| match event {
            Event::EnterLevel(enter_level) => Some((
                enter_level.height.int(),
                enter_level.level.int(),
                enter_level.timeout,
            )),
            _ => None,
        })
        .collect()
}

#[test]
fn pacemaker_level_progression_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a Pacemaker that expects height 99, with a timer service that is never started so
    // that no timer fires during the test.
    let timer_service = TimerService::new(None);
    let (event_publisher, events) = mpsc::channel();
    let pacemaker = Pacemaker::new(
        PacemakerConfiguration {
            self_index: 0,
            timeouts: TimeoutConfiguration::default(),
        },
        BlockHeight::new(99),
        EpochId::new(0),
        timer_service.scheduler(),
        Some(event_publisher),
    );
    assert_eq!(pacemaker.current_level(), Level::new(0));

    // 2. A QC for the expected height moves both height and level forward.
    assert!(pacemaker.process_certificates(Some(&qc(99, 100)), None, Level::new(96)));
    assert_eq!(pacemaker.height(), BlockHeight::new(100));
    assert_eq!(pacemaker.current_level(), Level::new(101));
    assert_eq!(pacemaker.highest_qc_level(), Level::new(100));
    assert_eq!(pacemaker.highest_committed_level(), Level::new(96));

    // Five levels past the committed level: two increments on top of the base round timeout.
    assert_eq!(
        entered_levels(&events),
        vec![(100, 101, Duration::from_millis(7000))]
    );

    // 3. A TC for the current level moves only the level.
    assert!(pacemaker.process_certificates(None, Some(&tc(99, 101)), Level::new(96)));
    assert_eq!(pacemaker.height(), BlockHeight::new(100));
    assert_eq!(pacemaker.current_level(), Level::new(102));
    assert_eq!(pacemaker.highest_tc_level(), Level::new(101));

    // 4. Certificates for levels already settled do not re-enter a level, though a QC for the
    // expected height still moves the height.
    assert!(!pacemaker.process_certificates(Some(&qc(100, 101)), Some(&tc(99, 101)), Level::new(96)));
    assert_eq!(pacemaker.current_level(), Level::new(102));
    assert_eq!(pacemaker.height(), BlockHeight::new(101));

    // 5. A QC for an old height moves nothing, and the committed level never decreases.
    assert!(!pacemaker.process_certificates(Some(&qc(98, 90)), None, Level::new(0)));
    assert_eq!(pacemaker.height(), BlockHeight::new(101));
    assert_eq!(pacemaker.highest_committed_level(), Level::new(96));

    // 6. A QC that jumps ahead moves to the height after it.
    assert!(pacemaker.process_certificates(Some(&qc(101, 102)), None, Level::new(100)));
    assert_eq!(pacemaker.height(), BlockHeight::new(102));
    assert_eq!(pacemaker.current_level(), Level::new(103));

    // Right after a commit, the base timeout is used.
    let entered = entered_levels(&events);
    assert_eq!(entered.len(), 2);
    assert_eq!(entered[0].1, 102);
    assert_eq!(entered[1], (102, 103, Duration::from_millis(6000)));
}

#[test]
fn local_timeout_test() {
    setup_logger(LevelFilter::Trace);

    // 1. Start a Pacemaker with short timeouts and a running timer service.
    let timeouts = TimeoutConfiguration {
        proposal_timeout: Duration::from_millis(50),
        proposal_timeout_interval: Duration::from_millis(10),
        round_timeout: Duration::from_millis(50),
        round_timeout_interval: Duration::from_millis(10),
    };
    let timer_service = TimerService::new(None);
    let (event_publisher, events) = mpsc::channel();
    let pacemaker = Pacemaker::new(
        PacemakerConfiguration {
            self_index: 3,
            timeouts,
        },
        BlockHeight::new(1),
        EpochId::new(0),
        timer_service.scheduler(),
        Some(event_publisher),
    );
    timer_service.start();

    // 2. Entering a level arms the pacemaker timer for it.
    assert!(pacemaker.process_certificates(Some(&qc(1, 1)), None, Level::new(0)));
    let fired = timer_service
        .recv_fired(Duration::from_secs(2))
        .expect("pacemaker timer should fire");
    assert_eq!(fired.kind, TimerEventKind::Pacemaker);
    assert_eq!(fired.node_index, 3);
    assert_eq!(fired.height, BlockHeight::new(2));
    assert_eq!(fired.level, Level::new(2));

    // 3. A timeout for the current level re-arms the timer, and one for a past level is ignored.
    assert!(!pacemaker.process_local_timeout(Level::new(1)));
    assert!(pacemaker.process_local_timeout(Level::new(2)));
    let refired = timer_service
        .recv_fired(Duration::from_secs(2))
        .expect("pacemaker timer should be re-armed");
    assert_eq!(refired.level, Level::new(2));

    let local_timeouts: Vec<u64> = events
        .try_iter()
        .filter_map(|event| match event {
            Event::LocalTimeout(local_timeout) => Some(local_timeout.level.int()),
            _ => None,
        })
        .collect();
    assert_eq!(local_timeouts, vec![2]);

    timer_service.stop();
}

#[test]
fn update_tc_test() {
    let timer_service = TimerService::new(None);
    let pacemaker = Pacemaker::new(
        PacemakerConfiguration {
            self_index: 0,
            timeouts: TimeoutConfiguration::default(),
        },
        BlockHeight::new(1),
        EpochId::new(0),
        timer_service.scheduler(),
        None,
    );
    assert!(pacemaker.tc().is_none());

    // The first TC is always recorded.
    pacemaker.update_tc(tc(5, 10));
    assert_eq!(pacemaker.tc(), Some(tc(5, 10)));

    // Later TCs must be higher in both height and level.
    pacemaker.update_tc(tc(6, 10));
    pacemaker.update_tc(tc(5, 11));
    pacemaker.update_tc(tc(4, 20));
    assert_eq!(pacemaker.tc(), Some(tc(5, 10)));

    pacemaker.update_tc(tc(6, 11));
    assert_eq!(pacemaker.tc(), Some(tc(6, 11)));

    // Recording a TC does not move the Pacemaker.
    assert_eq!(pacemaker.current_level(), Level::new(0));
}

#[test]
fn certificates_at_the_last_level_are_stale_test() {
    setup_logger(LevelFilter::Trace);

    // 1. A Pacemaker that has entered level 11 at height 11.
    let timer_service = TimerService::new(None);
    let (event_publisher, events) = mpsc::channel();
    let pacemaker = Pacemaker::new(
        PacemakerConfiguration {
            self_index: 0,
            timeouts: TimeoutConfiguration::default(),
        },
        BlockHeight::new(10),
        EpochId::new(0),
        timer_service.scheduler(),
        Some(event_publisher),
    );
    assert!(pacemaker.process_certificates(Some(&qc(10, 10)), None, Level::new(8)));
    assert_eq!(entered_levels(&events).len(), 1);

    // 2. Certificates with no next height or level are ignored.
    assert!(!pacemaker.process_certificates(Some(&qc(u64::MAX, 12)), None, Level::new(8)));
    assert!(!pacemaker.process_certificates(Some(&qc(11, u64::MAX)), None, Level::new(8)));
    assert!(!pacemaker.process_certificates(None, Some(&tc(11, u64::MAX)), Level::new(8)));
    assert_eq!(pacemaker.height(), BlockHeight::new(11));
    assert_eq!(pacemaker.current_level(), Level::new(11));
    assert_eq!(pacemaker.highest_qc_level(), Level::new(10));
    assert_eq!(pacemaker.highest_tc_level(), Level::new(0));
    assert!(entered_levels(&events).is_empty());

    // 3. The Pacemaker still follows certificates it can move past.
    assert!(pacemaker.process_certificates(
        Some(&qc(u64::MAX - 1, u64::MAX - 1)),
        None,
        Level::new(8)
    ));
    assert_eq!(pacemaker.height(), BlockHeight::new(u64::MAX));
    assert_eq!(pacemaker.current_level(), Level::new(u64::MAX));
}
