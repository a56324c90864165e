/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread-based implementation of the timer service.
//!
//! Main type: [`TimerService`].

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::events::{Event, FireTimerEvent, ScheduleTimerEvent};

use super::types::{is_newer, TimerEvent};

/// Requests handled by the worker thread.
enum TimerCommand {
    Schedule(TimerEvent),
    Shutdown,
}

/// Cloneable handle through which components ask the [`TimerService`] to arm a timer.
#[derive(Clone)]
pub struct TimerScheduler(Sender<TimerCommand>);

impl TimerScheduler {
    /// Ask the service to arm a timer with `event`.
    ///
    /// Whether the event is accepted is decided by the worker thread. Scheduling on a stopped
    /// service is a no-op.
    pub fn schedule(&self, event: TimerEvent) {
        let _ = self.0.send(TimerCommand::Schedule(event));
    }
}

/// Owner of the state timer and the pacemaker timer.
///
/// # Usage
///
/// 1. Create with [`new`](Self::new), hand out [`scheduler`](Self::scheduler)s to the components
///    that arm timers, then call [`start`](Self::start) once.
/// 2. Read expirations with [`recv_fired`](Self::recv_fired) or [`fired_events`](Self::fired_events).
/// 3. Call [`stop`](Self::stop) to terminate the worker. A stopped service cannot be restarted.
pub struct TimerService {
    scheduler: TimerScheduler,
    requests: Mutex<Option<Receiver<TimerCommand>>>,
    to_fired: Mutex<Option<Sender<TimerEvent>>>,
    fired: Mutex<Receiver<TimerEvent>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
    event_publisher: Option<Sender<Event>>,
}

impl TimerService {
    pub fn new(event_publisher: Option<Sender<Event>>) -> TimerService {
        let (to_requests, requests) = mpsc::channel();
        let (to_fired, fired) = mpsc::channel();
        TimerService {
            scheduler: TimerScheduler(to_requests),
            requests: Mutex::new(Some(requests)),
            to_fired: Mutex::new(Some(to_fired)),
            fired: Mutex::new(fired),
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
            event_publisher,
        }
    }

    pub fn scheduler(&self) -> TimerScheduler {
        self.scheduler.clone()
    }

    /// Spawn the worker thread. Calling `start` on a service that was already started or stopped
    /// does nothing.
    pub fn start(&self) {
        let requests = self.requests.lock().unwrap().take();
        let to_fired = self.to_fired.lock().unwrap().take();
        if let (Some(requests), Some(to_fired)) = (requests, to_fired) {
            let event_publisher = self.event_publisher.clone();
            let worker = thread::spawn(move || run(requests, to_fired, event_publisher));
            *self.worker.lock().unwrap() = Some(worker);
        } else {
            log::warn!("timer service already started or stopped");
        }
    }

    /// Terminate the worker thread and discard every expiration that has not been read yet.
    ///
    /// After `stop` returns, [`recv_fired`](Self::recv_fired) never yields another event.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.scheduler.0.send(TimerCommand::Shutdown);
        if let Some(worker) = self.worker.lock().unwrap().take() {
            if worker.join().is_err() {
                log::error!("timer service worker panicked");
            }
        }
        // Never started: drop the unused ends so the service stays unstartable.
        self.requests.lock().unwrap().take();
        self.to_fired.lock().unwrap().take();

        let drained = self.fired.lock().unwrap().try_iter().count();
        if drained > 0 {
            log::debug!("timer service dropped {} unread expirations", drained);
        }
    }

    /// Wait up to `timeout` for the next expiration.
    pub fn recv_fired(&self, timeout: Duration) -> Option<TimerEvent> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        let event = self.fired.lock().unwrap().recv_timeout(timeout).ok();
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }
        event
    }

    /// Blocking iterator over expirations. Ends once the service is stopped.
    pub fn fired_events(&self) -> FiredEvents<'_> {
        FiredEvents { service: self }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::SeqCst) {
            self.stop()
        }
    }
}

/// See [`TimerService::fired_events`].
pub struct FiredEvents<'a> {
    service: &'a TimerService,
}

impl<'a> Iterator for FiredEvents<'a> {
    type Item = TimerEvent;

    fn next(&mut self) -> Option<TimerEvent> {
        const POLL_INTERVAL: Duration = Duration::from_millis(50);
        while !self.service.stopped.load(Ordering::SeqCst) {
            if let Some(event) = self.service.recv_fired(POLL_INTERVAL) {
                return Some(event);
            }
        }
        None
    }
}

/// A timer that has been armed but has not expired yet.
struct ArmedTimer {
    event: TimerEvent,
    /// `None` if the deadline is too far away to be represented. Such a timer never fires.
    deadline: Option<Instant>,
}

impl ArmedTimer {
    fn new(event: TimerEvent) -> ArmedTimer {
        let deadline = Instant::now().checked_add(event.duration);
        ArmedTimer { event, deadline }
    }
}

/// State owned by the worker thread.
struct Timers {
    state: Option<ArmedTimer>,
    pacemaker: Option<ArmedTimer>,
    last_state_event: Option<TimerEvent>,
}

impl Timers {
    fn next_deadline(&self) -> Option<Instant> {
        [&self.state, &self.pacemaker]
            .into_iter()
            .flatten()
            .filter_map(|timer| timer.deadline)
            .min()
    }

    fn schedule(&mut self, event: TimerEvent, event_publisher: &Option<Sender<Event>>) {
        // 1. Pacemaker events always replace the pending pacemaker timer.
        if event.kind.is_pacemaker() {
            self.pacemaker = Some(ArmedTimer::new(event.clone()));

        // 2. State events only replace the state timer if they are newer than the last one.
        } else if is_newer(self.last_state_event.as_ref(), &event) {
            self.state = Some(ArmedTimer::new(event.clone()));
            self.last_state_event = Some(event.clone());
        } else {
            log::debug!(
                "dropping stale timer event: height {}, level {}, {:?}",
                event.height,
                event.level,
                event.kind
            );
            return;
        }

        Event::ScheduleTimer(ScheduleTimerEvent {
            timestamp: SystemTime::now(),
            timer_event: event,
        })
        .publish(event_publisher);
    }

    fn fire_expired(
        &mut self,
        now: Instant,
        to_fired: &Sender<TimerEvent>,
        event_publisher: &Option<Sender<Event>>,
    ) {
        for slot in [&mut self.state, &mut self.pacemaker] {
            if slot
                .as_ref()
                .and_then(|timer| timer.deadline)
                .is_some_and(|deadline| deadline <= now)
            {
                if let Some(timer) = slot.take() {
                    Event::FireTimer(FireTimerEvent {
                        timestamp: SystemTime::now(),
                        timer_event: timer.event.clone(),
                    })
                    .publish(event_publisher);
                    let _ = to_fired.send(timer.event);
                }
            }
        }
    }
}

/// Body of the worker thread.
fn run(
    requests: Receiver<TimerCommand>,
    to_fired: Sender<TimerEvent>,
    event_publisher: Option<Sender<Event>>,
) {
    let mut timers = Timers {
        state: None,
        pacemaker: None,
        last_state_event: None,
    };

    loop {
        // 1. Wait for a request, or for the earliest deadline if a timer is armed.
        let command = match timers.next_deadline() {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    None
                } else {
                    match requests.recv_timeout(deadline - now) {
                        Ok(command) => Some(command),
                        Err(RecvTimeoutError::Timeout) => None,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            }
            None => match requests.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        // 2. Apply the request.
        match command {
            Some(TimerCommand::Schedule(event)) => timers.schedule(event, &event_publisher),
            Some(TimerCommand::Shutdown) => return,
            None => (),
        }

        // 3. Fire whatever expired in the meantime.
        timers.fire_expired(Instant::now(), &to_fired, &event_publisher);
    }
}

#[cfg(test)]
fn pacemaker_event(level: u64, duration: Duration) -> TimerEvent {
    use super::types::TimerEventKind;
    use crate::types::data_types::{BlockHeight, EpochId, Level};

    TimerEvent {
        node_index: 0,
        level: Level::new(level),
        height: BlockHeight::new(1),
        epoch_id: EpochId::new(0),
        level_index: 0,
        duration,
        pre_block_hash: None,
        kind: TimerEventKind::Pacemaker,
    }
}

#[test]
fn pacemaker_event_replaces_pending_timer_test() {
    let service = TimerService::new(None);
    service.start();
    let scheduler = service.scheduler();

    scheduler.schedule(pacemaker_event(1, Duration::from_millis(200)));
    scheduler.schedule(pacemaker_event(2, Duration::from_millis(20)));

    let fired = service.recv_fired(Duration::from_secs(2)).unwrap();
    assert_eq!(fired.level.int(), 2);
    assert!(service.recv_fired(Duration::from_millis(400)).is_none());

    service.stop();
}

#[test]
fn stop_drains_unread_expirations_test() {
    let service = TimerService::new(None);
    service.start();
    service
        .scheduler()
        .schedule(pacemaker_event(1, Duration::from_millis(1)));
    thread::sleep(Duration::from_millis(100));

    service.stop();
    assert!(service.recv_fired(Duration::from_millis(10)).is_none());
    assert!(service.fired_events().next().is_none());

    // A stopped service cannot be restarted.
    service.start();
    service
        .scheduler()
        .schedule(pacemaker_event(2, Duration::from_millis(1)));
    assert!(service.recv_fired(Duration::from_millis(50)).is_none());
}

#[test]
fn unrepresentable_deadline_never_fires_test() {
    let service = TimerService::new(None);
    service.start();
    let scheduler = service.scheduler();

    scheduler.schedule(pacemaker_event(1, Duration::MAX));
    assert!(service.recv_fired(Duration::from_millis(100)).is_none());

    // The worker is still alive, and a later timer replaces the one that never fires.
    scheduler.schedule(pacemaker_event(2, Duration::from_millis(10)));
    let fired = service.recv_fired(Duration::from_secs(2)).unwrap();
    assert_eq!(fired.level.int(), 2);

    service.stop();
}
