//! Scheduler of the local timeouts that drive the chained-BFT protocol forward.
//!
//! # Two timers
//!
//! The [`TimerService`](implementation::TimerService) owns exactly two timers:
//! 1. The **state timer**, armed by the proposal and voting logic while the node waits for a block
//!    or for votes in the current level.
//! 2. The **pacemaker timer**, armed by the [Pacemaker](crate::pacemaker) whenever the node enters a
//!    new level, and re-armed every time that level times out locally.
//!
//! When either timer expires, the [`TimerEvent`](types::TimerEvent) it was armed with is sent on
//! the service's fired-event channel, where the
//! [`LivenessDriver`](crate::core_engine::LivenessDriver) picks it up.
//!
//! # Only newer state events re-arm the state timer
//!
//! Certificates and proposals can arrive out of order, so a late caller may try to arm the state
//! timer with an event that belongs to a height or level the node already left. A state event is
//! only accepted if it is [newer](types::is_newer) than the last accepted one: a higher height, a
//! higher level, or, in the same level, a later step of the protocol. Pacemaker events skip this
//! check and always replace the pending pacemaker timer, since the Pacemaker only arms a timeout
//! after moving its own state forward.
//!
//! # Threading
//!
//! All scheduling decisions are serialized through a single worker thread that waits on whichever
//! comes first: a new request, the earliest of the two deadlines, or shutdown. Callers never touch
//! the timers directly; they send requests through a cloneable
//! [`TimerScheduler`](implementation::TimerScheduler).

pub mod implementation;
pub use implementation::{TimerScheduler, TimerService};

pub mod types;
pub use types::{get_event_timeout, is_newer, TimeoutKind, TimerEvent, TimerEventKind};
