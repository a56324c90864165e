//! Subprotocol that turns certificates into level changes, and level changes into timeouts.
//!
//! # Levels and heights
//!
//! A chained-BFT replica tracks two counters. The **height** is the position of the next block it
//! expects to propose or verify. The **level** is the round counter that orders proposals and
//! timeouts independently of height: a level can end without producing a block, in which case the
//! height stays the same and only the level moves.
//!
//! # Leaving a level
//!
//! A replica leaves its current level when it learns that the level is settled, in one of two ways:
//! 1. It sees a [`QuorumCertificate`](crate::types::certificates::QuorumCertificate) for the current
//!    level or higher. The certified block is now the tip, so the height moves to the block after
//!    it.
//! 2. It sees a [`TimeoutCertificate`](crate::types::certificates::TimeoutCertificate) for the
//!    current level or higher, proving that a quorum gave up on that level. The height stays.
//!
//! Either way the new level is one past the highest certified level, and a level is only ever
//! entered once: [`process_certificates`](implementation::Pacemaker::process_certificates) reports
//! `true` exactly when the current level increases.
//!
//! # Timeouts
//!
//! Every time the replica enters a level, the Pacemaker arms the pacemaker timer of the
//! [timer service](crate::timer_service). The timeout grows linearly with the number of levels
//! since the last commit, so that replicas that keep failing to commit spend longer in each level
//! and eventually overlap with a quorum. Right after a commit (fewer than three levels past the
//! highest committed level) the base timeout is used.
//!
//! If the timer fires and the replica is still in the level it was armed for,
//! [`process_local_timeout`](implementation::Pacemaker::process_local_timeout) re-arms it. If the
//! replica has moved on, the expiration is stale and is ignored.

pub mod implementation;
pub use implementation::{Pacemaker, PacemakerConfiguration};
