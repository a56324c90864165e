//! Pipeline that decides whether a candidate block may extend the chain.
//!
//! # Modes
//!
//! A block is verified in one of two [modes](VerifyMode):
//! 1. **Consensus**: the block was proposed in the current round. The outcome is published on the
//!    [message bus](crate::msg_bus) as a [`VerifyResult`] so that the consensus algorithm can vote.
//! 2. **Sync**: the block was fetched from a peer while catching up. Nothing is published, but the
//!    block's quorum certificate is checked as well.
//!
//! # Steps
//!
//! [`BlockVerifier::verify_block`] runs these steps in order, stopping at the first failure:
//! 1. Reject empty blocks.
//! 2. Claim the block's hash in the [`InFlightSet`], failing fast if another thread holds it.
//! 3. If the block is already in the proposal cache, republish success, cut the siblings of its
//!    parent, and stop.
//! 4. Find the parent: the last committed block, or a cached proposal one height below.
//! 5. With message turbo on, rebuild the transaction bodies from the pool.
//! 6. Check capacity, transaction count, parent linkage, block hash, the proposer's signature, and
//!    duplicate transactions. Siblings of the parent are cut and their transactions returned to
//!    the pool.
//! 7. Execute the transactions. If any check so far failed, publish a failed result and roll back.
//! 8. In sync mode, verify the quorum certificate.
//! 9. Cache the block and mark its transactions pending.
//! 10. Publish success.
//!
//! The hash claimed in step 2 is released on every exit path by an [`InFlightGuard`].

pub mod implementation;
pub use implementation::BlockVerifier;

pub mod in_flight;
pub use in_flight::{InFlightGuard, InFlightSet};

pub mod types;
pub use types::{VerifyError, VerifyMode, VerifyResult, VerifyResultCode};

pub(crate) mod validation;
