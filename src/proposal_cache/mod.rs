//! In-memory store of the candidate blocks a node has proposed or verified but not yet committed.
//!
//! # Shape
//!
//! Entries are keyed first by height and then by the block's
//! [fingerprint](crate::types::block::Block::fingerprint). Several proposals can coexist at one
//! height, e.g., when a leader timed out and the next leader proposed a sibling. Most operations
//! touch "everything at height `h`", which is why the outer key is the height.
//!
//! # Lifecycle of an entry
//!
//! 1. Inserted by [`set_proposed_block`](implementation::ProposalCache::set_proposed_block) once the
//!    node has built the block itself, or verified someone else's. Heights at or below the committed
//!    height are refused, so finalized history can never be re-cached.
//! 2. Cut by [`keep_proposed_block`](implementation::ProposalCache::keep_proposed_block) if the
//!    network confirmed a sibling instead. The caller returns the cut blocks' transactions to the
//!    pool.
//! 3. Discarded by [`discard_above_height`](implementation::ProposalCache::discard_above_height)
//!    when speculative state above some height is rolled back.
//! 4. Cleared by [`clear_proposed_block_at`](implementation::ProposalCache::clear_proposed_block_at)
//!    once its height is committed.

pub mod implementation;
pub use implementation::ProposalCache;

pub mod types;
pub use types::{BlockProposal, ProposalCacheError};
